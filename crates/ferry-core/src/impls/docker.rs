//! DockerCliProvisioner - docker CLI を使う Provisioner
//!
//! `tokio::process::Command` で docker CLI を呼ぶ。
//! - 子プロセスは `kill_on_drop` にしてあるので、timeout で future が
//!   drop されるとプロセスも止まる
//! - 環境変数の値は argv に載せず、`-e KEY` だけ渡して docker client の
//!   環境から引き継がせる（`ps` から token が見えないように）
//! - runner 名は `ferry.runner` label にも入れて、再起動後の復元に使う

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::{InstanceHandle, ProvisionError, RunnerName};
use crate::ports::{InstanceSpec, ManagedInstance, Provisioner};

pub const RUNNER_LABEL: &str = "ferry.runner";

const NO_SUCH_CONTAINER: &str = "No such container";

pub struct DockerCliProvisioner {
    docker_bin: PathBuf,
}

impl DockerCliProvisioner {
    pub fn new(docker_bin: impl Into<PathBuf>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    async fn docker(
        &self,
        args: &[String],
        env: &[(&str, &str)],
    ) -> Result<String, ProvisionError> {
        debug!(bin = %self.docker_bin.display(), args = ?args, "running docker");
        let output = Command::new(&self.docker_bin)
            .args(args)
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ProvisionError::failed(format!(
            "docker {} exited with {}: {stderr}",
            args.first().map(String::as_str).unwrap_or_default(),
            output.status
        )))
    }
}

impl Default for DockerCliProvisioner {
    fn default() -> Self {
        Self::new("docker")
    }
}

/// Arguments for `docker create`.
pub fn create_args(spec: &InstanceSpec) -> Vec<String> {
    let name = spec.name.as_str();
    let mut args = vec![
        "create".to_string(),
        "--hostname".to_string(),
        name.to_string(),
        "--label".to_string(),
        format!("{RUNNER_LABEL}={name}"),
    ];
    for key in spec.env.keys() {
        args.push("-e".to_string());
        args.push(key.clone());
    }
    if let Some(socket) = &spec.runtime_socket {
        let socket = socket.display();
        args.push("--mount".to_string());
        args.push(format!("type=bind,source={socket},target={socket}"));
    }
    args.push(spec.image.clone());
    args
}

/// Parse `docker ps --format '{{.ID}}\t{{.Label "ferry.runner"}}'` output.
pub fn parse_managed(output: &str) -> Vec<ManagedInstance> {
    output
        .lines()
        .filter_map(|line| {
            let (id, name) = line.trim().split_once('\t')?;
            let (id, name) = (id.trim(), name.trim());
            if id.is_empty() || name.is_empty() {
                return None;
            }
            Some(ManagedInstance {
                name: RunnerName::new(name),
                handle: InstanceHandle::new(id),
            })
        })
        .collect()
}

#[async_trait]
impl Provisioner for DockerCliProvisioner {
    async fn create(&self, spec: &InstanceSpec) -> Result<InstanceHandle, ProvisionError> {
        let env: Vec<(&str, &str)> = spec
            .env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let id = self.docker(&create_args(spec), &env).await?;
        if id.is_empty() {
            return Err(ProvisionError::failed("docker create printed no container id"));
        }
        Ok(InstanceHandle::new(id))
    }

    async fn start(&self, handle: &InstanceHandle) -> Result<(), ProvisionError> {
        let args = ["start".to_string(), handle.to_string()];
        self.docker(&args, &[]).await.map(|_| ())
    }

    async fn remove(&self, handle: &InstanceHandle) -> Result<(), ProvisionError> {
        let args = ["rm".to_string(), "--force".to_string(), handle.to_string()];
        match self.docker(&args, &[]).await {
            Ok(_) => Ok(()),
            Err(ProvisionError::CommandFailed { message, .. }) if message.contains(NO_SUCH_CONTAINER) => {
                Err(ProvisionError::NotFound(handle.clone()))
            }
            Err(e) => Err(e),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), ProvisionError> {
        let args = ["pull".to_string(), image.to_string()];
        let out = self.docker(&args, &[]).await?;
        if let Some(last) = out.lines().last() {
            debug!(image, "{last}");
        }
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<ManagedInstance>, ProvisionError> {
        let args = [
            "ps".to_string(),
            "--all".to_string(),
            "--filter".to_string(),
            format!("label={RUNNER_LABEL}"),
            "--format".to_string(),
            format!("{{{{.ID}}}}\t{{{{.Label \"{RUNNER_LABEL}\"}}}}"),
        ];
        let out = self.docker(&args, &[]).await?;
        Ok(parse_managed(&out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(socket: Option<&str>) -> InstanceSpec {
        let mut env = BTreeMap::new();
        env.insert("GITHUB_TOKEN".to_string(), "s3cret".to_string());
        env.insert("RUNNER_REPOSITORY_URL".to_string(), "https://github.com/acme/w".to_string());
        InstanceSpec {
            image: "ghcr.io/acme/runner:1".to_string(),
            name: RunnerName::new("ferry-01abc"),
            env,
            runtime_socket: socket.map(PathBuf::from),
        }
    }

    #[test]
    fn create_args_keep_secrets_off_argv() {
        let args = create_args(&spec(None));
        assert_eq!(
            args,
            vec![
                "create",
                "--hostname",
                "ferry-01abc",
                "--label",
                "ferry.runner=ferry-01abc",
                "-e",
                "GITHUB_TOKEN",
                "-e",
                "RUNNER_REPOSITORY_URL",
                "ghcr.io/acme/runner:1",
            ]
        );
        assert!(!args.iter().any(|a| a.contains("s3cret")));
    }

    #[test]
    fn create_args_bind_runtime_socket_when_requested() {
        let args = create_args(&spec(Some("/var/run/docker.sock")));
        let mount = args.iter().position(|a| a == "--mount").unwrap();
        assert_eq!(
            args[mount + 1],
            "type=bind,source=/var/run/docker.sock,target=/var/run/docker.sock"
        );
        assert_eq!(args.last().unwrap(), "ghcr.io/acme/runner:1");
    }

    #[test]
    fn parse_managed_skips_unlabelled_lines() {
        let out = "abc123\tferry-one\n\ndef456\t\nfff000\tferry-two\n";
        let managed = parse_managed(out);
        assert_eq!(
            managed,
            vec![
                ManagedInstance {
                    name: RunnerName::new("ferry-one"),
                    handle: InstanceHandle::new("abc123"),
                },
                ManagedInstance {
                    name: RunnerName::new("ferry-two"),
                    handle: InstanceHandle::new("fff000"),
                },
            ]
        );
    }

    #[test]
    fn list_format_is_a_go_template() {
        let format = format!("{{{{.ID}}}}\t{{{{.Label \"{RUNNER_LABEL}\"}}}}");
        assert_eq!(format, "{{.ID}}\t{{.Label \"ferry.runner\"}}");
    }
}
