//! Controller configuration.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "ghcr.io/naikrovek/actions-runner:0.7";
pub const DEFAULT_RUNTIME_SOCKET: &str = "/var/run/docker.sock";

/// Variables always injected into a runner instance.
pub const TOKEN_VAR: &str = "GITHUB_TOKEN";

/// Upstream URL overrides, forwarded only when non-empty.
pub const URL_OVERRIDE_VARS: [&str; 3] = [
    "RUNNER_ENTERPRISE_URL",
    "RUNNER_ORGANIZATION_URL",
    "RUNNER_REPOSITORY_URL",
];

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Runner image reference.
    pub image: String,

    /// Bind the host's compute-runtime socket into spawned instances.
    ///
    /// Privileged: instances can then start siblings on the host.
    pub allow_runtime_socket: bool,
    pub runtime_socket_path: PathBuf,

    /// Upper bound for each provisioner call.
    pub provision_timeout: Duration,

    /// How long Completed run records are kept.
    pub completed_retention: Duration,
    pub max_completed_records: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            allow_runtime_socket: false,
            runtime_socket_path: PathBuf::from(DEFAULT_RUNTIME_SOCKET),
            provision_timeout: Duration::from_secs(60),
            completed_retention: Duration::from_secs(60 * 60),
            max_completed_records: 10_000,
        }
    }
}

impl ControllerConfig {
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_runtime_socket(mut self, allow: bool) -> Self {
        self.allow_runtime_socket = allow;
        self
    }

    pub fn with_provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration, max_records: usize) -> Self {
        self.completed_retention = retention;
        self.max_completed_records = max_records;
        self
    }
}
