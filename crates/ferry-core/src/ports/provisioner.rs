//! Provisioner port - compute instance の作成・起動・削除
//!
//! Controller は provisioner 固有のエラーコードを解釈しない。
//! 見るのは `ProvisionError::is_fatal()` の分類だけ。

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::{InstanceHandle, ProvisionError, RunnerName};

/// Everything a provisioner needs to create one runner instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub image: String,
    /// Used both as the instance's hostname and as its tracking label.
    pub name: RunnerName,
    pub env: BTreeMap<String, String>,
    /// Host compute-runtime socket to bind into the instance (privileged).
    pub runtime_socket: Option<PathBuf>,
}

/// An instance found by `list_managed`, used to rebuild the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedInstance {
    pub name: RunnerName,
    pub handle: InstanceHandle,
}

/// Provisioner is the narrow interface to the compute runtime.
///
/// `remove` on an unknown or already-removed handle returns
/// `ProvisionError::NotFound`, which callers tolerate.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create(&self, spec: &InstanceSpec) -> Result<InstanceHandle, ProvisionError>;

    async fn start(&self, handle: &InstanceHandle) -> Result<(), ProvisionError>;

    async fn remove(&self, handle: &InstanceHandle) -> Result<(), ProvisionError>;

    /// Make sure `image` is available locally.
    async fn pull_image(&self, image: &str) -> Result<(), ProvisionError>;

    /// Instances carrying this service's tracking label.
    async fn list_managed(&self) -> Result<Vec<ManagedInstance>, ProvisionError>;
}
