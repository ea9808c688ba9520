//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **DockerCliProvisioner**: docker CLI を呼ぶ本番用の Provisioner
//! - **InMemoryProvisioner**: 呼び出しを記録する開発・テスト用の Provisioner

pub mod docker;
pub mod inmem_provisioner;

// 主要な型を再エクスポート
pub use self::docker::DockerCliProvisioner;
pub use self::inmem_provisioner::{InMemoryProvisioner, ProvisionCall};
