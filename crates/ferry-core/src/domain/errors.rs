//! Errors - エラー型と分類
//!
//! # 伝播ポリシー
//! - Bootstrap だけが致命的（プロセス起動前に終了する）
//! - それ以外はイベント単位で閉じ込め、listener や他の run を巻き込まない

use std::time::Duration;

use thiserror::Error;

use super::ids::{InstanceHandle, RunId, RunnerName};

/// ErrorKind は運用上の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 署名不正・body 不正（破棄、状態変化なし）
    Validation,
    /// 重複・再送イベント（破棄、状態変化なし）
    Duplicate,
    /// create/start/remove の失敗（ログに残して継続）
    Provisioning,
    /// 起動時の image 取得失敗（致命的）
    Bootstrap,
}

impl ErrorKind {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Bootstrap)
    }
}

/// Why an inbound request could not become a domain event.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid signature: {0}")]
    InvalidSignature(&'static str),

    #[error("unparseable body: {0}")]
    UnparseableBody(String),

    #[error("unsupported event kind: {0}")]
    UnsupportedEventKind(String),
}

/// Errors returned by the Identity Registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("runner name '{0}' is already registered")]
    DuplicateName(RunnerName),
}

/// Errors returned by a Compute Provisioner.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provisioner call '{op}' timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("no such instance: {0}")]
    NotFound(InstanceHandle),

    #[error("provisioner command failed: {message}")]
    CommandFailed { message: String, fatal: bool },

    #[error("provisioner i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ProvisionError::CommandFailed {
            message: message.into(),
            fatal: true,
        }
    }

    /// The only interpretation the controller makes of a provisioner error.
    pub fn is_fatal(&self) -> bool {
        match self {
            ProvisionError::NotFound(_) => false,
            ProvisionError::CommandFailed { fatal, .. } => *fatal,
            ProvisionError::Timeout { .. } | ProvisionError::Io(_) => true,
        }
    }
}

/// FerryError はイベント処理と起動処理のエラー
#[derive(Debug, Error)]
pub enum FerryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("duplicate transition for run {run_id}: {reason}")]
    DuplicateTransition { run_id: RunId, reason: &'static str },

    #[error("provisioning failed for run {run_id} (runner {name}): {source}")]
    Provisioning {
        run_id: RunId,
        name: RunnerName,
        #[source]
        source: ProvisionError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("bootstrap failed for image {image}: {source}")]
    Bootstrap {
        image: String,
        #[source]
        source: ProvisionError,
    },
}

impl FerryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FerryError::Validation(_) => ErrorKind::Validation,
            FerryError::DuplicateTransition { .. } => ErrorKind::Duplicate,
            FerryError::Provisioning { .. } | FerryError::Registry(_) => ErrorKind::Provisioning,
            FerryError::Bootstrap { .. } => ErrorKind::Bootstrap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::not_found(ProvisionError::NotFound(InstanceHandle::new("h")), false)]
    #[case::soft_failure(ProvisionError::CommandFailed { message: "busy".into(), fatal: false }, false)]
    #[case::hard_failure(ProvisionError::failed("boom"), true)]
    #[case::timeout(ProvisionError::Timeout { op: "create", after: Duration::from_secs(5) }, true)]
    fn provision_error_classification(#[case] err: ProvisionError, #[case] fatal: bool) {
        assert_eq!(err.is_fatal(), fatal);
    }

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let err = ProvisionError::Timeout {
            op: "start",
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "provisioner call 'start' timed out after 250ms");
    }

    #[test]
    fn only_bootstrap_is_fatal() {
        let bootstrap = FerryError::Bootstrap {
            image: "img".to_string(),
            source: ProvisionError::failed("pull denied"),
        };
        let provisioning = FerryError::Provisioning {
            run_id: RunId::new(1),
            name: RunnerName::new("ferry-a"),
            source: ProvisionError::failed("create failed"),
        };
        let duplicate = FerryError::DuplicateTransition {
            run_id: RunId::new(1),
            reason: "already running",
        };

        assert!(bootstrap.kind().is_fatal());
        assert!(!provisioning.kind().is_fatal());
        assert!(!duplicate.kind().is_fatal());
        assert_eq!(duplicate.kind(), ErrorKind::Duplicate);
        assert!(provisioning.to_string().contains("ferry-a"));
    }
}
