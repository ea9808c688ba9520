//! Bootstrap - イベント受付前に一度だけ実行する処理
//!
//! - `ensure_image`: runner image をローカルに用意する。失敗は致命的（Fail-fast）
//! - `recover_registry`: 再起動前に作ったインスタンスを label から探し、
//!   Registry を作り直す。失敗してもログだけ残して続行する

use tracing::{error, info, warn};

use super::registry::IdentityRegistry;
use crate::domain::FerryError;
use crate::ports::Provisioner;

pub async fn ensure_image(provisioner: &dyn Provisioner, image: &str) -> Result<(), FerryError> {
    info!(image, "pulling runner image");
    provisioner.pull_image(image).await.map_err(|source| {
        error!(image, error = %source, "could not pull runner image");
        FerryError::Bootstrap {
            image: image.to_string(),
            source,
        }
    })?;
    info!(image, "runner image ready");
    Ok(())
}

/// Returns the number of instances re-registered.
pub async fn recover_registry(provisioner: &dyn Provisioner, registry: &IdentityRegistry) -> usize {
    let managed = match provisioner.list_managed().await {
        Ok(managed) => managed,
        Err(e) => {
            warn!(error = %e, "could not list existing runners, starting with an empty registry");
            return 0;
        }
    };

    let mut recovered = 0;
    for instance in managed {
        match registry.put(instance.name.clone(), instance.handle.clone()) {
            Ok(()) => {
                info!(runner = %instance.name, handle = %instance.handle, "recovered runner");
                recovered += 1;
            }
            Err(e) => warn!(runner = %instance.name, handle = %instance.handle, error = %e, "skipping recovered runner"),
        }
    }
    recovered
}
