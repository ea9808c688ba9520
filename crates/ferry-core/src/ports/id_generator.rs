//! NameGenerator port - runner 名の生成
//!
//! Registry は「生きている name を上書きしない」ことを前提にしているので、
//! name の一意性はこの port の責務です。
//!
//! # 実装
//! - **UlidNameGenerator**: ULID ベース（本番用）
//!   - 時刻 48bit + 暗号学的に強い乱数 80bit
//!   - 同一ミリ秒に大量生成しても衝突は実質起きない

use crate::domain::RunnerName;
use crate::ports::Clock;
use rand::RngCore;
use rand::rngs::OsRng;
use ulid::Ulid;

/// Prefix of every generated runner name.
pub const RUNNER_NAME_PREFIX: &str = "ferry-";

/// NameGenerator は runner 名を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数のイベントハンドラから同時に呼ばれる）
pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> RunnerName;
}

/// UlidNameGenerator は ULID ベースの name 生成器
///
/// Clock を使うので、テストでは FixedClock を渡して timestamp 部分を固定できる。
pub struct UlidNameGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidNameGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> NameGenerator for UlidNameGenerator<C> {
    fn generate(&self) -> RunnerName {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let random = u128::from_be_bytes(bytes);
        let ulid = Ulid::from_parts(timestamp_ms, random);
        // hostname に使うので小文字にしておく
        RunnerName::new(format!(
            "{RUNNER_NAME_PREFIX}{}",
            ulid.to_string().to_ascii_lowercase()
        ))
    }
}
