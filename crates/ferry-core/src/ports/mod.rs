//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 外部の compute runtime、時刻、環境変数、name 生成を trait の裏に隠し、
//! Controller のロジックを差し替え可能な実装からテストできるようにします。

pub mod clock;
pub mod env_source;
pub mod id_generator;
pub mod provisioner;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use self::env_source::{EnvSource, ProcessEnv, StaticEnv};
pub use self::id_generator::{NameGenerator, RUNNER_NAME_PREFIX, UlidNameGenerator};
pub use self::provisioner::{InstanceSpec, ManagedInstance, Provisioner};
