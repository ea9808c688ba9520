//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **EventValidator**: webhook の署名検証とデコード
//! - **IdentityRegistry**: runner name → instance handle の対応表
//! - **RunnerController**: job run ごとの状態機械
//! - **bootstrap**: image の取得と Registry の復元（起動時のみ）
//! - **RetentionLoop**: Completed レコードの掃除

pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod registry;
pub mod retention_loop;
pub mod status;
pub mod validator;

// 主要な型を再エクスポート
pub use self::config::ControllerConfig;
pub use self::controller::{RunnerController, Transition};
pub use self::registry::IdentityRegistry;
pub use self::retention_loop::RetentionLoop;
pub use self::status::StatusView;
pub use self::validator::{EventValidator, RawRequest};
