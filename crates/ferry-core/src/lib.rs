//! ferry-core
//!
//! Ephemeral CI runner orchestration: one fresh instance per queued job,
//! torn down when the job completes.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, events, state, errors）
//! - **ports**: 抽象化レイヤー（Provisioner, Clock, NameGenerator, EnvSource）
//! - **app**: アプリケーションロジック（validator, registry, controller, bootstrap, retention_loop）
//! - **impls**: 実装（DockerCliProvisioner, 開発用の InMemoryProvisioner）
//! - **http**: webhook / healthz / status の router
//! - **observability**: tracing subscriber の初期化

pub mod app;
pub mod domain;
pub mod http;
pub mod impls;
pub mod observability;
pub mod ports;
