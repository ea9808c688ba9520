//! Domain identifiers (strongly-typed IDs).
//!
//! # 識別子の種類
//! - **RunId**: 上流（webhook 送信元）が払い出す job run の ID。同じ job の全イベントで不変
//! - **RunnerName**: ローカルで生成する runner の名前（インスタンスの hostname として自己申告される）
//! - **InstanceHandle**: Provisioner が返すインスタンスのハンドル（削除に使う）
//!
//! ## Phantom Type パターン
//! `RunnerName` と `InstanceHandle` はどちらも中身は文字列ですが、
//! `Token<T>` の `T` をマーカー型にすることで混同をコンパイル時に防ぎます。
//! completion イベントは name で届き、削除には handle が必要なので、
//! この二つを取り違えないことが Registry の前提になります。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Identifier of a job run, as supplied by the upstream event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl RunId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RunId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// TokenMarker は文字列 ID 型のマーカー trait
pub trait TokenMarker: Send + Sync + 'static {
    /// ログやエラーで使う種類名（例: "runner", "instance"）
    fn kind() -> &'static str;
}

/// ジェネリックな文字列 ID 型
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token<T: TokenMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: TokenMarker> Token<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

// derive だと T にも bound が付いてしまうので手書きする
impl<T: TokenMarker> Clone for Token<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T: TokenMarker> PartialEq for Token<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: TokenMarker> Eq for Token<T> {}

impl<T: TokenMarker> std::hash::Hash for Token<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: TokenMarker> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", T::kind(), self.value)
    }
}

impl<T: TokenMarker> fmt::Display for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: TokenMarker> From<&str> for Token<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: TokenMarker> From<String> for Token<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Runner のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runner {}

impl TokenMarker for Runner {
    fn kind() -> &'static str {
        "runner"
    }
}

/// Instance のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instance {}

impl TokenMarker for Instance {
    fn kind() -> &'static str {
        "instance"
    }
}

/// Self-reported name of a spawned runner (its hostname).
pub type RunnerName = Token<Runner>;

/// Provisioner-side handle of a live compute instance.
pub type InstanceHandle = Token<Instance>;
