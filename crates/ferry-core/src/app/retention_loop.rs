//! RetentionLoop - Completed レコードの掃除
//!
//! # フロー
//! 1. `completed_retention / 4` ごとに起きる（最短 1 秒）
//! 2. `RunnerController::purge_expired()` を呼ぶ
//! 3. shutdown の通知で止まる

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};

use super::controller::RunnerController;

pub struct RetentionLoop {
    controller: Arc<RunnerController>,
    period: Duration,
    shutdown: Arc<Notify>,
}

impl RetentionLoop {
    pub fn new(controller: Arc<RunnerController>, shutdown: Arc<Notify>) -> Self {
        let period = (controller.config().completed_retention / 4).max(Duration::from_secs(1));
        Self {
            controller,
            period,
            shutdown,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.period);
        // 最初の tick は即座に返るので読み捨てる
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("retention loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let purged = self.controller.purge_expired();
                    debug!(purged, tracked = self.controller.tracked_runs(), "retention sweep");
                }
            }
        }
    }
}
