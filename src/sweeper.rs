// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 后台清扫
//!
//! 在 tokio 运行时中按固定间隔清扫各缓存的空闲条目。

use log::{debug, info};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use std::{sync::Arc, time::Duration};

use crate::cache::DocumentCache;

/// 可被后台清扫的缓存
pub trait Sweep: Send + Sync {
    fn name(&self) -> &str;
    /// 删除空闲超过 `idle_ttl` 的条目，返回删除的数量
    fn sweep_idle(&self, idle_ttl: Duration) -> usize;
}

impl<T: Clone + Send> Sweep for DocumentCache<T> {
    fn name(&self) -> &str {
        DocumentCache::name(self)
    }

    fn sweep_idle(&self, idle_ttl: Duration) -> usize {
        self.sweep(idle_ttl)
    }
}

pub struct CacheSweeper {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CacheSweeper {
    /// 启动清扫任务，必须在 tokio 运行时中调用。首次清扫发生在一个间隔之后。
    pub fn spawn(targets: Vec<Arc<dyn Sweep>>, interval: Duration, idle_ttl: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        // 间隔为 0 时 tokio 会 panic
        let interval = interval.max(Duration::from_millis(1));
        info!(
            "缓存清扫任务启动，间隔{}ms，空闲阈值{}s",
            interval.as_millis(),
            idle_ttl.as_secs()
        );
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        for target in &targets {
                            let removed = target.sweep_idle(idle_ttl);
                            if removed > 0 {
                                info!("{}：清扫移除{}个空闲条目", target.name(), removed);
                            } else {
                                debug!("{}：没有空闲条目", target.name());
                            }
                        }
                    }
                }
            }
            info!("缓存清扫任务已停止");
        });
        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// 通知任务退出并等待其结束
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}
