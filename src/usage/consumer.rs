use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::UsageLogEntry;
use super::queue::{Delivery, UsageQueue};
use crate::authority::AuthorityClient;
use crate::config::SettlementSettings;

/// 结算消费者：按「满批或到点」把用量条目打包 POST 给 authority。
///
/// at-least-once 语义：2xx 整批 ack；任何失败整批 nack 重投，超过重投上限
/// 的条目记错误日志后丢弃（防止毒条目堵死队列）。
pub struct SettlementConsumer {
    rx: mpsc::UnboundedReceiver<Delivery>,
    retry_queue: UsageQueue,
    authority: Arc<AuthorityClient>,
    batch_size: usize,
    flush_interval: Duration,
    max_redeliveries: u32,
}

impl SettlementConsumer {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Delivery>,
        retry_queue: UsageQueue,
        authority: Arc<AuthorityClient>,
        settings: &SettlementSettings,
    ) -> Self {
        Self {
            rx,
            retry_queue,
            authority,
            batch_size: settings.batch_size.max(1),
            flush_interval: Duration::from_secs(settings.flush_interval_secs.max(1)),
            max_redeliveries: settings.max_redeliveries,
        }
    }

    pub async fn run(mut self) {
        let mut batch: Vec<Delivery> = Vec::new();
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval 的首个 tick 立即到期，先吞掉
        ticker.tick().await;

        loop {
            tokio::select! {
                received = self.rx.recv() => {
                    match received {
                        Some(delivery) => {
                            batch.push(delivery);
                            if batch.len() >= self.batch_size {
                                self.flush(&mut batch).await;
                                ticker.reset();
                            }
                        }
                        // 所有生产者关闭：冲掉残批后退出
                        None => {
                            self.flush(&mut batch).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut batch).await;
                }
            }
        }
    }

    async fn flush(&self, batch: &mut Vec<Delivery>) {
        if batch.is_empty() {
            return;
        }

        let entries: Vec<UsageLogEntry> = batch.iter().map(|d| d.entry.clone()).collect();
        match self.authority.settle_usage(&entries).await {
            Ok(processed) => {
                tracing::info!(
                    batch = entries.len(),
                    processed,
                    "usage batch settled"
                );
                batch.clear();
            }
            Err(e) => {
                tracing::warn!(
                    batch = entries.len(),
                    "settlement failed, requeueing batch: {}",
                    e
                );
                for mut delivery in batch.drain(..) {
                    delivery.attempts += 1;
                    if delivery.attempts > self.max_redeliveries {
                        tracing::error!(
                            request_id = %delivery.entry.request_id,
                            attempts = delivery.attempts,
                            "usage entry dropped after exhausting redeliveries"
                        );
                    } else {
                        self.retry_queue.push(delivery);
                    }
                }
            }
        }
    }
}
