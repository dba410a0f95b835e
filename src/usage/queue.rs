use tokio::sync::mpsc;

use super::UsageLogEntry;

/// 队列内的投递单元：条目 + 已重投次数
#[derive(Debug, Clone)]
pub struct Delivery {
    pub entry: UsageLogEntry,
    pub attempts: u32,
}

/// 进程内用量队列的生产者端。入队不阻塞请求路径；队列关闭时记日志后丢弃
/// （响应永远不因记账失败而失败）。
#[derive(Clone)]
pub struct UsageQueue {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl UsageQueue {
    pub fn channel() -> (UsageQueue, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (UsageQueue { tx }, rx)
    }

    pub fn enqueue(&self, entry: UsageLogEntry) {
        self.push(Delivery { entry, attempts: 0 });
    }

    /// 消费者 nack 后的重投入口
    pub(crate) fn push(&self, delivery: Delivery) {
        if let Err(e) = self.tx.send(delivery) {
            tracing::error!(
                request_id = %e.0.entry.request_id,
                "usage queue closed, dropping entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::NormalizedUsage;
    use crate::usage::create_usage_log;

    fn entry(id: &str) -> UsageLogEntry {
        create_usage_log(
            id,
            Some(1),
            None,
            "test",
            "test/test-fast",
            NormalizedUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
                cached_tokens: 0,
            },
            false,
        )
    }

    #[tokio::test]
    async fn enqueue_delivers_to_consumer_side() {
        let (queue, mut rx) = UsageQueue::channel();
        queue.enqueue(entry("chatcmpl-1"));
        let delivery = rx.recv().await.expect("delivery");
        assert_eq!(delivery.entry.request_id, "chatcmpl-1");
        assert_eq!(delivery.attempts, 0);
    }

    #[tokio::test]
    async fn enqueue_on_closed_queue_is_log_and_drop() {
        let (queue, rx) = UsageQueue::channel();
        drop(rx);
        // 不应 panic，也不应阻塞
        queue.enqueue(entry("chatcmpl-2"));
    }
}
