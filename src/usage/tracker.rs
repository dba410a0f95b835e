use super::{NormalizedUsage, estimate_tokens_from_chars};

/// 单条流的用量观测器：累计下发字符数，并锁存上游真实 usage
///
/// 流正常收尾时上游通常会在最后一个 tick 带 usage；客户端中途断开或上游
/// 静默时退回到字符估算。
#[derive(Debug, Default)]
pub struct StreamTracker {
    sent_chars: usize,
    has_received_usage: bool,
    actual_usage: Option<NormalizedUsage>,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_content(&mut self, content: &str) {
        self.sent_chars += content.chars().count();
    }

    /// 幂等锁存：保留最后一次观测到的真实 usage
    pub fn record_actual_usage(&mut self, usage: NormalizedUsage) {
        self.actual_usage = Some(usage);
        self.has_received_usage = true;
    }

    pub fn has_received_usage(&self) -> bool {
        self.has_received_usage
    }

    pub fn sent_chars(&self) -> usize {
        self.sent_chars
    }

    /// 构建最终用量：优先真实值，否则用 prompt 估算 + 已发送字符估算 completion
    pub fn build_usage(&self, prompt_tokens: u32, cached_tokens: u32) -> NormalizedUsage {
        if let Some(actual) = self.actual_usage {
            return actual;
        }
        let completion_tokens = estimate_tokens_from_chars(self.sent_chars);
        NormalizedUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cached_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_from_sent_chars_when_no_actual_usage() {
        let mut tracker = StreamTracker::new();
        tracker.track_content(&"a".repeat(10));
        tracker.track_content(&"b".repeat(20));
        tracker.track_content(&"c".repeat(30));
        let usage = tracker.build_usage(100, 0);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.total_tokens, 130);
        assert!(!tracker.has_received_usage());
    }

    #[test]
    fn empty_stream_still_bills_one_completion_token() {
        let tracker = StreamTracker::new();
        let usage = tracker.build_usage(5, 0);
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total_tokens, 6);
    }

    #[test]
    fn actual_usage_latch_wins_over_estimate() {
        let mut tracker = StreamTracker::new();
        tracker.track_content("irrelevant");
        let actual = NormalizedUsage {
            prompt_tokens: 11,
            completion_tokens: 22,
            total_tokens: 33,
            cached_tokens: 4,
        };
        tracker.record_actual_usage(actual);
        assert!(tracker.has_received_usage());
        assert_eq!(tracker.build_usage(999, 0), actual);
    }

    #[test]
    fn latch_keeps_last_observed_usage() {
        let mut tracker = StreamTracker::new();
        tracker.record_actual_usage(NormalizedUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            cached_tokens: 0,
        });
        let last = NormalizedUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cached_tokens: 2,
        };
        tracker.record_actual_usage(last);
        assert_eq!(tracker.build_usage(0, 0), last);
    }
}
