use crate::processing::WorkerKind;

/// Store keys for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelKeys {
    pub message_id: String,
    pub messages: String,
    pub waiting: String,
    pub delayed: String,
    pub reserved: String,
    pub attempts: String,
    pub failed: String,
    base: String,
}

impl ChannelKeys {
    pub fn new(prefix: &str, channel: &str) -> Self {
        let base = format!("{}{}", prefix, channel);
        Self {
            message_id: format!("{}:message_id", base),
            messages: format!("{}:messages", base),
            waiting: format!("{}:waiting", base),
            delayed: format!("{}:delayed", base),
            reserved: format!("{}:reserved", base),
            attempts: format!("{}:attempts", base),
            failed: format!("{}:failed", base),
            base,
        }
    }

    /// Hand-off list feeding the workers of one strategy.
    pub fn ready(&self, kind: WorkerKind) -> String {
        format!("{}:ready:{}", self.base, kind.as_str())
    }

    pub fn ready_lists(&self) -> Vec<String> {
        WorkerKind::ALL.iter().map(|kind| self.ready(*kind)).collect()
    }

    /// Every key owned by the channel.
    pub fn all(&self) -> Vec<String> {
        let mut keys = vec![
            self.message_id.clone(),
            self.messages.clone(),
            self.waiting.clone(),
            self.delayed.clone(),
            self.reserved.clone(),
            self.attempts.clone(),
            self.failed.clone(),
        ];
        keys.extend(self.ready_lists());
        keys
    }
}
