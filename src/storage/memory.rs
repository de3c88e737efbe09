use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Queue;
use crate::core::{Clock, FailedJob, JobMessage, JobStatus, QueueStatus, SystemClock};
use crate::error::{QueueError, Result};
use crate::processing::WorkerKind;
use crate::serializer::JobPayload;

#[derive(Debug, Default)]
struct ChannelState {
    message_id: u64,
    messages: HashMap<u64, String>,
    /// Front is the push end, back is the pop end
    waiting: VecDeque<u64>,
    delayed: HashMap<u64, i64>,
    /// id → reservation expiry
    reserved: HashMap<u64, i64>,
    attempts: HashMap<u64, u32>,
    failed: HashMap<u64, String>,
    ready: HashMap<WorkerKind, VecDeque<u64>>,
}

/// In-memory queue
///
/// Keeps one channel's state behind a single mutex, so every operation is
/// atomic with respect to every other. Clones share the same state, which is
/// how tests model a second process attaching to the same channel.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    channel: String,
    state: Arc<Mutex<ChannelState>>,
    clock: Arc<dyn Clock>,
}

impl MemoryQueue {
    pub fn new(channel: impl Into<String>) -> Self {
        Self::with_clock(channel, Arc::new(SystemClock))
    }

    pub fn with_clock(channel: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            channel: channel.into(),
            state: Arc::new(Mutex::new(ChannelState::default())),
            clock,
        }
    }

    fn score_after(&self, delay: Duration) -> i64 {
        self.clock.timestamp() + delay.as_secs() as i64
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn push(&self, payload: &JobPayload, delay: Duration) -> Result<u64> {
        let body = payload.encode()?;
        let ready_at = self.score_after(delay);
        let mut state = self.state.lock().unwrap();

        state.message_id += 1;
        let id = state.message_id;
        state.messages.insert(id, body);
        if delay.as_secs() == 0 {
            state.waiting.push_front(id);
        } else {
            state.delayed.insert(id, ready_at);
        }
        Ok(id)
    }

    async fn pop(&self, handle_timeout: Duration) -> Result<Option<u64>> {
        let expires_at = self.score_after(handle_timeout);
        let mut state = self.state.lock().unwrap();

        let id = match state.waiting.pop_back() {
            Some(id) => id,
            None => return Ok(None),
        };
        state.reserved.insert(id, expires_at);
        *state.attempts.entry(id).or_insert(0) += 1;
        Ok(Some(id))
    }

    async fn get(&self, id: u64) -> Result<JobMessage> {
        let (attempts, raw) = {
            let state = self.state.lock().unwrap();
            let raw = state
                .messages
                .get(&id)
                .cloned()
                .ok_or_else(|| QueueError::invalid_job(id, "message body is missing"))?;
            (state.attempts.get(&id).copied().unwrap_or(0), raw)
        };

        Ok(JobMessage {
            id,
            attempts,
            payload: JobPayload::decode(id, &raw)?,
        })
    }

    async fn remove(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.reserved.remove(&id);
        state.attempts.remove(&id);
        state.failed.remove(&id);
        state.messages.remove(&id);
        Ok(())
    }

    async fn release(&self, id: u64, delay: Duration) -> Result<bool> {
        let ready_at = self.score_after(delay);
        let mut state = self.state.lock().unwrap();

        if state.reserved.remove(&id).is_none() {
            return Ok(false);
        }
        state.delayed.insert(id, ready_at);
        Ok(true)
    }

    async fn failed(&self, id: u64, diagnostic: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();

        if state.reserved.remove(&id).is_none() {
            return Ok(false);
        }
        state.failed.insert(id, diagnostic.to_string());
        Ok(true)
    }

    async fn status(&self) -> Result<QueueStatus> {
        let state = self.state.lock().unwrap();
        Ok(QueueStatus::from_counts(
            state.message_id,
            state.waiting.len() as u64,
            state.reserved.len() as u64,
            state.delayed.len() as u64,
            state.failed.len() as u64,
        ))
    }

    async fn job_status(&self, id: u64) -> Result<JobStatus> {
        let state = self.state.lock().unwrap();
        let status = if state.failed.contains_key(&id) {
            JobStatus::Failed
        } else if state.reserved.contains_key(&id) {
            JobStatus::Reserved
        } else if state.delayed.contains_key(&id) {
            JobStatus::Delayed
        } else if state.messages.contains_key(&id) {
            JobStatus::Waiting
        } else {
            JobStatus::Done
        };
        Ok(status)
    }

    async fn migrate_expired(&self) -> Result<Vec<u64>> {
        let now = self.clock.timestamp();
        let mut state = self.state.lock().unwrap();

        let mut due: Vec<(i64, u64)> = state
            .delayed
            .iter()
            .filter(|(_, ready_at)| **ready_at <= now)
            .map(|(id, ready_at)| (*ready_at, *id))
            .collect();
        due.sort_unstable();

        let ids: Vec<u64> = due.into_iter().map(|(_, id)| id).collect();
        for id in &ids {
            state.delayed.remove(id);
            state.waiting.push_front(*id);
        }
        Ok(ids)
    }

    async fn retry_reserved(&self) -> Result<Vec<u64>> {
        let now = self.clock.timestamp();
        let mut state = self.state.lock().unwrap();

        let mut ids: Vec<u64> = state.reserved.drain().map(|(id, _)| id).collect();
        ids.sort_unstable();
        for id in &ids {
            state.delayed.insert(*id, now);
        }
        state.ready.clear();
        Ok(ids)
    }

    async fn get_failed(&self) -> Result<Vec<FailedJob>> {
        let state = self.state.lock().unwrap();
        let mut failed: Vec<FailedJob> = state
            .failed
            .iter()
            .map(|(id, payload)| FailedJob {
                id: *id,
                payload: payload.clone(),
            })
            .collect();
        failed.sort_by_key(|job| job.id);
        Ok(failed)
    }

    async fn clear_failed(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failed.remove(&id).is_some() {
            state.messages.remove(&id);
            state.attempts.remove(&id);
        }
        Ok(())
    }

    async fn reload_failed(&self, id: u64, delay: Duration) -> Result<bool> {
        let ready_at = self.score_after(delay);
        let mut state = self.state.lock().unwrap();

        if state.failed.remove(&id).is_none() {
            return Ok(false);
        }
        state.delayed.insert(id, ready_at);
        Ok(true)
    }

    async fn clear(&self) -> Result<()> {
        *self.state.lock().unwrap() = ChannelState::default();
        Ok(())
    }

    async fn push_ready(&self, id: u64, kind: WorkerKind) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ready.entry(kind).or_default().push_front(id);
        Ok(())
    }

    async fn return_ready(&self, id: u64, kind: WorkerKind) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ready.entry(kind).or_default().push_back(id);
        Ok(())
    }

    async fn pop_ready(&self, kind: WorkerKind) -> Result<Option<u64>> {
        let mut state = self.state.lock().unwrap();
        Ok(state.ready.get_mut(&kind).and_then(|list| list.pop_back()))
    }

    async fn ready_len(&self, kind: WorkerKind) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state.ready.get(&kind).map_or(0, |list| list.len() as u64))
    }
}
