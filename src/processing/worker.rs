//! Worker configuration
//!
//! One section per strategy. A strategy that is not `enabled` is never
//! constructed by the director.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backlog-driven sizing for a group of worker processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticConfig {
    /// Resize on every rebalance tick when set, otherwise keep the fixed count
    pub enabled: bool,
    pub min_workers: usize,
    pub max_workers: usize,
    /// Ready ids one worker is expected to absorb
    pub capacity_per_worker: usize,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_workers: 4,
            max_workers: 50,
            capacity_per_worker: 5,
        }
    }
}

impl ElasticConfig {
    pub fn new(min_workers: usize, max_workers: usize, capacity_per_worker: usize) -> Self {
        Self {
            enabled: true,
            min_workers,
            max_workers,
            capacity_per_worker,
        }
    }

    /// Worker count for an observed ready-queue depth.
    ///
    /// ```rust
    /// use aint_queue::processing::ElasticConfig;
    ///
    /// let elastic = ElasticConfig::new(2, 10, 5);
    /// assert_eq!(elastic.desired(37), 8);
    /// assert_eq!(elastic.desired(0), 2);
    /// assert_eq!(elastic.desired(1000), 10);
    /// ```
    pub fn desired(&self, depth: u64) -> usize {
        let capacity = self.capacity_per_worker.max(1) as u64;
        let wanted = depth.div_ceil(capacity) as usize;
        let max = self.max_workers.max(self.min_workers);
        wanted.clamp(self.min_workers, max)
    }
}

/// One OS process per job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessWorkerConfig {
    pub enabled: bool,
    /// Supervised runners taking ids from the ready list
    pub worker_number: usize,
    /// Kill a job subprocess that runs longer than this unless the job sets its own TTR
    pub max_execute: Duration,
    pub elastic: ElasticConfig,
}

impl Default for ProcessWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_number: 1,
            max_execute: Duration::from_secs(60),
            elastic: ElasticConfig::default(),
        }
    }
}

impl ProcessWorkerConfig {
    pub fn worker_number(mut self, worker_number: usize) -> Self {
        self.worker_number = worker_number;
        self
    }

    pub fn max_execute(mut self, max_execute: Duration) -> Self {
        self.max_execute = max_execute;
        self
    }

    pub fn elastic(mut self, elastic: ElasticConfig) -> Self {
        self.elastic = elastic;
        self
    }
}

/// Long-lived processes running jobs in-process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessPoolConfig {
    pub enabled: bool,
    pub worker_number: usize,
    /// Resident memory at which a worker drains and gets replaced
    pub memory_limit_mb: u64,
    pub elastic: ElasticConfig,
}

impl Default for ProcessPoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_number: 4,
            memory_limit_mb: 512,
            elastic: ElasticConfig::default(),
        }
    }
}

impl ProcessPoolConfig {
    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    pub fn worker_number(mut self, worker_number: usize) -> Self {
        self.worker_number = worker_number;
        self
    }

    pub fn memory_limit_mb(mut self, memory_limit_mb: u64) -> Self {
        self.memory_limit_mb = memory_limit_mb;
        self
    }

    pub fn elastic(mut self, elastic: ElasticConfig) -> Self {
        self.elastic = elastic;
        self
    }
}

/// One process running many jobs as tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoroutineWorkerConfig {
    pub enabled: bool,
    pub max_coroutines: usize,
    pub memory_limit_mb: u64,
    /// Release delay for ids that arrive while every task slot is taken
    pub cooldown: Duration,
}

impl Default for CoroutineWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_coroutines: 4096,
            memory_limit_mb: 96,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CoroutineWorkerConfig {
    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    pub fn max_coroutines(mut self, max_coroutines: usize) -> Self {
        self.max_coroutines = max_coroutines;
        self
    }

    pub fn memory_limit_mb(mut self, memory_limit_mb: u64) -> Self {
        self.memory_limit_mb = memory_limit_mb;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Settings shared by every worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub process: ProcessWorkerConfig,
    pub process_pool: ProcessPoolConfig,
    pub coroutine: CoroutineWorkerConfig,
    /// Sleep between empty ready-list polls
    pub poll_interval: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop
    pub stop_timeout: Duration,
    /// Elastic sizing tick
    pub rebalance_interval: Duration,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            process: ProcessWorkerConfig::default(),
            process_pool: ProcessPoolConfig::default(),
            coroutine: CoroutineWorkerConfig::default(),
            poll_interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(10),
            rebalance_interval: Duration::from_secs(300),
        }
    }
}

impl WorkersConfig {
    pub fn process(mut self, process: ProcessWorkerConfig) -> Self {
        self.process = process;
        self
    }

    pub fn process_pool(mut self, process_pool: ProcessPoolConfig) -> Self {
        self.process_pool = process_pool;
        self
    }

    pub fn coroutine(mut self, coroutine: CoroutineWorkerConfig) -> Self {
        self.coroutine = coroutine;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elastic_desired_count() {
        let elastic = ElasticConfig::new(2, 10, 5);

        assert_eq!(elastic.desired(37), 8);
        assert_eq!(elastic.desired(5), 2);
        assert_eq!(elastic.desired(11), 3);
        assert_eq!(elastic.desired(51), 10);
    }

    #[test]
    fn test_zero_capacity_does_not_divide_by_zero() {
        let elastic = ElasticConfig {
            capacity_per_worker: 0,
            ..ElasticConfig::new(1, 3, 0)
        };
        assert_eq!(elastic.desired(2), 2);
    }

    #[test]
    fn test_only_process_strategy_enabled_by_default() {
        let config = WorkersConfig::default();
        assert!(config.process.enabled);
        assert!(!config.process_pool.enabled);
        assert!(!config.coroutine.enabled);
        assert_eq!(config.coroutine.max_coroutines, 4096);
        assert_eq!(config.coroutine.memory_limit_mb, 96);
    }
}
