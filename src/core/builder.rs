use std::sync::Arc;

use crate::{
    config::{PoolConfig, WorkerConfig},
    events::Bus,
    log::{LogSink, NoopLog},
    subscribers::{Subscribe, SubscriberSet},
};

use super::pool::WorkerSupervisorPool;

/// Builder for constructing a [`WorkerSupervisorPool`] with optional features.
pub struct PoolBuilder {
    cfg: PoolConfig,
    worker_config: Arc<WorkerConfig>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    log: Arc<dyn LogSink>,
}

impl PoolBuilder {
    /// Creates a new builder with the given configurations.
    pub fn new(cfg: PoolConfig, worker_config: Arc<WorkerConfig>) -> Self {
        Self {
            cfg,
            worker_config,
            subscribers: Vec::new(),
            log: Arc::new(NoopLog),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive pool and supervisor events (slot bookkeeping, state
    /// changes, failures) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Sets the logger shared by the pool and all of its supervisors.
    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    /// Builds the pool.
    ///
    /// Spawns the subscriber workers, so it must be called from within a tokio runtime.
    pub fn build(self) -> WorkerSupervisorPool {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers));
        WorkerSupervisorPool::new_internal(self.cfg, self.worker_config, bus, subs, self.log)
    }
}
