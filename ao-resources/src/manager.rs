use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scheduler::{SchedulerStatistics, WorkflowScheduler};
use crate::types::{ResourceAllocation, ResourcePool, ResourceType, WorkflowResourceRequest};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceManagerStatistics {
    pub pools: Vec<ResourcePool>,
    pub active_allocations: usize,
    pub pending_requests: usize,
    pub scheduler: SchedulerStatistics,
}

const UTILIZATION_WARNING_THRESHOLD: f64 = 0.9;
const DEFAULT_MONITORING_INTERVAL_S: u64 = 30;
const DEFAULT_STALE_ALLOCATION_THRESHOLD_S: i64 = 3600;

fn now_us() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_micros() as i64
}

struct PendingRequest {
    request: WorkflowResourceRequest,
    notify: oneshot::Sender<ResourceAllocation>,
}

/// Tracks per-type resource pools and arbitrates allocation against queued
/// workflow requests via an injected [`WorkflowScheduler`]. Resource checks
/// and mutation happen under a short-lived per-pool lock; nothing awaits
/// while holding one.
pub struct ResourceManager {
    pools: DashMap<ResourceType, Mutex<ResourcePool>>,
    allocations: DashMap<String, ResourceAllocation>,
    pending: DashMap<String, PendingRequest>,
    scheduler: Arc<WorkflowScheduler>,
    monitoring_interval_s: u64,
    stale_allocation_threshold_s: i64,
    running: Arc<AtomicBool>,
    scheduling_handle: AsyncMutex<Option<JoinHandle<()>>>,
    monitoring_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl ResourceManager {
    pub fn new(scheduler: Arc<WorkflowScheduler>) -> Self {
        let pools = DashMap::new();
        for resource_type in ResourceType::ALL {
            pools.insert(resource_type, Mutex::new(ResourcePool::new(resource_type, resource_type.default_capacity())));
        }
        Self {
            pools,
            allocations: DashMap::new(),
            pending: DashMap::new(),
            scheduler,
            monitoring_interval_s: DEFAULT_MONITORING_INTERVAL_S,
            stale_allocation_threshold_s: DEFAULT_STALE_ALLOCATION_THRESHOLD_S,
            running: Arc::new(AtomicBool::new(false)),
            scheduling_handle: AsyncMutex::new(None),
            monitoring_handle: AsyncMutex::new(None),
        }
    }

    pub fn with_pool_capacity(self, resource_type: ResourceType, total: f64) -> Self {
        self.pools.insert(resource_type, Mutex::new(ResourcePool::new(resource_type, total)));
        self
    }

    pub fn with_monitoring_interval_s(mut self, monitoring_interval_s: u64) -> Self {
        self.monitoring_interval_s = monitoring_interval_s;
        self
    }

    pub fn with_stale_allocation_threshold_s(mut self, stale_allocation_threshold_s: i64) -> Self {
        self.stale_allocation_threshold_s = stale_allocation_threshold_s;
        self
    }

    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduling = self.clone();
        let scheduling_handle = tokio::spawn(async move { scheduling.scheduling_loop().await });
        *self.scheduling_handle.lock().await = Some(scheduling_handle);

        let monitoring = self.clone();
        let monitoring_handle = tokio::spawn(async move { monitoring.monitoring_loop().await });
        *self.monitoring_handle.lock().await = Some(monitoring_handle);

        info!("resource manager started");
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for handle in [self.scheduling_handle.lock().await.take(), self.monitoring_handle.lock().await.take()] {
            if let Some(handle) = handle {
                handle.abort();
                let _ = handle.await;
            }
        }
        info!("resource manager stopped");
    }

    /// Allocates immediately if capacity allows; otherwise queues the
    /// request at its priority and waits for the scheduling loop to grant
    /// it once resources free up. Missing resource requirements are filled
    /// with defaults first, so every admitted workflow consumes its share
    /// of `concurrent_workflows` even if the caller never asked for it.
    pub async fn request_workflow_resources(&self, mut request: WorkflowResourceRequest) -> ResourceAllocation {
        request.fill_defaults();

        if let Some(allocation) = self.try_allocate(&request) {
            self.scheduler.start_workflow(request.workflow_id.clone());
            return allocation;
        }

        if self.scheduler.is_running(&request.workflow_id) {
            if let Some(allocation) = self.get_allocation(&request.workflow_id) {
                return allocation;
            }
        }

        let (tx, rx) = oneshot::channel();
        let workflow_id = request.workflow_id.clone();
        let priority = request.priority;
        self.scheduler.enqueue_workflow(workflow_id.clone(), priority);
        self.pending.insert(workflow_id, PendingRequest { request, notify: tx });

        rx.await.expect("resource manager dropped without granting allocation")
    }

    pub fn release_workflow_resources(&self, workflow_id: &str) -> bool {
        let Some((_, allocation)) = self.allocations.remove(workflow_id) else {
            return false;
        };
        for (resource_type, amount) in &allocation.allocated {
            if let Some(pool) = self.pools.get(resource_type) {
                let mut pool = pool.lock();
                pool.available = (pool.available + amount).min(pool.total);
            }
        }
        self.scheduler.complete_workflow(workflow_id, true);
        debug!("released resources for workflow {}", workflow_id);
        true
    }

    pub fn get_allocation(&self, workflow_id: &str) -> Option<ResourceAllocation> {
        self.allocations.get(workflow_id).map(|e| e.value().clone())
    }

    pub fn pool_snapshot(&self) -> Vec<ResourcePool> {
        self.pools.iter().map(|e| e.value().lock().clone()).collect()
    }

    pub fn get_statistics(&self) -> ResourceManagerStatistics {
        ResourceManagerStatistics {
            pools: self.pool_snapshot(),
            active_allocations: self.allocations.len(),
            pending_requests: self.pending.len(),
            scheduler: self.scheduler.get_statistics(),
        }
    }

    fn can_allocate_resources(&self, request: &WorkflowResourceRequest) -> bool {
        request.requirements.iter().all(|(resource_type, amount)| {
            self.pools
                .get(resource_type)
                .map(|pool| pool.lock().available >= *amount)
                .unwrap_or(false)
        })
    }

    fn try_allocate(&self, request: &WorkflowResourceRequest) -> Option<ResourceAllocation> {
        if !self.can_allocate_resources(request) {
            return None;
        }
        for (resource_type, amount) in &request.requirements {
            if let Some(pool) = self.pools.get(resource_type) {
                pool.lock().available -= amount;
            }
        }

        let now = now_us();
        let allocation = ResourceAllocation {
            workflow_id: request.workflow_id.clone(),
            allocated: request.requirements.clone(),
            allocated_at_us: now,
            expires_at_us: request.estimated_duration_s.map(|s| now + (s as i64) * 1_000_000),
        };
        self.allocations.insert(request.workflow_id.clone(), allocation.clone());
        info!("allocated resources for workflow {}", request.workflow_id);
        Some(allocation)
    }

    async fn scheduling_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        while self.running.load(Ordering::Relaxed) {
            interval.tick().await;
            let Some(workflow_id) = self.scheduler.get_next_workflow() else {
                continue;
            };

            let Some((_, pending)) = self.pending.remove(&workflow_id) else {
                continue;
            };

            match self.try_allocate(&pending.request) {
                Some(allocation) => {
                    self.scheduler.start_workflow(workflow_id);
                    let _ = pending.notify.send(allocation);
                }
                None => {
                    let priority = pending.request.priority;
                    self.pending.insert(workflow_id.clone(), pending);
                    self.scheduler.enqueue_workflow(workflow_id, priority);
                }
            }
        }
    }

    async fn monitoring_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.monitoring_interval_s));
        while self.running.load(Ordering::Relaxed) {
            interval.tick().await;
            for pool in self.pools.iter() {
                let pool = pool.value().lock();
                if pool.utilization() > UTILIZATION_WARNING_THRESHOLD {
                    warn!("resource pool {:?} at {:.1}% utilization", pool.resource_type, pool.utilization() * 100.0);
                }
            }
            self.cleanup_stale_allocations();
        }
    }

    fn cleanup_stale_allocations(&self) {
        let now = now_us();
        let stale_threshold_us = self.stale_allocation_threshold_s * 1_000_000;
        let stale_ids: Vec<String> = self
            .allocations
            .iter()
            .filter(|e| {
                let allocation = e.value();
                match allocation.expires_at_us {
                    Some(expires_at) => now > expires_at,
                    None => now - allocation.allocated_at_us > stale_threshold_us,
                }
            })
            .map(|e| e.key().clone())
            .collect();

        for workflow_id in stale_ids {
            warn!("releasing stale resource allocation for workflow {}", workflow_id);
            self.release_workflow_resources(&workflow_id);
        }
    }
}
