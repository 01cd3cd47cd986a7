//! Top-level facade: wires the message coordinator, state validator, event
//! bus, progress tracker, resource manager, and session controller into one
//! handle with a single `start`/`stop` lifecycle, the way the teacher's CLI
//! owns every subsystem from one place instead of scattering setup across
//! callers.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ao_config::CoreConfig;
use ao_coordinator::MessageCoordinator;
use ao_events::{BrokerPublisher, EventPublisher, MemoryBroker, RedisBroker};
use ao_keyspace::{MemoryStore, RedisStore, SharedStore};
use ao_resources::{ResourceManager, WorkflowLoadBalancer, WorkflowScheduler};
use ao_session::SessionController;
use ao_tracker::WorkflowProgressTracker;
use ao_validator::StateValidator;
use ao_workflow_coordinator::WorkflowAwareCoordinator;

/// Everything §4's components (B through H) need to run together.
///
/// Built from a single [`CoreConfig`]: a Redis `redis_url` wires every
/// component onto shared Redis-backed state and pub/sub; its absence falls
/// back to in-process `MemoryStore`/`MemoryBroker`, the same way each
/// component's own tests do.
pub struct AgentOrchestrationCore {
    pub config: CoreConfig,
    pub workflows: Arc<WorkflowAwareCoordinator>,
    pub validator: Arc<StateValidator>,
    pub tracker: Arc<WorkflowProgressTracker>,
    pub resources: Arc<ResourceManager>,
    pub scheduler: Arc<WorkflowScheduler>,
    pub load_balancer: Arc<WorkflowLoadBalancer>,
    pub sessions: Arc<SessionController>,
    event_publisher: Arc<dyn EventPublisher>,
    recovery_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl AgentOrchestrationCore {
    pub async fn new(config: CoreConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn SharedStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisStore::new(url.clone()).await?),
            None => Arc::new(MemoryStore::new()),
        };

        let coordinator = MessageCoordinator::new(store, config.key_prefix.clone())
            .with_backoff(config.nack_backoff_base_ms, config.nack_backoff_cap_ms);
        let validator = Arc::new(StateValidator::new(coordinator.clone()));

        let event_publisher: Arc<dyn EventPublisher> = match &config.redis_url {
            Some(url) => Arc::new(BrokerPublisher::new(Arc::new(RedisBroker::new(url).await?))),
            None => Arc::new(BrokerPublisher::new(Arc::new(MemoryBroker::new()))),
        };

        let tracker = Arc::new(WorkflowProgressTracker::new(
            Some(event_publisher.clone()),
            config.channel_prefix.clone(),
            true,
            config.cleanup_interval_s,
            config.workflow_timeout_s,
        ));

        let scheduler = Arc::new(WorkflowScheduler::new(config.max_concurrent_workflows as usize));
        let resources = Arc::new(
            ResourceManager::new(scheduler.clone())
                .with_monitoring_interval_s(config.resource_monitoring_interval_s)
                .with_pool_capacity(ao_resources::ResourceType::ConcurrentWorkflows, config.max_concurrent_workflows as f64),
        );
        let load_balancer = Arc::new(WorkflowLoadBalancer::new());

        let workflows = Arc::new(WorkflowAwareCoordinator::new(
            coordinator,
            tracker.clone(),
            Some(event_publisher.clone()),
            config.channel_prefix.clone(),
        ));

        let sessions = Arc::new(SessionController::new());

        Ok(Self {
            config,
            workflows,
            validator,
            tracker,
            resources,
            scheduler,
            load_balancer,
            sessions,
            event_publisher,
            recovery_handle: AsyncMutex::new(None),
        })
    }

    /// Gives callers that want to publish events outside of the workflow
    /// coordinator (e.g. safety-check events) the same publisher every
    /// tracked component already shares.
    pub fn event_publisher(&self) -> Arc<dyn EventPublisher> {
        self.event_publisher.clone()
    }

    pub async fn start(&self) {
        self.tracker.start().await;
        self.resources.start().await;
        self.start_recovery_loop().await;
        info!("agent orchestration core started");
    }

    pub async fn stop(&self) {
        self.stop_recovery_loop().await;
        self.resources.stop().await;
        self.tracker.stop().await;
        info!("agent orchestration core stopped");
    }

    async fn start_recovery_loop(&self) {
        let validator = self.validator.clone();
        let interval_s = self.config.recover_poll_interval_s.max(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_s));
            loop {
                ticker.tick().await;
                let report = validator.validate_and_repair().await;
                if report.repaired > 0 || report.errors > 0 {
                    warn!(
                        "recovery pass repaired {} reservation(s), {} error(s)",
                        report.repaired, report.errors
                    );
                }
            }
        });
        *self.recovery_handle.lock().await = Some(handle);
    }

    async fn stop_recovery_loop(&self) {
        if let Some(handle) = self.recovery_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_and_runs_a_lifecycle_over_in_memory_backends() {
        let core = AgentOrchestrationCore::new(CoreConfig::default()).await.unwrap();
        core.start().await;

        let session = core.sessions.start_session(ao_session::SessionConfiguration::new("user-1", 20));
        assert_eq!(session.state, ao_session::SessionStateType::Active);

        core.stop().await;
    }
}
