//! State Validator / Recovery: finds reservations left behind by a crashed
//! consumer and puts them back into circulation.
//!
//! Three passes, each a wider net than the last, mirroring the layered
//! recovery strategy of the Python original this was distilled from:
//!
//! 1. **Coordinator-driven** — [`ao_coordinator::MessageCoordinator::recover_pending`]
//!    walks every `reserved_deadlines:*` set and requeues anything past its
//!    visibility deadline. This is the common case and handles it cheaply.
//! 2. **Scan-union** — some crashes can leave a `reserved:*` hash entry with
//!    no corresponding `reserved_deadlines` member at all (the writer died
//!    between the two writes in `receive`). This pass unions the instance
//!    names visible through both glob patterns and requeues any reservation
//!    whose token has no deadline entry.
//! 3. **Raw-bytes brute force** — a last-resort sweep of every remaining
//!    `reserved:*` hash field whose deadline is missing or already due.
//!    A field with a deadline still in the future is a live, in-window
//!    reservation and is left alone. Anything in scope is requeued;
//!    anything that fails to decode is quarantined and counted as an error
//!    rather than retried forever.
//!
//! No pass ever propagates an error to the caller: failures are logged and
//! counted, matching the source system's "best effort" recovery contract.

use std::collections::HashSet;

use ao_coordinator::{now_us, MessageCoordinator};
use ao_keyspace::Keys;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

const AGENT_TYPES: [&str; 3] = ["input_processor", "world_builder", "narrative_generator"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub repaired: u64,
    pub errors: u64,
}

pub struct StateValidator {
    coordinator: MessageCoordinator,
}

impl StateValidator {
    pub fn new(coordinator: MessageCoordinator) -> Self {
        Self { coordinator }
    }

    pub async fn validate_and_repair(&self) -> RepairReport {
        let mut report = RepairReport::default();

        match self.coordinator.recover_pending(None).await {
            Ok(n) => report.repaired += n as u64,
            Err(e) => {
                error!("coordinator-driven recovery pass failed: {}", e);
                report.errors += 1;
            }
        }

        for agent_type in AGENT_TYPES {
            match self.scan_union_pass(agent_type).await {
                Ok(n) => report.repaired += n,
                Err(e) => {
                    error!("scan-union pass failed for {}: {}", agent_type, e);
                    report.errors += 1;
                }
            }

            match self.brute_force_pass(agent_type).await {
                Ok((n, err)) => {
                    report.repaired += n;
                    report.errors += err;
                }
                Err(e) => {
                    error!("brute-force pass failed for {}: {}", agent_type, e);
                    report.errors += 1;
                }
            }
        }

        let store = self.coordinator.store();
        let metrics_key = self.coordinator.keys().metrics();
        if report.repaired > 0 {
            if let Err(e) = store.hash_incr(&metrics_key, "repaired", report.repaired as i64).await
            {
                warn!("failed to record repaired metric: {}", e);
            }
        }
        if report.errors > 0 {
            if let Err(e) = store
                .hash_incr(&metrics_key, "state_validation_errors", report.errors as i64)
                .await
            {
                warn!("failed to record error metric: {}", e);
            }
        }

        report
    }

    /// Requeues reservations present in `reserved:*` with no corresponding
    /// `reserved_deadlines` entry at all.
    async fn scan_union_pass(&self, agent_type: &str) -> anyhow::Result<u64> {
        let store = self.coordinator.store();
        let keys = self.coordinator.keys();

        let deadline_instances: HashSet<String> = store
            .scan_keys(&keys.reserved_deadlines_glob(agent_type))
            .await?
            .into_iter()
            .filter_map(|k| Keys::instance_from_key(&k).map(|s| s.to_string()))
            .collect();
        let reserved_instances: HashSet<String> = store
            .scan_keys(&keys.reserved_glob(agent_type))
            .await?
            .into_iter()
            .filter_map(|k| Keys::instance_from_key(&k).map(|s| s.to_string()))
            .collect();

        let mut repaired = 0u64;
        for instance in reserved_instances.union(&deadline_instances) {
            let reserved_key = keys.reserved(agent_type, instance);
            let deadlines_key = keys.reserved_deadlines(agent_type, instance);
            for (token, payload) in store.hash_get_all(&reserved_key).await? {
                let has_deadline = store
                    .sorted_set_range_by_score(&deadlines_key, f64::MIN, f64::MAX)
                    .await?
                    .iter()
                    .any(|m| m.member == token.as_bytes());
                if has_deadline {
                    continue;
                }
                store.hash_del(&reserved_key, &token).await?;
                if self.coordinator.requeue_raw_payload(&payload).await.is_ok() {
                    repaired += 1;
                } else {
                    warn!("scan-union pass found undecodable reservation {} in {}", token, reserved_key);
                }
            }
        }
        Ok(repaired)
    }

    /// Sweeps every remaining `reserved:*` field. Mirrors
    /// `state_validator.py`'s final pass: a field is only in scope here if
    /// its deadline is missing entirely or already `<= now` — a deadline
    /// still in the future means some consumer holds a live, in-window
    /// reservation, and leaving it alone is what keeps the at-most-one-
    /// in-flight invariant intact. Only what's actually due (or undecodable)
    /// is requeued or quarantined.
    async fn brute_force_pass(&self, agent_type: &str) -> anyhow::Result<(u64, u64)> {
        let store = self.coordinator.store();
        let keys = self.coordinator.keys();
        let now = now_us() as f64;

        let mut repaired = 0u64;
        let mut errors = 0u64;
        for key in store.scan_keys(&keys.reserved_glob(agent_type)).await? {
            let Some(instance) = Keys::instance_from_key(&key) else {
                continue;
            };
            let deadlines_key = keys.reserved_deadlines(agent_type, instance);
            let due: HashSet<Vec<u8>> = store
                .sorted_set_range_by_score(&deadlines_key, f64::MIN, now)
                .await?
                .into_iter()
                .map(|m| m.member)
                .collect();
            let has_any_deadline: HashSet<Vec<u8>> = store
                .sorted_set_range_by_score(&deadlines_key, f64::MIN, f64::MAX)
                .await?
                .into_iter()
                .map(|m| m.member)
                .collect();

            for (token, payload) in store.hash_get_all(&key).await? {
                let token_bytes = token.as_bytes().to_vec();
                let is_due = due.contains(&token_bytes);
                let has_deadline = has_any_deadline.contains(&token_bytes);
                if has_deadline && !is_due {
                    continue;
                }

                match self.coordinator.requeue_raw_payload(&payload).await {
                    Ok(()) => {
                        store.hash_del(&key, &token).await?;
                        if is_due {
                            store.sorted_set_remove(&deadlines_key, &token_bytes).await?;
                        }
                        repaired += 1;
                    }
                    Err(e) => {
                        error!("quarantining undecodable reservation {} in {}: {}", token, key, e);
                        store.hash_del(&key, &token).await?;
                        if is_due {
                            store.sorted_set_remove(&deadlines_key, &token_bytes).await?;
                        }
                        errors += 1;
                    }
                }
            }
        }
        Ok((repaired, errors))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ao_coordinator::{AgentId, AgentMessage, AgentType, MessageSink, MessageSource, MessageType};
    use ao_keyspace::MemoryStore;

    use super::*;

    fn recipient() -> AgentId {
        AgentId::new(AgentType::WorldBuilder, None)
    }

    fn sender() -> AgentId {
        AgentId::new(AgentType::NarrativeGenerator, None)
    }

    #[tokio::test]
    async fn recovers_expired_reservation_via_coordinator_pass() {
        let coordinator = MessageCoordinator::new(Arc::new(MemoryStore::new()), "ao");
        let validator = StateValidator::new(coordinator.clone());

        let message = AgentMessage::new("wedged1", sender(), recipient(), MessageType::Request).unwrap();
        coordinator.send(message).await.unwrap();
        let received = coordinator.receive(&recipient(), 0).await.unwrap().unwrap();
        assert_eq!(received.message.delivery_attempts, 1);

        let report = validator.validate_and_repair().await;
        assert_eq!(report.repaired, 1);
        assert_eq!(report.errors, 0);

        let redelivered = coordinator.receive(&recipient(), 5).await.unwrap().unwrap();
        assert_eq!(redelivered.message.message.message_id, "wedged1");
        assert_eq!(redelivered.message.delivery_attempts, 2);
    }

    #[tokio::test]
    async fn no_op_when_nothing_is_stuck() {
        let coordinator = MessageCoordinator::new(Arc::new(MemoryStore::new()), "ao");
        let validator = StateValidator::new(coordinator);

        let report = validator.validate_and_repair().await;
        assert_eq!(report, RepairReport::default());
    }

    /// A reservation well inside its visibility window is a live in-flight
    /// message, not a crash victim. Running recovery against it must be a
    /// no-op — this is what keeps the at-most-one-in-flight invariant intact
    /// when recovery polls every second but visibility timeouts run minutes.
    #[tokio::test]
    async fn leaves_a_live_in_window_reservation_alone() {
        let coordinator = MessageCoordinator::new(Arc::new(MemoryStore::new()), "ao");
        let validator = StateValidator::new(coordinator.clone());

        let message = AgentMessage::new("inflt01", sender(), recipient(), MessageType::Request).unwrap();
        coordinator.send(message).await.unwrap();
        let received = coordinator.receive(&recipient(), 300).await.unwrap().unwrap();
        assert_eq!(received.message.delivery_attempts, 1);

        let report = validator.validate_and_repair().await;
        assert_eq!(report.repaired, 0);
        assert_eq!(report.errors, 0);

        assert!(coordinator.receive(&recipient(), 5).await.unwrap().is_none());
        assert!(coordinator.ack(&recipient(), &received.token).await.unwrap());
    }
}
