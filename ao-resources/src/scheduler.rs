use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::types::WorkflowPriority;

/// Four FIFO priority queues, always drained highest-priority-first, gated
/// by an admission ceiling on how many workflows may run at once. Mirrors
/// the pattern of a `DashMap<Priority, Vec<Id>>` queue-per-priority used
/// elsewhere in this workspace, generalized to pop in strict priority order
/// rather than caller-chosen order.
#[derive(Debug)]
pub struct WorkflowScheduler {
    queues: DashMap<WorkflowPriority, VecDeque<String>>,
    running: DashMap<String, ()>,
    max_concurrent: usize,
    total_scheduled: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatistics {
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_failed: u64,
}

impl WorkflowScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            queues: DashMap::new(),
            running: DashMap::new(),
            max_concurrent,
            total_scheduled: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    /// Marks a workflow as actively running, distinct from merely queued.
    /// Increments `total_scheduled`.
    pub fn start_workflow(&self, workflow_id: impl Into<String>) {
        self.running.insert(workflow_id.into(), ());
        self.total_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes a workflow from `running` and attributes it to
    /// `total_completed` or `total_failed` depending on outcome.
    pub fn complete_workflow(&self, workflow_id: &str, success: bool) {
        self.running.remove(workflow_id);
        if success {
            self.total_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.running.contains_key(workflow_id)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    fn is_queued(&self, workflow_id: &str) -> bool {
        self.queues.iter().any(|q| q.value().iter().any(|id| id == workflow_id))
    }

    /// Enqueues `workflow_id`, rejecting it if it is already running or
    /// already waiting in any priority queue. Returns `false` on rejection,
    /// so the "appears in at most one of queue/running/completed" invariant
    /// can't be violated by a duplicate request.
    pub fn enqueue_workflow(&self, workflow_id: impl Into<String>, priority: WorkflowPriority) -> bool {
        let workflow_id = workflow_id.into();
        if self.is_running(&workflow_id) || self.is_queued(&workflow_id) {
            debug!("rejected duplicate enqueue for workflow {}", workflow_id);
            return false;
        }
        self.queues.entry(priority).or_default().push_back(workflow_id.clone());
        debug!("enqueued workflow {} at priority {:?}", workflow_id, priority);
        true
    }

    /// Pops the next workflow id in strict priority order (critical > high >
    /// normal > low), FIFO within a priority tier. Returns `None` once
    /// `running_count() >= max_concurrent`, regardless of queue contents.
    pub fn get_next_workflow(&self) -> Option<String> {
        if self.running.len() >= self.max_concurrent {
            return None;
        }
        for priority in WorkflowPriority::ALL_DESCENDING {
            if let Some(mut queue) = self.queues.get_mut(&priority) {
                if let Some(workflow_id) = queue.pop_front() {
                    return Some(workflow_id);
                }
            }
        }
        None
    }

    pub fn queue_depth(&self, priority: WorkflowPriority) -> usize {
        self.queues.get(&priority).map(|q| q.len()).unwrap_or(0)
    }

    pub fn total_queued(&self) -> usize {
        self.queues.iter().map(|e| e.value().len()).sum()
    }

    /// Removes a workflow id from whichever queue it is waiting in, e.g.
    /// when a workflow is cancelled before it was ever dispatched.
    pub fn remove_workflow(&self, workflow_id: &str) -> bool {
        for mut queue in self.queues.iter_mut() {
            let before = queue.len();
            queue.retain(|id| id != workflow_id);
            if queue.len() != before {
                return true;
            }
        }
        false
    }

    pub fn get_statistics(&self) -> SchedulerStatistics {
        SchedulerStatistics {
            running: self.running_count(),
            queued: self.total_queued(),
            max_concurrent: self.max_concurrent,
            total_scheduled: self.total_scheduled.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_highest_priority_first() {
        let scheduler = WorkflowScheduler::new(10);
        scheduler.enqueue_workflow("low-1", WorkflowPriority::Low);
        scheduler.enqueue_workflow("crit-1", WorkflowPriority::Critical);
        scheduler.enqueue_workflow("normal-1", WorkflowPriority::Normal);
        scheduler.enqueue_workflow("crit-2", WorkflowPriority::Critical);

        assert_eq!(scheduler.get_next_workflow().as_deref(), Some("crit-1"));
        assert_eq!(scheduler.get_next_workflow().as_deref(), Some("crit-2"));
        assert_eq!(scheduler.get_next_workflow().as_deref(), Some("normal-1"));
        assert_eq!(scheduler.get_next_workflow().as_deref(), Some("low-1"));
        assert_eq!(scheduler.get_next_workflow(), None);
    }

    #[test]
    fn remove_workflow_drops_it_from_its_queue() {
        let scheduler = WorkflowScheduler::new(10);
        scheduler.enqueue_workflow("wf-1", WorkflowPriority::Normal);
        assert!(scheduler.remove_workflow("wf-1"));
        assert_eq!(scheduler.get_next_workflow(), None);
    }

    #[test]
    fn rejects_duplicate_enqueue_of_a_queued_or_running_workflow() {
        let scheduler = WorkflowScheduler::new(10);
        assert!(scheduler.enqueue_workflow("wf-1", WorkflowPriority::Normal));
        assert!(!scheduler.enqueue_workflow("wf-1", WorkflowPriority::High));

        scheduler.start_workflow("wf-2");
        assert!(!scheduler.enqueue_workflow("wf-2", WorkflowPriority::Low));
    }

    #[test]
    fn get_next_workflow_withholds_admission_past_max_concurrent() {
        let scheduler = WorkflowScheduler::new(1);
        scheduler.start_workflow("already-running");
        scheduler.enqueue_workflow("waiting", WorkflowPriority::Critical);

        assert_eq!(scheduler.get_next_workflow(), None);

        scheduler.complete_workflow("already-running", true);
        assert_eq!(scheduler.get_next_workflow().as_deref(), Some("waiting"));
    }

    #[test]
    fn complete_workflow_attributes_outcome_counters() {
        let scheduler = WorkflowScheduler::new(10);
        scheduler.start_workflow("wf-ok");
        scheduler.start_workflow("wf-bad");
        scheduler.complete_workflow("wf-ok", true);
        scheduler.complete_workflow("wf-bad", false);

        let stats = scheduler.get_statistics();
        assert_eq!(stats.total_scheduled, 2);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.running, 0);
    }
}
