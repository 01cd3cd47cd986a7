use dashmap::DashMap;
use tracing::debug;

/// Assigns agents to workflows by picking whichever eligible agents
/// currently carry the least load, and tracks the assignment so it can be
/// released as a unit later.
#[derive(Debug, Default)]
pub struct WorkflowLoadBalancer {
    agent_loads: DashMap<String, u32>,
    workflow_assignments: DashMap<String, Vec<String>>,
}

impl WorkflowLoadBalancer {
    pub fn new() -> Self {
        Self { agent_loads: DashMap::new(), workflow_assignments: DashMap::new() }
    }

    pub fn register_agent(&self, agent_id: impl Into<String>) {
        self.agent_loads.entry(agent_id.into()).or_insert(0);
    }

    pub fn deregister_agent(&self, agent_id: &str) {
        self.agent_loads.remove(agent_id);
    }

    /// Picks the `count` least-loaded agents from `eligible`, increments
    /// their load, and records the assignment under `workflow_id`.
    pub fn assign_agents_to_workflow(&self, workflow_id: impl Into<String>, eligible: &[String], count: usize) -> Vec<String> {
        let workflow_id = workflow_id.into();
        let mut candidates: Vec<(String, u32)> = eligible
            .iter()
            .map(|agent_id| {
                let load = self.agent_loads.get(agent_id).map(|l| *l).unwrap_or(0);
                (agent_id.clone(), load)
            })
            .collect();
        candidates.sort_by_key(|(_, load)| *load);
        candidates.truncate(count);

        let assigned: Vec<String> = candidates.into_iter().map(|(agent_id, _)| agent_id).collect();
        for agent_id in &assigned {
            *self.agent_loads.entry(agent_id.clone()).or_insert(0) += 1;
        }
        self.workflow_assignments.insert(workflow_id.clone(), assigned.clone());
        debug!("assigned {} agents to workflow {}", assigned.len(), workflow_id);
        assigned
    }

    pub fn release_agents_from_workflow(&self, workflow_id: &str) {
        let Some((_, agents)) = self.workflow_assignments.remove(workflow_id) else {
            return;
        };
        for agent_id in agents {
            if let Some(mut load) = self.agent_loads.get_mut(&agent_id) {
                *load = load.saturating_sub(1);
            }
        }
    }

    pub fn load_for(&self, agent_id: &str) -> u32 {
        self.agent_loads.get(agent_id).map(|l| *l).unwrap_or(0)
    }

    pub fn assignments_for(&self, workflow_id: &str) -> Vec<String> {
        self.workflow_assignments.get(workflow_id).map(|e| e.value().clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_least_loaded_agents_first() {
        let balancer = WorkflowLoadBalancer::new();
        balancer.register_agent("agent-a");
        balancer.register_agent("agent-b");
        balancer.register_agent("agent-c");

        balancer.assign_agents_to_workflow("wf-busy", &["agent-a".to_string()], 1);
        assert_eq!(balancer.load_for("agent-a"), 1);

        let assigned = balancer.assign_agents_to_workflow(
            "wf-1",
            &["agent-a".to_string(), "agent-b".to_string(), "agent-c".to_string()],
            2,
        );
        assert_eq!(assigned.len(), 2);
        assert!(!assigned.contains(&"agent-a".to_string()));
    }

    #[test]
    fn release_drops_the_load_back_down() {
        let balancer = WorkflowLoadBalancer::new();
        balancer.register_agent("agent-a");
        balancer.assign_agents_to_workflow("wf-1", &["agent-a".to_string()], 1);
        assert_eq!(balancer.load_for("agent-a"), 1);

        balancer.release_agents_from_workflow("wf-1");
        assert_eq!(balancer.load_for("agent-a"), 0);
        assert!(balancer.assignments_for("wf-1").is_empty());
    }
}
