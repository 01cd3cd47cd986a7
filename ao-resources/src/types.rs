use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl WorkflowPriority {
    pub const ALL_DESCENDING: [WorkflowPriority; 4] = [
        WorkflowPriority::Critical,
        WorkflowPriority::High,
        WorkflowPriority::Normal,
        WorkflowPriority::Low,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Cpu,
    Memory,
    Network,
    AgentSlots,
    ConcurrentWorkflows,
    MessageQueueCapacity,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Cpu,
        ResourceType::Memory,
        ResourceType::Network,
        ResourceType::AgentSlots,
        ResourceType::ConcurrentWorkflows,
        ResourceType::MessageQueueCapacity,
    ];

    /// Capacity units the resource manager starts with, absent any override
    /// in configuration.
    pub fn default_capacity(self) -> f64 {
        match self {
            ResourceType::Cpu => 100.0,
            ResourceType::Memory => 8192.0,
            ResourceType::Network => 1000.0,
            ResourceType::AgentSlots => 50.0,
            ResourceType::ConcurrentWorkflows => 10.0,
            ResourceType::MessageQueueCapacity => 10000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePool {
    pub resource_type: ResourceType,
    pub total: f64,
    pub available: f64,
}

impl ResourcePool {
    pub fn new(resource_type: ResourceType, total: f64) -> Self {
        Self { resource_type, total, available: total }
    }

    pub fn utilization(&self) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        1.0 - (self.available / self.total)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResourceRequest {
    pub workflow_id: String,
    pub priority: WorkflowPriority,
    pub requirements: HashMap<ResourceType, f64>,
    pub estimated_duration_s: Option<u64>,
    /// Ceiling used to fill a missing `agent_slots` requirement. Defaults to
    /// 1 agent when the caller never calls `with_max_concurrent_agents`.
    pub max_concurrent_agents: u32,
}

impl WorkflowResourceRequest {
    pub fn new(workflow_id: impl Into<String>, priority: WorkflowPriority) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            priority,
            requirements: HashMap::new(),
            estimated_duration_s: None,
            max_concurrent_agents: 1,
        }
    }

    pub fn with_requirement(mut self, resource_type: ResourceType, amount: f64) -> Self {
        self.requirements.insert(resource_type, amount);
        self
    }

    pub fn with_estimated_duration_s(mut self, seconds: u64) -> Self {
        self.estimated_duration_s = Some(seconds);
        self
    }

    pub fn with_max_concurrent_agents(mut self, max_concurrent_agents: u32) -> Self {
        self.max_concurrent_agents = max_concurrent_agents;
        self
    }

    /// Fills any of the four defaulted resource types missing from
    /// `requirements`: cpu=10, memory=512, agent_slots=`max_concurrent_agents`,
    /// concurrent_workflows=1. Network and message-queue capacity have no
    /// default and are left unrequested unless the caller specified them.
    pub(crate) fn fill_defaults(&mut self) {
        self.requirements.entry(ResourceType::Cpu).or_insert(10.0);
        self.requirements.entry(ResourceType::Memory).or_insert(512.0);
        self.requirements
            .entry(ResourceType::AgentSlots)
            .or_insert(self.max_concurrent_agents as f64);
        self.requirements.entry(ResourceType::ConcurrentWorkflows).or_insert(1.0);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub workflow_id: String,
    pub allocated: HashMap<ResourceType, f64>,
    pub allocated_at_us: i64,
    pub expires_at_us: Option<i64>,
}
