//! Bit-exact key builders for the shared store.
//!
//! ```text
//! {pfx}:queue:{type}:{instance}                 ordered list, newest-enqueued at tail
//! {pfx}:sched:{type}:{instance}:prio:{P}        score-ordered set, score = enqueue_time_us
//! {pfx}:reserved:{type}:{instance}              hash: token -> JSON(QueueMessage)
//! {pfx}:reserved_deadlines:{type}:{instance}    score-ordered set: token -> deadline_us
//! {pfx}:dlq:{type}:{instance}                   list of JSON(QueueMessage)
//! {pfx}:wf:metrics                              hash of numeric counters
//! ```

/// Builds the canonical keys for a given `key_prefix`.
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn queue(&self, agent_type: &str, instance: &str) -> String {
        format!("{}:queue:{}:{}", self.prefix, agent_type, instance)
    }

    pub fn sched(&self, agent_type: &str, instance: &str, priority: u8) -> String {
        format!(
            "{}:sched:{}:{}:prio:{}",
            self.prefix, agent_type, instance, priority
        )
    }

    pub fn reserved(&self, agent_type: &str, instance: &str) -> String {
        format!("{}:reserved:{}:{}", self.prefix, agent_type, instance)
    }

    pub fn reserved_deadlines(&self, agent_type: &str, instance: &str) -> String {
        format!(
            "{}:reserved_deadlines:{}:{}",
            self.prefix, agent_type, instance
        )
    }

    pub fn dlq(&self, agent_type: &str, instance: &str) -> String {
        format!("{}:dlq:{}:{}", self.prefix, agent_type, instance)
    }

    pub fn metrics(&self) -> String {
        format!("{}:wf:metrics", self.prefix)
    }

    /// Glob pattern matching every `reserved_deadlines` key for an agent type,
    /// used by the state validator to discover live instances.
    pub fn reserved_deadlines_glob(&self, agent_type: &str) -> String {
        format!("{}:reserved_deadlines:{}:*", self.prefix, agent_type)
    }

    /// Glob pattern matching every `reserved` key for an agent type.
    pub fn reserved_glob(&self, agent_type: &str) -> String {
        format!("{}:reserved:{}:*", self.prefix, agent_type)
    }

    /// Extracts the instance name from a key produced by one of the globs
    /// above (the last colon-separated segment).
    pub fn instance_from_key(key: &str) -> Option<&str> {
        key.rsplit(':').next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_key_layout() {
        let k = Keys::new("ao");
        assert_eq!(k.queue("world_builder", "default"), "ao:queue:world_builder:default");
        assert_eq!(
            k.sched("world_builder", "default", 9),
            "ao:sched:world_builder:default:prio:9"
        );
        assert_eq!(
            k.reserved("world_builder", "default"),
            "ao:reserved:world_builder:default"
        );
        assert_eq!(
            k.reserved_deadlines("world_builder", "default"),
            "ao:reserved_deadlines:world_builder:default"
        );
        assert_eq!(k.dlq("world_builder", "default"), "ao:dlq:world_builder:default");
        assert_eq!(k.metrics(), "ao:wf:metrics");
    }

    #[test]
    fn instance_extraction() {
        let k = Keys::new("ao");
        let key = k.reserved_deadlines("world_builder", "shard-3");
        assert_eq!(Keys::instance_from_key(&key), Some("shard-3"));
    }
}
