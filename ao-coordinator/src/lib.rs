//! The Message Coordinator: priority queues, visibility-timeout reservations,
//! and backoff/DLQ handling on top of a [`ao_keyspace::SharedStore`].

pub mod coordinator;
pub mod error;
pub mod traits;
pub mod types;

pub use coordinator::MessageCoordinator;
pub use error::CoordinatorError;
pub use traits::{MessageSink, MessageSource};
pub use types::{
    now_us, AgentId, AgentMessage, AgentType, FailureType, MessagePriority, MessageResult,
    MessageType, QueueMessage, ReceivedMessage, RoutingKey,
};
