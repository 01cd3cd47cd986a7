//! Pub/sub over a broker channel prefix: publish narrow events, subscribe by
//! type/agent/user/channel, dispatch on a single background loop.

pub mod broker;
pub mod event;
pub mod publisher;
pub mod subscriber;

pub use broker::{EventBroker, MemoryBroker, RedisBroker};
pub use event::{event_types, Event};
pub use publisher::{BrokerPublisher, EventPublisher};
pub use subscriber::{EventHandler, EventSubscriber, HandlerId, SubscriberStatistics};
