use std::sync::Arc;

use ao_coordinator::{
    AgentId, AgentMessage, AgentType, FailureType, MessageCoordinator, MessagePriority,
    MessageSink, MessageSource, MessageType,
};
use ao_keyspace::MemoryStore;

fn world_builder() -> AgentId {
    AgentId::new(AgentType::WorldBuilder, None)
}

fn narrative_generator() -> AgentId {
    AgentId::new(AgentType::NarrativeGenerator, None)
}

fn coordinator() -> MessageCoordinator {
    MessageCoordinator::new(Arc::new(MemoryStore::new()), "ao")
}

fn message(id: &str, recipient: AgentId, priority: MessagePriority) -> AgentMessage {
    let mut m = AgentMessage::new(id, narrative_generator(), recipient, MessageType::Request)
        .expect("valid message_id");
    m.priority = priority;
    m
}

#[tokio::test]
async fn s1_basic_send_receive_ack() {
    let coord = coordinator();
    let recipient = world_builder();

    let result = coord
        .send(message("msg001", recipient.clone(), MessagePriority::Normal))
        .await
        .unwrap();
    assert!(result.delivered);

    let received = coord
        .receive(&recipient, 5)
        .await
        .unwrap()
        .expect("message should be available");
    assert_eq!(received.message.message.message_id, "msg001");
    assert_eq!(received.message.delivery_attempts, 1);

    assert!(coord.ack(&recipient, &received.token).await.unwrap());
    assert!(coord.receive(&recipient, 5).await.unwrap().is_none());
}

#[tokio::test]
async fn s2_priority_ordering() {
    let coord = coordinator();
    let recipient = world_builder();

    coord
        .send(message("lowpri1", recipient.clone(), MessagePriority::Low))
        .await
        .unwrap();
    coord
        .send(message("hipri01", recipient.clone(), MessagePriority::High))
        .await
        .unwrap();
    coord
        .send(message("normal1", recipient.clone(), MessagePriority::Normal))
        .await
        .unwrap();

    let first = coord.receive(&recipient, 5).await.unwrap().unwrap();
    assert_eq!(first.message.message.message_id, "hipri01");

    let second = coord.receive(&recipient, 5).await.unwrap().unwrap();
    assert_eq!(second.message.message.message_id, "normal1");

    let third = coord.receive(&recipient, 5).await.unwrap().unwrap();
    assert_eq!(third.message.message.message_id, "lowpri1");
}

#[tokio::test]
async fn s4_permanent_nack_routes_to_dlq() {
    let coord = coordinator();
    let recipient = world_builder();

    coord
        .send(message("perma01", recipient.clone(), MessagePriority::Normal))
        .await
        .unwrap();
    let received = coord.receive(&recipient, 5).await.unwrap().unwrap();

    assert!(coord
        .nack(
            &recipient,
            &received.token,
            FailureType::Permanent,
            Some("unrecoverable".to_string())
        )
        .await
        .unwrap());

    // Not redelivered: the queue is empty and the second nack on the same
    // token is a no-op since the reservation is already gone.
    assert!(coord.receive(&recipient, 5).await.unwrap().is_none());
    assert!(!coord
        .nack(&recipient, &received.token, FailureType::Permanent, None)
        .await
        .unwrap());
}

#[tokio::test]
async fn s5_transient_nack_requeues_for_redelivery() {
    let coord = coordinator();
    let recipient = world_builder();

    coord
        .send(message("trans01", recipient.clone(), MessagePriority::Normal))
        .await
        .unwrap();
    let received = coord.receive(&recipient, 5).await.unwrap().unwrap();
    assert_eq!(received.message.delivery_attempts, 1);

    assert!(coord
        .nack(
            &recipient,
            &received.token,
            FailureType::Transient,
            Some("try again".to_string())
        )
        .await
        .unwrap());

    // The backoff schedules redelivery in the future; an immediate receive
    // must not see it. `now_us()` reads real wall-clock time, so this needs
    // a real sleep rather than `tokio::time::pause`/`advance`.
    assert!(coord.receive(&recipient, 5).await.unwrap().is_none());

    tokio::time::sleep(std::time::Duration::from_millis(450)).await;

    let redelivered = coord.receive(&recipient, 5).await.unwrap().unwrap();
    assert_eq!(redelivered.message.message.message_id, "trans01");
    assert_eq!(redelivered.message.delivery_attempts, 2);
    assert_eq!(redelivered.message.last_error.as_deref(), Some("try again"));
}

#[tokio::test]
async fn broadcast_delivers_independently_to_each_recipient() {
    let coord = coordinator();
    let a = world_builder();
    let b = narrative_generator();

    let template = message("broad01", a.clone(), MessagePriority::Normal);
    let results = coord.broadcast(template, &[a.clone(), b.clone()]).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.delivered));

    assert!(coord.receive(&a, 5).await.unwrap().is_some());
    assert!(coord.receive(&b, 5).await.unwrap().is_some());
}

#[tokio::test]
async fn recover_pending_requeues_expired_reservations_without_incrementing_attempts() {
    let coord = coordinator();
    let recipient = world_builder();

    coord
        .send(message("recov01", recipient.clone(), MessagePriority::Normal))
        .await
        .unwrap();
    // A visibility timeout of 0s means the reservation is immediately stale.
    let received = coord.receive(&recipient, 0).await.unwrap().unwrap();
    assert_eq!(received.message.delivery_attempts, 1);

    let recovered = coord.recover_pending(None).await.unwrap();
    assert_eq!(recovered, 1);

    let redelivered = coord.receive(&recipient, 5).await.unwrap().unwrap();
    assert_eq!(redelivered.message.message.message_id, "recov01");
    assert_eq!(redelivered.message.delivery_attempts, 2);
}

#[tokio::test]
async fn message_id_shorter_than_six_chars_is_rejected() {
    let err = AgentMessage::new("abc", narrative_generator(), world_builder(), MessageType::Request)
        .unwrap_err();
    assert!(err.contains("message_id"));
}
