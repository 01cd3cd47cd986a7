use std::sync::Arc;

use ao_coordinator::{AgentId, AgentMessage, AgentType, FailureType, MessageCoordinator, MessageType};
use ao_events::{BrokerPublisher, EventPublisher, MemoryBroker};
use ao_keyspace::MemoryStore;
use ao_tracker::{WorkflowProgressTracker, WorkflowStatus};
use ao_workflow_coordinator::WorkflowAwareCoordinator;

fn agent(agent_type: AgentType, instance: &str) -> AgentId {
    AgentId::new(agent_type, Some(instance.to_string()))
}

async fn setup() -> WorkflowAwareCoordinator {
    let store = Arc::new(MemoryStore::new());
    let coordinator = MessageCoordinator::new(store, "ao");
    let broker = Arc::new(MemoryBroker::new());
    let publisher: Arc<dyn EventPublisher> = Arc::new(BrokerPublisher::new(broker));
    let tracker = Arc::new(WorkflowProgressTracker::new(Some(publisher.clone()), "ao:events", true, 600, 7200));
    tracker.start().await;
    WorkflowAwareCoordinator::new(coordinator, tracker, Some(publisher), "ao:events")
}

#[tokio::test]
async fn tracks_a_full_message_lifecycle() {
    let coordinator = setup().await;

    let input_processor = agent(AgentType::InputProcessor, "a");
    let world_builder = agent(AgentType::WorldBuilder, "b");

    let workflow_id = coordinator
        .start_workflow_tracking(
            "narrative_turn".to_string(),
            &[input_processor.clone(), world_builder.clone()],
            Some("user-1".to_string()),
            None,
            Some(2),
        )
        .await;

    let message = AgentMessage::new("msg-001", input_processor.clone(), world_builder.clone(), MessageType::Request).unwrap();
    let send_result = coordinator.send_workflow_message(&workflow_id, message).await.unwrap();
    assert!(send_result.delivered);

    let received = coordinator.receive_workflow_message(&world_builder, 30).await.unwrap().unwrap();
    assert_eq!(received.message.message.message_id, "msg-001");

    let acked = coordinator.ack_workflow_message(&world_builder, &received.token, "msg-001").await.unwrap();
    assert!(acked);

    let completed = coordinator.complete_workflow(&workflow_id, true, None, None).await;
    assert!(completed);
}

#[tokio::test]
async fn nack_routes_through_coordinator_and_marks_workflow_failed() {
    let coordinator = setup().await;
    let input_processor = agent(AgentType::InputProcessor, "a");
    let narrative_generator = agent(AgentType::NarrativeGenerator, "c");

    let workflow_id = coordinator
        .start_workflow_tracking(
            "failure_case".to_string(),
            &[input_processor.clone(), narrative_generator.clone()],
            None,
            None,
            None,
        )
        .await;

    let message = AgentMessage::new("msg-002", input_processor, narrative_generator.clone(), MessageType::Request).unwrap();
    coordinator.send_workflow_message(&workflow_id, message).await.unwrap();

    let received = coordinator.receive_workflow_message(&narrative_generator, 30).await.unwrap().unwrap();
    let nacked = coordinator
        .nack_workflow_message(
            &narrative_generator,
            &received.token,
            "msg-002",
            FailureType::Permanent,
            Some("could not generate".to_string()),
        )
        .await
        .unwrap();
    assert!(nacked);

    let completed = coordinator
        .complete_workflow(&workflow_id, false, None, Some("agent unavailable".to_string()))
        .await;
    assert!(completed);
}
