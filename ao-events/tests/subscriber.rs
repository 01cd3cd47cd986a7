use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ao_events::{event_types, BrokerPublisher, Event, EventPublisher, EventSubscriber, MemoryBroker};

#[tokio::test]
async fn subscriber_dispatches_published_event_to_handler() {
    let broker = Arc::new(MemoryBroker::new());
    let publisher = BrokerPublisher::new(broker.clone());
    let subscriber = Arc::new(EventSubscriber::new(broker, "ao:events"));
    subscriber.clone().start().await;

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    subscriber
        .subscribe_to_event_type(
            event_types::WORKFLOW_PROGRESS,
            Arc::new(move |_event| {
                let received = received_clone.clone();
                Box::pin(async move {
                    received.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .await
        .unwrap();

    let channel = "ao:events:workflow_progress";
    let event = Event::new(event_types::WORKFLOW_PROGRESS, serde_json::json!({"progress": 50}));
    publisher.publish(channel, &event).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(received.load(Ordering::SeqCst), 1);

    let stats = subscriber.get_statistics();
    assert_eq!(stats.events_received, 1);
    assert_eq!(stats.events_processed, 1);
    assert_eq!(stats.events_failed, 0);

    subscriber.stop().await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let broker = Arc::new(MemoryBroker::new());
    let publisher = BrokerPublisher::new(broker.clone());
    let subscriber = Arc::new(EventSubscriber::new(broker, "ao:events"));
    subscriber.clone().start().await;

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    let channel = "ao:events:all";
    let handler_id = subscriber
        .subscribe_to_all_events(Arc::new(move |_event| {
            let received = received_clone.clone();
            Box::pin(async move {
                received.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
        .await
        .unwrap();

    subscriber.unsubscribe_from_channel(channel, Some(handler_id)).await.unwrap();

    let event = Event::new(event_types::MESSAGE_ACK, serde_json::json!({}));
    publisher.publish(channel, &event).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(received.load(Ordering::SeqCst), 0);
    subscriber.stop().await;
}
