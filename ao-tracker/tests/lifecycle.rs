use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ao_tracker::{ProgressUpdate, WorkflowProgressTracker, WorkflowStage, WorkflowStatus};

fn tracker(cleanup_interval_s: u64, workflow_timeout_s: u64) -> Arc<WorkflowProgressTracker> {
    Arc::new(WorkflowProgressTracker::new(None, "ao:events", false, cleanup_interval_s, workflow_timeout_s))
}

#[tokio::test]
async fn start_update_complete_milestone_and_finish_workflow() {
    let tracker = tracker(600, 7200);
    tracker.start().await;

    let workflow_id = tracker
        .start_workflow_full(
            "narrative_arc".to_string(),
            Some("user-1".to_string()),
            None,
            Some(4),
            Some(60),
            vec![
                ("setup".to_string(), "Set the scene".to_string(), WorkflowStage::Initializing, 0.25),
                ("climax".to_string(), "Reach the climax".to_string(), WorkflowStage::Executing, 0.5),
                ("wrap_up".to_string(), "Finalize".to_string(), WorkflowStage::Finalizing, 0.25),
            ],
        )
        .await;

    let status = tracker.get_workflow_status(&workflow_id).unwrap();
    assert_eq!(status.status, WorkflowStatus::Running);
    assert_eq!(status.milestones.len(), 3);
    assert_eq!(status.progress_percentage, 0.0);

    let setup_id = status.milestones[0].milestone_id.clone();
    let updated = tracker.complete_milestone(&workflow_id, &setup_id, None).await;
    assert!(updated);

    let status = tracker.get_workflow_status(&workflow_id).unwrap();
    assert_eq!(status.progress_percentage, 25.0);

    let updated = tracker
        .update_workflow_progress_full(
            &workflow_id,
            ProgressUpdate {
                stage: Some(WorkflowStage::Executing),
                current_step: Some("Writing the climax".to_string()),
                completed_steps: Some(2),
                ..Default::default()
            },
        )
        .await;
    assert!(updated);

    let status = tracker.get_workflow_status(&workflow_id).unwrap();
    assert_eq!(status.current_stage, WorkflowStage::Executing);
    assert_eq!(status.current_step.as_deref(), Some("Writing the climax"));
    assert_eq!(status.progress_percentage, 50.0);

    let completed = tracker.complete_workflow(&workflow_id, true, None).await;
    assert!(completed);
    assert!(tracker.get_workflow_status(&workflow_id).is_none());

    tracker.stop().await;
}

#[tokio::test]
async fn fail_workflow_preserves_progress_percentage() {
    let tracker = tracker(600, 7200);
    tracker.start().await;

    let workflow_id = tracker
        .start_workflow_full("session".to_string(), None, None, Some(10), None, vec![])
        .await;

    tracker
        .update_workflow_progress_full(
            &workflow_id,
            ProgressUpdate { completed_steps: Some(3), ..Default::default() },
        )
        .await;
    let before = tracker.get_workflow_status(&workflow_id).unwrap().progress_percentage;
    assert_eq!(before, 30.0);

    let failed = tracker.fail_workflow(&workflow_id, "agent crashed".to_string(), None).await;
    assert!(failed);
    assert!(tracker.get_workflow_status(&workflow_id).is_none());

    tracker.stop().await;
}

#[tokio::test]
async fn callbacks_fire_on_progress_updates() {
    let tracker = tracker(600, 7200);
    tracker.start().await;

    let workflow_id = tracker
        .start_workflow_full("world_building".to_string(), None, None, None, None, vec![])
        .await;

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    tracker.add_workflow_callback(
        &workflow_id,
        Arc::new(move |_progress| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    );

    tracker
        .update_workflow_progress_full(&workflow_id, ProgressUpdate { completed_steps: Some(1), ..Default::default() })
        .await;
    tracker.complete_workflow(&workflow_id, true, None).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    tracker.stop().await;
}

#[tokio::test]
async fn stop_completes_all_active_workflows() {
    let tracker = tracker(600, 7200);
    tracker.start().await;

    let workflow_id = tracker
        .start_workflow_full("agent_handoff".to_string(), None, None, None, None, vec![])
        .await;
    assert!(tracker.get_workflow_status(&workflow_id).is_some());

    tracker.stop().await;
    assert!(tracker.get_workflow_status(&workflow_id).is_none());
}

#[tokio::test]
async fn cleanup_loop_fails_stale_workflows() {
    // Real-time based: `now_us()` reads the wall clock, not tokio's virtual
    // clock, so this can't use `tokio::time::pause`.
    let tracker = tracker(1, 1);
    tracker.start().await;

    let workflow_id = tracker
        .start_workflow_full("stale_case".to_string(), None, None, None, None, vec![])
        .await;

    tokio::time::sleep(Duration::from_millis(2_500)).await;

    assert!(tracker.get_workflow_status(&workflow_id).is_none());
    tracker.stop().await;
}
