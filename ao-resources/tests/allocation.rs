use std::sync::Arc;
use std::time::Duration;

use ao_resources::{ResourceManager, ResourceType, WorkflowPriority, WorkflowResourceRequest, WorkflowScheduler};

fn manager() -> Arc<ResourceManager> {
    let scheduler = Arc::new(WorkflowScheduler::new(10));
    Arc::new(ResourceManager::new(scheduler).with_pool_capacity(ResourceType::Cpu, 10.0))
}

#[tokio::test]
async fn grants_immediately_when_capacity_available() {
    let manager = manager();
    manager.start().await;

    let request = WorkflowResourceRequest::new("wf-1", WorkflowPriority::Normal)
        .with_requirement(ResourceType::Cpu, 4.0);
    let allocation = manager.request_workflow_resources(request).await;
    assert_eq!(allocation.workflow_id, "wf-1");
    assert_eq!(manager.pool_snapshot().iter().find(|p| p.resource_type == ResourceType::Cpu).unwrap().available, 6.0);

    assert!(manager.release_workflow_resources("wf-1"));
    assert_eq!(manager.pool_snapshot().iter().find(|p| p.resource_type == ResourceType::Cpu).unwrap().available, 10.0);

    manager.stop().await;
}

#[tokio::test]
async fn queues_and_grants_once_capacity_frees_up() {
    let manager = manager();
    manager.start().await;

    let first = WorkflowResourceRequest::new("wf-a", WorkflowPriority::Normal).with_requirement(ResourceType::Cpu, 10.0);
    let allocation = manager.request_workflow_resources(first).await;
    assert_eq!(allocation.workflow_id, "wf-a");

    let manager_clone = manager.clone();
    let waiter = tokio::spawn(async move {
        let second = WorkflowResourceRequest::new("wf-b", WorkflowPriority::High).with_requirement(ResourceType::Cpu, 5.0);
        manager_clone.request_workflow_resources(second).await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.release_workflow_resources("wf-a");

    let granted = tokio::time::timeout(Duration::from_secs(3), waiter).await.unwrap().unwrap();
    assert_eq!(granted.workflow_id, "wf-b");

    manager.stop().await;
}

#[tokio::test]
async fn a_third_workflow_queues_once_concurrent_workflows_capacity_is_exhausted() {
    let scheduler = Arc::new(WorkflowScheduler::new(10));
    let manager = Arc::new(
        ResourceManager::new(scheduler)
            .with_pool_capacity(ResourceType::Cpu, 100.0)
            .with_pool_capacity(ResourceType::ConcurrentWorkflows, 2.0),
    );
    manager.start().await;

    // Neither request specifies `concurrent_workflows`; default-filling must
    // still charge the pool or this scenario can't hold.
    let critical = WorkflowResourceRequest::new("wf-critical", WorkflowPriority::Critical);
    let high = WorkflowResourceRequest::new("wf-high", WorkflowPriority::High);
    let a = manager.request_workflow_resources(critical).await;
    let b = manager.request_workflow_resources(high).await;
    assert_eq!(a.workflow_id, "wf-critical");
    assert_eq!(b.workflow_id, "wf-high");
    assert_eq!(
        manager.pool_snapshot().iter().find(|p| p.resource_type == ResourceType::ConcurrentWorkflows).unwrap().available,
        0.0
    );

    let manager_clone = manager.clone();
    let waiter = tokio::spawn(async move {
        let normal = WorkflowResourceRequest::new("wf-normal", WorkflowPriority::Normal);
        manager_clone.request_workflow_resources(normal).await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());

    manager.release_workflow_resources("wf-critical");
    let granted = tokio::time::timeout(Duration::from_secs(3), waiter).await.unwrap().unwrap();
    assert_eq!(granted.workflow_id, "wf-normal");

    manager.stop().await;
}
