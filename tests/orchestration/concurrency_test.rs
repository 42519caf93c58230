/*!
 * Concurrency Tests
 * Per-name serialization, lock timeouts and lock-free snapshots
 */

use super::support::{dev_request, user, Harness};
use std::time::Duration;
use tokio::time::Instant;
use workload_orchestrator::core::{ValidationKind, WorkloadState};
use workload_orchestrator::OrchestratorError;

#[tokio::test(start_paused = true)]
async fn test_same_name_creates_are_serialized() {
    let h = Harness::new();
    h.runtime.set_latency(Duration::from_millis(50));
    let u1 = user("u1");

    let (first, second) = tokio::join!(
        h.orchestrator.create(&u1, dev_request("dev1", "u1")),
        h.orchestrator.create(&u1, dev_request("dev1", "u1")),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let rejected = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    match rejected {
        OrchestratorError::Validation(e) => assert_eq!(e.kind, ValidationKind::NameInUse),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.runtime.builds(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lock_wait_times_out() {
    let h = Harness::builder().lock_timeout(Duration::from_millis(20)).build();
    h.runtime.set_latency(Duration::from_millis(300));
    let u1 = user("u1");

    let (created, stopped) = tokio::join!(h.orchestrator.create(&u1, dev_request("dev1", "u1")), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.orchestrator.stop(&u1, "dev1").await
    });

    assert_eq!(created.unwrap().state, WorkloadState::Running);
    match stopped {
        Err(OrchestratorError::Concurrency(e)) => assert!(e.to_string().contains("dev1")),
        other => panic!("unexpected {:?}", other),
    }

    // The lock is free again once the create finished
    assert_eq!(h.orchestrator.stop(&u1, "dev1").await.unwrap().state, WorkloadState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_different_names_proceed_in_parallel() {
    let h = Harness::new();
    h.runtime.set_latency(Duration::from_millis(100));
    let (u1, u2) = (user("u1"), user("u2"));

    let started = Instant::now();
    let (a, b, c) = tokio::join!(
        h.orchestrator.create(&u1, dev_request("a1", "u1")),
        h.orchestrator.create(&u1, dev_request("b1", "u1")),
        h.orchestrator.create(&u2, dev_request("c1", "u2")),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(h.runtime.instances().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_status_does_not_wait_for_in_flight_create() {
    let h = Harness::new();
    h.runtime.set_latency(Duration::from_millis(100));
    let u1 = user("u1");

    let (created, snapshot) = tokio::join!(h.orchestrator.create(&u1, dev_request("dev1", "u1")), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.orchestrator.status(&u1, "dev1").await
    });

    assert_eq!(snapshot.unwrap().state, WorkloadState::Provisioning);
    assert_eq!(created.unwrap().state, WorkloadState::Running);
}

#[tokio::test]
async fn test_parallel_lifecycles_from_spawned_tasks() {
    let h = Harness::new();
    let mut handles = Vec::new();
    for i in 0..8 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            let owner = format!("u{}", i % 2);
            let name = format!("w{}", i);
            let requester = user(&owner);
            orchestrator.create(&requester, dev_request(&name, &owner)).await?;
            orchestrator.stop(&requester, &name).await?;
            orchestrator.destroy(&requester, &name).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().storage_released);
    }
    assert!(h.runtime.instances().is_empty());
    assert!(h.orchestrator.list(&user("u0")).is_empty());
}
