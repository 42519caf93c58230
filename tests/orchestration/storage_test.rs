/*!
 * Storage Tests
 * Per-owner quota enforcement and usage reporting
 */

use super::support::{dev_request, user, workload_dataset, workspace_dataset, Harness};
use proptest::prelude::*;
use std::collections::HashSet;
use workload_orchestrator::core::{StorageErrorKind, ValidationKind};
use workload_orchestrator::storage::Quota;
use workload_orchestrator::OrchestratorError;

const MIB: u64 = 1 << 20;

#[tokio::test]
async fn test_owner_quota_is_set_on_owner_root() {
    let h = Harness::builder().quota(Quota::Bytes(4 * MIB)).build();
    h.orchestrator.create(&user("u1"), dev_request("dev1", "u1")).await.unwrap();
    assert_eq!(h.volumes.quota_of("tank/users/u1"), Some(4 * MIB));
    assert_eq!(h.volumes.quota_of(&workspace_dataset("u1", "dev1")), None);
}

#[tokio::test]
async fn test_exhausted_quota_refuses_new_workspace() {
    let h = Harness::builder().quota(Quota::Bytes(MIB)).build();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    h.volumes.write(&workspace_dataset("u1", "dev1"), MIB).unwrap();

    match h.orchestrator.create(&u1, dev_request("dev2", "u1")).await {
        Err(OrchestratorError::Storage(e)) => assert_eq!(e.kind, StorageErrorKind::QuotaExceeded),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!h.volumes.contains(&workspace_dataset("u1", "dev2")));
    assert!(matches!(
        h.orchestrator.status(&u1, "dev2").await,
        Err(OrchestratorError::NotFound { .. })
    ));
    assert_eq!(h.runtime.builds(), 1);

    // Another owner's budget is untouched
    h.orchestrator.create(&user("u2"), dev_request("dev3", "u2")).await.unwrap();
}

#[tokio::test]
async fn test_quota_is_shared_by_an_owners_workloads() {
    let h = Harness::builder().quota(Quota::Bytes(MIB)).build();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    h.orchestrator.create(&u1, dev_request("dev2", "u1")).await.unwrap();

    h.volumes.write(&workspace_dataset("u1", "dev1"), 600 * 1024).unwrap();
    let err = h.volumes.write(&workspace_dataset("u1", "dev2"), 600 * 1024).unwrap_err();
    assert_eq!(err.kind, StorageErrorKind::QuotaExceeded);
}

#[tokio::test]
async fn test_storage_info() {
    let h = Harness::builder().quota(Quota::Bytes(4 * MIB)).build();
    let u1 = user("u1");

    let empty = h.orchestrator.storage_info(&u1).await.unwrap();
    assert_eq!(empty.used_bytes, 0);
    assert_eq!(empty.available_bytes, 4 * MIB);

    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    h.volumes.write(&workspace_dataset("u1", "dev1"), MIB).unwrap();

    let usage = h.orchestrator.storage_info(&u1).await.unwrap();
    assert_eq!(usage.owner, "u1");
    assert_eq!(usage.used_bytes, MIB);
    assert_eq!(usage.available_bytes, 3 * MIB);
}

#[tokio::test]
async fn test_unlimited_quota_reports_none() {
    let h = Harness::builder().quota(Quota::Unlimited).build();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    assert_eq!(h.orchestrator.storage_info(&u1).await.unwrap().quota, "none");
}

#[derive(Debug, Clone)]
enum StorageStep {
    Create(usize),
    Destroy(usize),
    Write(usize, u64),
}

fn storage_step() -> impl Strategy<Value = StorageStep> {
    prop_oneof![
        (0usize..3).prop_map(StorageStep::Create),
        (0usize..3).prop_map(StorageStep::Destroy),
        (0usize..3, 1u64..512 * 1024).prop_map(|(i, bytes)| StorageStep::Write(i, bytes)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_owner_usage_never_exceeds_quota(steps in proptest::collection::vec(storage_step(), 1..32)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let h = Harness::builder().quota(Quota::Bytes(MIB)).build();
            let u1 = user("u1");
            let names = ["w0", "w1", "w2"];
            let mut live = HashSet::new();

            for step in steps {
                match step {
                    StorageStep::Create(i) => {
                        let before = h.orchestrator.storage_info(&u1).await.unwrap();
                        match h.orchestrator.create(&u1, dev_request(names[i], "u1")).await {
                            Ok(_) => {
                                live.insert(names[i]);
                            }
                            Err(OrchestratorError::Storage(e)) => {
                                prop_assert_eq!(e.kind, StorageErrorKind::QuotaExceeded);
                                prop_assert_eq!(before.available_bytes, 0);
                            }
                            Err(OrchestratorError::Validation(e)) => {
                                prop_assert_eq!(e.kind, ValidationKind::NameInUse);
                                prop_assert!(live.contains(names[i]));
                            }
                            Err(other) => prop_assert!(false, "unexpected {:?}", other),
                        }
                    }
                    StorageStep::Destroy(i) => {
                        match h.orchestrator.destroy(&u1, names[i]).await {
                            Ok(outcome) => {
                                prop_assert!(outcome.storage_released);
                                live.remove(names[i]);
                            }
                            Err(OrchestratorError::NotFound { .. }) => prop_assert!(!live.contains(names[i])),
                            Err(other) => prop_assert!(false, "unexpected {:?}", other),
                        }
                    }
                    StorageStep::Write(i, bytes) => {
                        if live.contains(names[i]) {
                            let _ = h.volumes.write(&workspace_dataset("u1", names[i]), bytes);
                        }
                    }
                }

                let usage = h.orchestrator.storage_info(&u1).await.unwrap();
                prop_assert!(usage.used_bytes <= MIB);
                for name in names {
                    prop_assert_eq!(
                        h.volumes.contains(&workload_dataset("u1", name)),
                        live.contains(name),
                        "dataset presence for {}",
                        name
                    );
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
