/*!
 * Ownership Guard
 * Requester identity checks at the entry-point boundary
 */

use crate::core::{OwnershipError, Requester, WorkloadRecord};
use tracing::warn;

/// Gates operations on existing workloads by requester identity
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipGuard;

impl OwnershipGuard {
    pub fn new() -> Self {
        Self
    }

    /// Reject unless `requester` owns `workload`
    pub fn check(&self, requester: &Requester, workload: &str, owner: &str) -> Result<(), OwnershipError> {
        if requester.as_str() == owner {
            return Ok(());
        }
        warn!(workload, requester = %requester, "Rejected operation on a foreign workload");
        Err(OwnershipError::NotOwner {
            workload: workload.to_string(),
            requester: requester.to_string(),
        })
    }

    /// Keep only the records owned by `requester`
    pub fn filter<I>(&self, requester: &Requester, records: I) -> Vec<WorkloadRecord>
    where
        I: IntoIterator<Item = WorkloadRecord>,
    {
        records
            .into_iter()
            .filter(|r| r.owner == requester.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check() {
        let guard = OwnershipGuard::new();
        assert!(guard.check(&Requester::new("u1"), "dev1", "u1").is_ok());

        let err = guard.check(&Requester::new("u2"), "dev1", "u1").unwrap_err();
        assert_eq!(
            err,
            OwnershipError::NotOwner {
                workload: "dev1".into(),
                requester: "u2".into()
            }
        );
    }

    #[test]
    fn test_filter_by_owner() {
        let guard = OwnershipGuard::new();
        let records = vec![
            WorkloadRecord::new("a", "u1", vec![]),
            WorkloadRecord::new("b", "u2", vec![]),
            WorkloadRecord::new("c", "u1", vec![]),
        ];
        let names: Vec<String> = guard
            .filter(&Requester::new("u1"), records)
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
