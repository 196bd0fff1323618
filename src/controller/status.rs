//! Status write-back with optimistic concurrency
//!
//! Each write carries the resourceVersion last seen. If the object moved on
//! (409 Conflict), the object is re-read and the same status is written
//! again, a bounded number of times. After that the write is dropped with a
//! warning so a busy object can never wedge the next cycle.

use tracing::{debug, warn};

use crate::cluster::ClusterApi;
use crate::crd::{Cleanup, CleanupStatus};
use crate::Error;

/// How a status write ended
#[derive(Clone, Debug)]
pub enum StatusWrite {
    /// Written; the updated object
    Written(Box<Cleanup>),
    /// Conflicts persisted past the retry budget; nothing was written
    GaveUp,
}

/// Write `status` to a Cleanup, retrying on conflict
///
/// # Arguments
///
/// * `resource_version` - version the caller last saw, if any
/// * `retries` - conflict retries after the first attempt
///
/// Errors other than 409 are returned as-is; the caller decides whether a
/// 404 means "abandon".
pub async fn write_status(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    resource_version: Option<String>,
    status: &CleanupStatus,
    retries: u32,
) -> Result<StatusWrite, Error> {
    let mut resource_version = resource_version;
    let mut attempt = 0u32;

    loop {
        match cluster
            .patch_cleanup_status(namespace, name, resource_version.clone(), status)
            .await
        {
            Ok(updated) => {
                debug!(cleanup = %name, state = %status.state, "status written");
                return Ok(StatusWrite::Written(Box::new(updated)));
            }
            Err(e) if e.is_conflict() => {
                if attempt >= retries {
                    warn!(
                        cleanup = %name,
                        namespace = %namespace,
                        attempts = attempt + 1,
                        "status write kept conflicting, giving up"
                    );
                    return Ok(StatusWrite::GaveUp);
                }
                attempt += 1;
                debug!(cleanup = %name, attempt, "status conflict, re-reading");
                let fresh = cluster.get_cleanup(namespace, name).await?;
                resource_version = fresh.metadata.resource_version;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::crd::{CleanupSpec, CycleState};
    use crate::error::api_error;

    fn cleanup_at(rv: &str) -> Cleanup {
        let mut cr = Cleanup::new("nightly", CleanupSpec::default());
        cr.metadata.namespace = Some("ops".into());
        cr.metadata.resource_version = Some(rv.into());
        cr
    }

    #[tokio::test]
    async fn writes_with_the_given_version() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_patch_cleanup_status()
            .withf(|ns, name, rv, _| ns == "ops" && name == "nightly" && rv.as_deref() == Some("7"))
            .times(1)
            .returning(|_, _, _, _| Ok(cleanup_at("8")));

        let status = CleanupStatus::with_state(CycleState::Running);
        let outcome = write_status(&cluster, "ops", "nightly", Some("7".into()), &status, 3)
            .await
            .unwrap();
        assert!(matches!(outcome, StatusWrite::Written(_)));
    }

    /// Story: someone edits the Cleanup annotations while the cycle writes
    /// its result. The write re-reads the object and lands on the second try.
    #[tokio::test]
    async fn story_conflict_is_retried_with_fresh_version() {
        let mut cluster = MockClusterApi::new();
        let mut seq = mockall::Sequence::new();
        cluster
            .expect_patch_cleanup_status()
            .withf(|_, _, rv, _| rv.as_deref() == Some("7"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Err(api_error(409, "Conflict")));
        cluster
            .expect_get_cleanup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(cleanup_at("9")));
        cluster
            .expect_patch_cleanup_status()
            .withf(|_, _, rv, _| rv.as_deref() == Some("9"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(cleanup_at("10")));

        let status = CleanupStatus::with_state(CycleState::Completed);
        let outcome = write_status(&cluster, "ops", "nightly", Some("7".into()), &status, 3)
            .await
            .unwrap();
        assert!(matches!(outcome, StatusWrite::Written(_)));
    }

    #[tokio::test]
    async fn persistent_conflict_gives_up_after_budget() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_patch_cleanup_status()
            .times(3)
            .returning(|_, _, _, _| Err(api_error(409, "Conflict")));
        cluster
            .expect_get_cleanup()
            .times(2)
            .returning(|_, _| Ok(cleanup_at("1")));

        let status = CleanupStatus::with_state(CycleState::Completed);
        let outcome = write_status(&cluster, "ops", "nightly", None, &status, 2)
            .await
            .unwrap();
        assert!(matches!(outcome, StatusWrite::GaveUp));
    }

    #[tokio::test]
    async fn not_found_is_returned() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_patch_cleanup_status()
            .returning(|_, _, _, _| Err(api_error(404, "NotFound")));

        let status = CleanupStatus::default();
        let err = write_status(&cluster, "ops", "gone", None, &status, 3)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
