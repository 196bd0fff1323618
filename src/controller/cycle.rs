//! One cleanup cycle across every configured namespace
//!
//! Namespaces are processed independently with bounded concurrency. A
//! namespace that cannot be scanned is reported and skipped; nothing in it
//! is deleted.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::cluster::ClusterApi;
use crate::config::ResolvedConfig;
use crate::crd::{CycleSummary, NamespaceError, ResourceResult};
use crate::gc::{execute, select, ExecutorConfig, InventoryScan, SelectionPolicy};
use crate::Error;

/// Everything one cycle produced
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleReport {
    /// Per-resource outcomes, sorted by namespace, kind and name
    pub results: Vec<ResourceResult>,
    /// Namespaces that could not be scanned, in configured order
    pub namespace_errors: Vec<NamespaceError>,
    /// Set when the cycle as a whole failed
    pub fatal: Option<String>,
}

impl CycleReport {
    /// Outcome counts
    pub fn summary(&self) -> CycleSummary {
        CycleSummary::from_results(&self.results)
    }
}

async fn process_namespace(
    cluster: &dyn ClusterApi,
    namespace: &str,
    policy: &SelectionPolicy,
    executor: &ExecutorConfig,
) -> Result<Vec<ResourceResult>, Error> {
    let scan = InventoryScan::new(cluster, &executor.retry)
        .scan(namespace)
        .await?;

    let selection = select(&scan, policy);
    debug!(
        namespace = %namespace,
        candidates = selection.candidates.len(),
        skipped = selection.results.len(),
        "candidates selected"
    );

    let mut results = selection.results;
    results.extend(execute(cluster, selection.candidates, executor).await);
    Ok(results)
}

/// Run scan, select and execute for every namespace in `config`
pub async fn run_cycle(
    cluster: &dyn ClusterApi,
    config: &ResolvedConfig,
    now: DateTime<Utc>,
) -> CycleReport {
    let policy = SelectionPolicy::new(
        now,
        config.unused_threshold_hours,
        config.exclude_patterns.clone(),
    );
    let executor = ExecutorConfig {
        dry_run: config.dry_run,
        concurrency: config.max_concurrency,
        retry: config.retry(),
    };

    let outcomes: Vec<(usize, String, Result<Vec<ResourceResult>, Error>)> =
        stream::iter(config.namespaces.clone().into_iter().enumerate())
            .map(|(idx, ns)| {
                let policy = &policy;
                let executor = &executor;
                async move {
                    let outcome = process_namespace(cluster, &ns, policy, executor).await;
                    (idx, ns, outcome)
                }
            })
            .buffer_unordered(config.max_concurrency.max(1))
            .collect()
            .await;

    let mut report = CycleReport::default();
    let mut failures: Vec<(usize, NamespaceError, bool)> = Vec::new();

    for (idx, namespace, outcome) in outcomes {
        match outcome {
            Ok(results) => report.results.extend(results),
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "skipping namespace");
                failures.push((
                    idx,
                    NamespaceError {
                        namespace,
                        error: e.to_string(),
                    },
                    e.is_forbidden(),
                ));
            }
        }
    }

    let total = config.namespaces.len();
    if total > 0 && failures.len() == total && failures.iter().all(|(_, _, forbidden)| *forbidden)
    {
        report.fatal = Some(format!(
            "not authorized to scan any of the {} configured namespace(s)",
            total
        ));
    }

    failures.sort_by_key(|(idx, _, _)| *idx);
    report.namespace_errors = failures.into_iter().map(|(_, e, _)| e).collect();

    report.results.sort_by(|a, b| {
        (&a.namespace, a.kind, &a.name).cmp(&(&b.namespace, b.kind, &b.name))
    });

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::crd::{Outcome, ResourceKind};
    use crate::error::api_error;
    use crate::gc::ManagedResource;
    use chrono::Duration;
    use std::sync::Arc;

    fn config(namespaces: &[&str], dry_run: bool) -> ResolvedConfig {
        ResolvedConfig {
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            dry_run,
            delete_attempts: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn one_bad_namespace_does_not_block_others() {
        let now = Utc::now();
        let old = Some(now - Duration::hours(10));

        let mut cluster = MockClusterApi::new();
        cluster.expect_list_managed_resources().returning(move |ns| {
            if ns == "broken" {
                Err(api_error(404, "NotFound"))
            } else {
                Ok(vec![ManagedResource::secret(ns, "orphan-secret", old)])
            }
        });
        cluster
            .expect_list_workload_roots()
            .returning(|_| Ok(vec![]));
        cluster.expect_delete_resource().never();

        let report = run_cycle(&cluster, &config(&["default", "broken", "staging"], true), now).await;

        assert!(report.fatal.is_none());
        assert_eq!(report.namespace_errors.len(), 1);
        assert_eq!(report.namespace_errors[0].namespace, "broken");
        let names: Vec<_> = report
            .results
            .iter()
            .map(|r| (r.namespace.as_str(), r.kind, r.outcome))
            .collect();
        assert_eq!(
            names,
            vec![
                ("default", ResourceKind::Secret, Outcome::WouldDelete),
                ("staging", ResourceKind::Secret, Outcome::WouldDelete),
            ]
        );
        assert_eq!(report.summary().would_delete, 2);
    }

    #[tokio::test]
    async fn cycle_runs_on_a_spawned_task() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_list_managed_resources()
            .returning(|ns| Ok(vec![ManagedResource::config_map(ns, "orphan", None)]));
        cluster
            .expect_list_workload_roots()
            .returning(|_| Ok(vec![]));
        let cluster: Arc<dyn ClusterApi> = Arc::new(cluster);
        let config = config(&["a", "b"], true);

        let report = tokio::spawn(async move {
            run_cycle(cluster.as_ref(), &config, Utc::now()).await
        })
        .await
        .unwrap();

        assert!(report.namespace_errors.is_empty());
        let namespaces: Vec<_> = report.results.iter().map(|r| r.namespace.as_str()).collect();
        assert_eq!(namespaces, vec!["a", "b"]);
        assert!(report
            .results
            .iter()
            .all(|r| r.outcome == Outcome::SkippedTooYoung));
    }

    /// Story: the controller lost its RBAC. Every namespace is forbidden,
    /// so the cycle itself fails.
    #[tokio::test]
    async fn story_forbidden_everywhere_is_fatal() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_list_managed_resources()
            .returning(|_| Err(api_error(403, "Forbidden")));
        cluster
            .expect_list_workload_roots()
            .returning(|_| Err(api_error(403, "Forbidden")));

        let report = run_cycle(&cluster, &config(&["a", "b"], false), Utc::now()).await;
        assert!(report.fatal.is_some());
        assert_eq!(
            report
                .namespace_errors
                .iter()
                .map(|e| e.namespace.as_str())
                .collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn mixed_failures_are_not_fatal() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_list_managed_resources().returning(|ns| {
            if ns == "a" {
                Err(api_error(403, "Forbidden"))
            } else {
                Err(api_error(404, "NotFound"))
            }
        });
        cluster
            .expect_list_workload_roots()
            .returning(|_| Ok(vec![]));

        let report = run_cycle(&cluster, &config(&["a", "b"], false), Utc::now()).await;
        assert!(report.fatal.is_none());
        assert_eq!(report.namespace_errors.len(), 2);
    }

    #[tokio::test]
    async fn real_run_deletes_candidates() {
        let now = Utc::now();
        let old = Some(now - Duration::hours(10));
        let mut cluster = MockClusterApi::new();
        cluster.expect_list_managed_resources().returning(move |ns| {
            Ok(vec![
                ManagedResource::config_map(ns, "kube-root-ca.crt", old),
                ManagedResource::secret(ns, "orphan-secret", old),
            ])
        });
        cluster
            .expect_list_workload_roots()
            .returning(|_| Ok(vec![]));
        cluster
            .expect_delete_resource()
            .withf(|r| r.name == "orphan-secret")
            .times(1)
            .returning(|_| Ok(()));

        let report = run_cycle(&cluster, &config(&["default"], false), now).await;
        let summary = report.summary();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.skipped_excluded, 1);
    }
}
