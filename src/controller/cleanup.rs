//! Cleanup controller implementation
//!
//! `reconcile` never runs a cycle itself. It decides whether a Cleanup has a
//! pending trigger (interval elapsed, trigger annotation changed, or
//! `spec.force` on a new generation) and hands it to the [`Dispatcher`],
//! which admits at most one cycle per Cleanup. Admitted cycles run on their
//! own task so watch events keep flowing and can be coalesced while a cycle
//! is in progress.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::cycle::{run_cycle, CycleReport};
use super::dispatcher::{Admission, CycleMark, Dispatcher};
use super::status::{write_status, StatusWrite};
use crate::cluster::ClusterApi;
use crate::config::ResolvedConfig;
use crate::crd::{Cleanup, CleanupStatus, CycleState};
use crate::health::HealthMonitor;
use crate::retry::call_with_retry;
use crate::{Error, DEFAULT_HEALTH_MULTIPLIER};

/// Controller context shared across reconciliations and cycle workers
pub struct Context {
    /// Cluster access (trait object for testability)
    pub cluster: Arc<dyn ClusterApi>,
    /// Operator configuration; each Cleanup spec is layered on top per cycle
    pub config: ResolvedConfig,
    /// Single-flight gate
    pub dispatcher: Dispatcher,
    /// Progress tracking for liveness
    pub health: Arc<HealthMonitor>,
}

impl Context {
    /// Create a new controller context
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        config: ResolvedConfig,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            cluster,
            config,
            dispatcher: Dispatcher::new(),
            health,
        }
    }

    /// Create a context for testing with its own health monitor
    pub fn for_testing(cluster: Arc<dyn ClusterApi>, config: ResolvedConfig) -> Self {
        let health = Arc::new(HealthMonitor::new(
            config.interval,
            DEFAULT_HEALTH_MULTIPLIER,
        ));
        Self::new(cluster, config, health)
    }
}

/// Why a cycle should start
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// The trigger annotation has a value no cycle has consumed
    Manual(String),
    /// `spec.force` is set on a generation no cycle has run against
    Force(i64),
    /// The interval elapsed since the last cycle started (or none ever ran)
    Interval,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual(token) => write!(f, "annotation ({})", token),
            Self::Force(generation) => write!(f, "force (generation {})", generation),
            Self::Interval => write!(f, "interval"),
        }
    }
}

/// Identity used for single-flight: `namespace/name`
pub fn cleanup_key(cleanup: &Cleanup) -> String {
    format!(
        "{}/{}",
        cleanup.namespace().unwrap_or_default(),
        cleanup.name_any()
    )
}

/// Start time of the most recent cycle, from status or this process' memory
fn last_start(cleanup: &Cleanup, mark: Option<&CycleMark>) -> Option<DateTime<Utc>> {
    let from_mark = mark.and_then(|m| m.started_at);
    match (cleanup.last_run_start(), from_mark) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Decide whether `cleanup` has a trigger no cycle has consumed yet
///
/// A trigger counts as consumed if either the persisted status or the
/// in-memory mark of the last cycle recorded it.
pub fn pending_trigger(
    cleanup: &Cleanup,
    mark: Option<&CycleMark>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Option<Trigger> {
    let status = cleanup.status.as_ref();

    if let Some(token) = cleanup.trigger_token() {
        let seen_in_status = status.and_then(|s| s.observed_trigger.as_deref()) == Some(token);
        let seen_in_mark = mark.and_then(|m| m.trigger.as_deref()) == Some(token);
        if !seen_in_status && !seen_in_mark {
            return Some(Trigger::Manual(token.to_string()));
        }
    }

    if cleanup.spec.force {
        let generation = cleanup.metadata.generation.unwrap_or_default();
        let seen_in_status = status.and_then(|s| s.observed_generation) == Some(generation);
        let seen_in_mark = mark.and_then(|m| m.generation) == Some(generation);
        if !seen_in_status && !seen_in_mark {
            return Some(Trigger::Force(generation));
        }
    }

    match last_start(cleanup, mark) {
        None => Some(Trigger::Interval),
        Some(started) => {
            let elapsed = (now - started).to_std().unwrap_or_default();
            (elapsed >= interval).then_some(Trigger::Interval)
        }
    }
}

/// Time until the interval trigger fires, at least one second
pub fn next_run_in(
    cleanup: &Cleanup,
    mark: Option<&CycleMark>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Duration {
    let remaining = match last_start(cleanup, mark) {
        None => Duration::ZERO,
        Some(started) => {
            let elapsed = (now - started).to_std().unwrap_or_default();
            interval.saturating_sub(elapsed)
        }
    };
    remaining.max(Duration::from_secs(1))
}

/// Reconcile a Cleanup
///
/// Dispatches a cycle if a trigger is pending and requeues for the next
/// interval. Triggers that arrive while a cycle runs are coalesced into at
/// most one rerun.
#[instrument(skip(cleanup, ctx), fields(cleanup = %cleanup.name_any()))]
pub async fn reconcile(cleanup: Arc<Cleanup>, ctx: Arc<Context>) -> Result<Action, Error> {
    if cleanup.namespace().is_none() {
        return Err(Error::validation_for_field(
            cleanup.name_any(),
            "metadata.namespace",
            "Cleanup must be namespaced",
        ));
    }

    let key = cleanup_key(&cleanup);
    let interval = ctx.config.interval;
    let now = Utc::now();
    let mark = ctx.dispatcher.mark(&key);

    let Some(trigger) = pending_trigger(&cleanup, mark.as_ref(), interval, now) else {
        let wait = next_run_in(&cleanup, mark.as_ref(), interval, now);
        debug!(next_run_secs = wait.as_secs(), "no trigger pending");
        return Ok(Action::requeue(wait));
    };

    match ctx.dispatcher.try_begin(&key) {
        Admission::Started => {
            info!(%trigger, "starting cleanup cycle");
            // Claim the trigger now; the worker refines the mark once it
            // has read the latest object.
            ctx.dispatcher.record_mark(&key, mark_of(&cleanup, now));
            spawn_worker(ctx.clone(), cleanup.clone(), key);
            Ok(Action::requeue(interval))
        }
        Admission::Coalesced => {
            info!(%trigger, "cycle already running, rerun queued");
            Ok(Action::requeue(interval))
        }
        Admission::AlreadyPending => {
            debug!(%trigger, "cycle already running, rerun already queued");
            Ok(Action::requeue(interval))
        }
    }
}

/// Error policy for the Cleanup controller
///
/// Cycle failures are reported in status by the worker; only bad objects
/// end up here.
pub fn error_policy(cleanup: Arc<Cleanup>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cleanup = %cleanup.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(60))
}

/// Run cycles for one Cleanup until no rerun is pending
///
/// `seen` is the object as the reconcile that admitted the cycle saw it.
pub fn spawn_worker(ctx: Arc<Context>, seen: Arc<Cleanup>, key: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match run_once(&ctx, &seen, &key).await {
                CycleEnd::Finished => {}
                CycleEnd::Abandoned => {
                    info!(cleanup = %key, "Cleanup deleted, abandoning cycle");
                    ctx.dispatcher.forget(&key);
                    ctx.health.cycle_finished(&key);
                    return;
                }
            }
            if !ctx.dispatcher.finish(&key) {
                return;
            }
            info!(cleanup = %key, "running coalesced rerun");
        }
    })
}

/// How one cycle ended for the worker loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleEnd {
    /// Ran to Completed or Failed
    Finished,
    /// The Cleanup no longer exists
    Abandoned,
}

fn mark_of(cleanup: &Cleanup, started_at: DateTime<Utc>) -> CycleMark {
    CycleMark {
        trigger: cleanup.trigger_token().map(str::to_string),
        generation: Some(cleanup.metadata.generation.unwrap_or_default()),
        started_at: Some(started_at),
    }
}

fn stamp(status: &mut CleanupStatus, mark: &CycleMark) {
    status.observed_trigger = mark.trigger.clone();
    status.observed_generation = mark.generation;
    status.last_run_start_time = mark.started_at;
}

/// Run a single cycle: read the latest spec, mark Running, scan and delete,
/// then write the final status
pub async fn run_once(ctx: &Context, seen: &Cleanup, key: &str) -> CycleEnd {
    let namespace = seen.namespace().unwrap_or_default();
    let name = seen.name_any();
    let cluster = ctx.cluster.as_ref();
    let started_at = Utc::now();
    ctx.health.cycle_started(key);

    // Always work from the latest spec, so a coalesced rerun sees edits
    // made while the previous cycle ran.
    let retry = ctx.config.retry();
    let read = call_with_retry(&retry, "read Cleanup", || {
        cluster.get_cleanup(&namespace, &name)
    })
    .await;
    let cleanup = match read {
        Ok(c) => c,
        Err(e) if e.is_not_found() => return CycleEnd::Abandoned,
        Err(e) => {
            // Consume the trigger from what the reconcile saw so a broken
            // read does not spin.
            let mark = mark_of(seen, started_at);
            ctx.dispatcher.record_mark(key, mark.clone());
            let mut status = seen.status.clone().unwrap_or_default();
            status.state = CycleState::Failed;
            status.error = Some(format!("cannot read Cleanup: {}", e));
            status.last_run_end_time = Some(Utc::now());
            stamp(&mut status, &mark);
            error!(cleanup = %key, error = %e, "cleanup cycle failed");
            let end = finish_status(ctx, &namespace, &name, None, &status).await;
            ctx.health.cycle_finished(key);
            return end;
        }
    };

    let mark = mark_of(&cleanup, started_at);
    ctx.dispatcher.record_mark(key, mark.clone());
    let config = ctx.config.for_request(&cleanup.spec);

    let mut running = cleanup.status.clone().unwrap_or_default();
    running.state = CycleState::Running;
    running.error = None;
    stamp(&mut running, &mark);

    let mut resource_version = cleanup.metadata.resource_version.clone();
    match write_status(
        cluster,
        &namespace,
        &name,
        resource_version.clone(),
        &running,
        config.status_retries,
    )
    .await
    {
        Ok(StatusWrite::Written(updated)) => {
            resource_version = updated.metadata.resource_version;
        }
        Ok(StatusWrite::GaveUp) => {}
        Err(e) if e.is_not_found() => return CycleEnd::Abandoned,
        Err(e) => warn!(cleanup = %key, error = %e, "failed to mark cycle running"),
    }

    info!(
        cleanup = %key,
        namespaces = ?config.namespaces,
        dry_run = config.dry_run,
        unused_threshold_hours = config.unused_threshold_hours,
        "cleanup cycle started"
    );

    let report = run_cycle(cluster, &config, started_at).await;
    let status = final_status(&mark, report, Utc::now());

    let summary = status.summary.clone().unwrap_or_default();
    info!(
        cleanup = %key,
        state = %status.state,
        deleted = summary.deleted,
        would_delete = summary.would_delete,
        skipped_referenced = summary.skipped_referenced,
        skipped_excluded = summary.skipped_excluded,
        skipped_too_young = summary.skipped_too_young,
        failed = summary.failed,
        namespace_errors = status.namespace_errors.len(),
        "cleanup cycle completed"
    );

    let end = finish_status(ctx, &namespace, &name, resource_version, &status).await;
    ctx.health.cycle_finished(key);
    end
}

/// Build the terminal status for a cycle
pub fn final_status(
    mark: &CycleMark,
    report: CycleReport,
    finished_at: DateTime<Utc>,
) -> CleanupStatus {
    let state = if report.fatal.is_some() {
        CycleState::Failed
    } else {
        CycleState::Completed
    };

    let mut status = CleanupStatus::with_state(state).results(report.results);
    status.namespace_errors = report.namespace_errors;
    status.error = report.fatal;
    status.last_run_end_time = Some(finished_at);
    stamp(&mut status, mark);
    status
}

async fn finish_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    resource_version: Option<String>,
    status: &CleanupStatus,
) -> CycleEnd {
    match write_status(
        ctx.cluster.as_ref(),
        namespace,
        name,
        resource_version,
        status,
        ctx.config.status_retries,
    )
    .await
    {
        Ok(_) => CycleEnd::Finished,
        Err(e) if e.is_not_found() => CycleEnd::Abandoned,
        Err(e) => {
            warn!(cleanup = %name, namespace = %namespace, error = %e, "failed to write cycle status");
            CycleEnd::Finished
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::crd::{CleanupSpec, NamespaceError, Outcome, ResourceKind, ResourceResult};
    use crate::TRIGGER_ANNOTATION;
    use chrono::Duration as ChronoDuration;

    const HOUR: Duration = Duration::from_secs(3600);

    fn cleanup(spec: CleanupSpec) -> Cleanup {
        let mut cr = Cleanup::new("nightly", spec);
        cr.metadata.namespace = Some("ops".into());
        cr.metadata.generation = Some(1);
        cr
    }

    fn with_status(mut cr: Cleanup, status: CleanupStatus) -> Cleanup {
        cr.status = Some(status);
        cr
    }

    fn annotate(mut cr: Cleanup, token: &str) -> Cleanup {
        cr.metadata.annotations = Some(
            [(TRIGGER_ANNOTATION.to_string(), token.to_string())]
                .into_iter()
                .collect(),
        );
        cr
    }

    fn ran_at(started: DateTime<Utc>) -> CleanupStatus {
        CleanupStatus {
            state: CycleState::Completed,
            last_run_start_time: Some(started),
            observed_generation: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn never_run_triggers_immediately() {
        let cr = cleanup(CleanupSpec::default());
        assert_eq!(
            pending_trigger(&cr, None, HOUR, Utc::now()),
            Some(Trigger::Interval)
        );
        assert_eq!(next_run_in(&cr, None, HOUR, Utc::now()), Duration::from_secs(1));
    }

    #[test]
    fn interval_trigger_waits_for_the_interval() {
        let now = Utc::now();
        let cr = with_status(
            cleanup(CleanupSpec::default()),
            ran_at(now - ChronoDuration::minutes(30)),
        );
        assert_eq!(pending_trigger(&cr, None, HOUR, now), None);
        let wait = next_run_in(&cr, None, HOUR, now);
        assert!(wait <= Duration::from_secs(30 * 60) && wait > Duration::from_secs(29 * 60));

        let later = now + ChronoDuration::minutes(31);
        assert_eq!(pending_trigger(&cr, None, HOUR, later), Some(Trigger::Interval));
    }

    #[test]
    fn in_memory_mark_counts_as_last_start() {
        let now = Utc::now();
        let cr = with_status(
            cleanup(CleanupSpec::default()),
            ran_at(now - ChronoDuration::hours(5)),
        );
        let mark = CycleMark {
            started_at: Some(now - ChronoDuration::minutes(1)),
            generation: Some(1),
            trigger: None,
        };
        assert_eq!(pending_trigger(&cr, Some(&mark), HOUR, now), None);
    }

    /// Story: an operator bumps the trigger annotation to run a cycle now.
    /// It fires once; the same value never fires again.
    #[test]
    fn story_annotation_change_fires_once() {
        let now = Utc::now();
        let recent = ran_at(now - ChronoDuration::minutes(5));
        let cr = annotate(with_status(cleanup(CleanupSpec::default()), recent.clone()), "t1");
        assert_eq!(
            pending_trigger(&cr, None, HOUR, now),
            Some(Trigger::Manual("t1".into()))
        );

        // Consumed by a cycle in this process, status not yet updated
        let mark = CycleMark {
            trigger: Some("t1".into()),
            generation: Some(1),
            started_at: Some(now),
        };
        assert_eq!(pending_trigger(&cr, Some(&mark), HOUR, now), None);

        // Consumed according to status
        let mut observed = recent;
        observed.observed_trigger = Some("t1".into());
        let cr = annotate(with_status(cleanup(CleanupSpec::default()), observed), "t1");
        assert_eq!(pending_trigger(&cr, None, HOUR, now), None);
    }

    #[test]
    fn force_fires_once_per_generation() {
        let now = Utc::now();
        let spec = CleanupSpec {
            force: true,
            ..Default::default()
        };
        let mut cr = with_status(cleanup(spec), ran_at(now - ChronoDuration::minutes(5)));
        assert_eq!(pending_trigger(&cr, None, HOUR, now), None);

        cr.metadata.generation = Some(2);
        assert_eq!(pending_trigger(&cr, None, HOUR, now), Some(Trigger::Force(2)));
    }

    #[test]
    fn final_status_reports_completed_or_failed() {
        let now = Utc::now();
        let mark = CycleMark {
            trigger: Some("t1".into()),
            generation: Some(4),
            started_at: Some(now - ChronoDuration::seconds(3)),
        };
        let report = CycleReport {
            results: vec![ResourceResult {
                kind: ResourceKind::Secret,
                namespace: "default".into(),
                name: "orphan-secret".into(),
                outcome: Outcome::Deleted,
                error: None,
            }],
            namespace_errors: vec![NamespaceError {
                namespace: "gone".into(),
                error: "not found".into(),
            }],
            fatal: None,
        };

        let status = final_status(&mark, report.clone(), now);
        assert_eq!(status.state, CycleState::Completed);
        assert_eq!(status.summary.as_ref().map(|s| s.deleted), Some(1));
        assert_eq!(status.namespace_errors.len(), 1);
        assert_eq!(status.observed_trigger.as_deref(), Some("t1"));
        assert_eq!(status.observed_generation, Some(4));
        assert_eq!(status.last_run_end_time, Some(now));
        assert!(status.error.is_none());

        let failed = final_status(
            &mark,
            CycleReport {
                fatal: Some("not authorized".into()),
                ..report
            },
            now,
        );
        assert_eq!(failed.state, CycleState::Failed);
        assert_eq!(failed.error.as_deref(), Some("not authorized"));
        // Partial results are still reported
        assert_eq!(failed.results.len(), 1);
    }

    #[tokio::test]
    async fn reconcile_without_trigger_touches_nothing() {
        let now = Utc::now();
        let cluster = MockClusterApi::new();
        let ctx = Arc::new(Context::for_testing(
            Arc::new(cluster),
            ResolvedConfig::default(),
        ));
        let cr = with_status(
            cleanup(CleanupSpec::default()),
            ran_at(now - ChronoDuration::minutes(10)),
        );

        reconcile(Arc::new(cr), ctx.clone()).await.unwrap();
        assert!(!ctx.dispatcher.is_running("ops/nightly"));
    }

    #[tokio::test]
    async fn reconcile_rejects_cluster_scoped_objects() {
        let ctx = Arc::new(Context::for_testing(
            Arc::new(MockClusterApi::new()),
            ResolvedConfig::default(),
        ));
        let cr = Cleanup::new("stray", CleanupSpec::default());
        let err = reconcile(Arc::new(cr), ctx).await.unwrap_err();
        match err {
            Error::Validation { field, message, .. } => {
                assert_eq!(field.as_deref(), Some("metadata.namespace"));
                assert_eq!(message, "Cleanup must be namespaced");
            }
            other => panic!("Expected Validation variant, got {other:?}"),
        }
    }

    #[test]
    fn key_is_namespace_and_name() {
        assert_eq!(cleanup_key(&cleanup(CleanupSpec::default())), "ops/nightly");
    }
}
