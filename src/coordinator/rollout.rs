//! Rolling config changes across the fleet
//!
//! ```text
//!            start_rolling                 all members converged
//!   Idle ──────────────────▶ Rolling ────────────────────────────▶ Committed ─▶ Idle
//!                               │  cancel(ForceCommit)                ▲
//!                               ├─────────────────────────────────────┘
//!                               │  cancel(Rollback) / timeout
//!                               └────────────────────────────────────▶ RolledBack ─▶ Idle
//! ```
//!
//! At most one rollout is in flight per store. Start, cancel, and the final
//! commit all run under the store's write lock; fleet probing runs in a
//! background task that holds no lock while waiting on members.

use crate::common::{format_elapsed, percent, Error, Result, RolloutConfig};
use crate::coordinator::fleet::FleetProbe;
use crate::coordinator::store::{ConfigStore, VersionStamp, WriteGuard};
use crate::model::ConfigSnapshot;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

/// How to end a rollout early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    /// Discard the candidate; the committed config stays as it was
    Rollback,
    /// Commit the candidate now, whatever the fleet has converged on
    ForceCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    Idle,
    Rolling,
    Committed,
    RolledBack,
}

impl std::fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloutPhase::Idle => write!(f, "idle"),
            RolloutPhase::Rolling => write!(f, "rolling"),
            RolloutPhase::Committed => write!(f, "committed"),
            RolloutPhase::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// How a finished rollout ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RolloutOutcome {
    Committed {
        rollout_id: Uuid,
        stamp: VersionStamp,
        forced: bool,
        finished_at: DateTime<Utc>,
    },
    RolledBack {
        rollout_id: Uuid,
        reason: String,
        finished_at: DateTime<Utc>,
    },
}

impl RolloutOutcome {
    pub fn phase(&self) -> RolloutPhase {
        match self {
            RolloutOutcome::Committed { .. } => RolloutPhase::Committed,
            RolloutOutcome::RolledBack { .. } => RolloutPhase::RolledBack,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberProgress {
    /// Reachable, not yet running the candidate
    Pending,
    Converged,
    /// No successful answer within the member timeout
    Unresponsive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub member: String,
    pub progress: MemberProgress,
    pub last_error: Option<String>,
}

/// Point-in-time view of an active rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutProgress {
    pub rollout_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub baseline: VersionStamp,
    pub fingerprint: String,
    pub members: Vec<MemberStatus>,
    /// The final commit hit a moved baseline; only a rollback can end this rollout
    pub conflicted: bool,
}

impl RolloutProgress {
    pub fn converged(&self) -> usize {
        self.count(MemberProgress::Converged)
    }

    pub fn count(&self, progress: MemberProgress) -> usize {
        self.members.iter().filter(|m| m.progress == progress).count()
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        let total = self.members.len();
        let converged = self.converged();
        let mut line = format!(
            "rolling: {}/{} members converged ({}%) after {}",
            converged,
            total,
            percent(converged, total),
            format_elapsed(std::time::Duration::from_millis(self.elapsed_ms)),
        );

        let unresponsive: Vec<&str> = self
            .members
            .iter()
            .filter(|m| m.progress == MemberProgress::Unresponsive)
            .map(|m| m.member.as_str())
            .collect();
        if !unresponsive.is_empty() {
            line.push_str(&format!("; unresponsive: {}", unresponsive.join(", ")));
        }
        if self.conflicted {
            line.push_str("; commit blocked: config changed since rollout started, roll back to continue");
        }
        line
    }
}

struct MemberState {
    member: String,
    progress: MemberProgress,
    last_contact: Instant,
    last_error: Option<String>,
}

struct ActiveRollout {
    id: Uuid,
    candidate: ConfigSnapshot,
    fingerprint: String,
    baseline: VersionStamp,
    started_at: DateTime<Utc>,
    started: Instant,
    members: Vec<MemberState>,
    conflicted: bool,
    tracker: Option<JoinHandle<()>>,
}

impl ActiveRollout {
    fn progress(&self) -> RolloutProgress {
        RolloutProgress {
            rollout_id: self.id,
            started_at: self.started_at,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            baseline: self.baseline,
            fingerprint: self.fingerprint.clone(),
            members: self
                .members
                .iter()
                .map(|m| MemberStatus {
                    member: m.member.clone(),
                    progress: m.progress,
                    last_error: m.last_error.clone(),
                })
                .collect(),
            conflicted: self.conflicted,
        }
    }

    fn all_converged(&self) -> bool {
        self.members
            .iter()
            .all(|m| m.progress == MemberProgress::Converged)
    }
}

enum RolloutState {
    Idle,
    Rolling(Box<ActiveRollout>),
}

struct Inner {
    state: RolloutState,
    last_outcome: Option<RolloutOutcome>,
}

struct Shared {
    store: Arc<ConfigStore>,
    probe: Arc<dyn FleetProbe>,
    settings: RolloutConfig,
    inner: Mutex<Inner>,
}

/// Drives one rollout at a time for a [`ConfigStore`]. Cheap to clone.
#[derive(Clone)]
pub struct RolloutCoordinator {
    shared: Arc<Shared>,
}

impl RolloutCoordinator {
    pub fn new(
        store: Arc<ConfigStore>,
        probe: Arc<dyn FleetProbe>,
        settings: RolloutConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                probe,
                settings,
                inner: Mutex::new(Inner {
                    state: RolloutState::Idle,
                    last_outcome: None,
                }),
            }),
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.shared.store
    }

    /// Start rolling `candidate` out. False if a rollout is already running
    /// or the committed config moved underneath this node.
    pub fn start_rolling(&self, candidate: ConfigSnapshot) -> bool {
        match self.begin_rolling(candidate) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("rollout not started: {}", e);
                false
            }
        }
    }

    /// Like [`start_rolling`](Self::start_rolling) but says why it refused.
    ///
    /// Must be called within a tokio runtime; convergence tracking is spawned onto it.
    pub fn begin_rolling(&self, candidate: ConfigSnapshot) -> Result<Uuid> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("rollout needs a tokio runtime: {}", e)))?;

        let writes = self.shared.store.lock_writes();
        let mut inner = self.shared.inner.lock();

        if let RolloutState::Rolling(active) = &inner.state {
            return Err(Error::InvalidState(format!(
                "rollout {} already in progress",
                active.id
            )));
        }
        let baseline = writes.verify_baseline()?;

        let mut members = candidate.servers().hostnames();
        if members.is_empty() {
            members = writes.committed().snapshot.servers().hostnames();
        }

        let id = Uuid::new_v4();
        let now = Instant::now();
        let fingerprint = candidate.fingerprint();
        tracing::info!(
            rollout_id = %id,
            %baseline,
            members = members.len(),
            fingerprint = %fingerprint,
            "rollout started: idle -> rolling"
        );

        let tracker = runtime.spawn(track_convergence(self.shared.clone(), id));
        inner.state = RolloutState::Rolling(Box::new(ActiveRollout {
            id,
            candidate,
            fingerprint,
            baseline,
            started_at: Utc::now(),
            started: now,
            members: members
                .into_iter()
                .map(|member| MemberState {
                    member,
                    progress: MemberProgress::Pending,
                    last_contact: now,
                    last_error: None,
                })
                .collect(),
            conflicted: false,
            tracker: Some(tracker),
        }));

        Ok(id)
    }

    /// End the active rollout early
    pub fn cancel_rolling(&self, mode: CancelMode) -> Result<RolloutOutcome> {
        let writes = self.shared.store.lock_writes();
        let mut inner = self.shared.inner.lock();

        let RolloutState::Rolling(active) = &mut inner.state else {
            return Err(Error::InvalidState("no rollout in progress".into()));
        };

        match mode {
            CancelMode::Rollback => Ok(finish(
                &mut inner,
                Ending::RolledBack("cancelled".into()),
                true,
            )),
            CancelMode::ForceCommit => {
                let stamp = commit_candidate(&writes, active)?;
                Ok(finish(
                    &mut inner,
                    Ending::Committed {
                        stamp,
                        forced: true,
                    },
                    true,
                ))
            }
        }
    }

    pub fn is_rolling(&self) -> bool {
        matches!(self.shared.inner.lock().state, RolloutState::Rolling(_))
    }

    pub fn phase(&self) -> RolloutPhase {
        match self.shared.inner.lock().state {
            RolloutState::Idle => RolloutPhase::Idle,
            RolloutState::Rolling(_) => RolloutPhase::Rolling,
        }
    }

    /// Human readable progress; "idle" when nothing is rolling
    pub fn get_rolling_status(&self) -> String {
        let inner = self.shared.inner.lock();
        match &inner.state {
            RolloutState::Rolling(active) => active.progress().summary(),
            RolloutState::Idle => match &inner.last_outcome {
                None => "idle".to_string(),
                Some(RolloutOutcome::Committed { stamp, forced, .. }) => format!(
                    "idle; last rollout committed as {}{}",
                    stamp,
                    if *forced { " (forced)" } else { "" }
                ),
                Some(RolloutOutcome::RolledBack { reason, .. }) => {
                    format!("idle; last rollout rolled back ({})", reason)
                }
            },
        }
    }

    pub fn progress(&self) -> Option<RolloutProgress> {
        match &self.shared.inner.lock().state {
            RolloutState::Rolling(active) => Some(active.progress()),
            RolloutState::Idle => None,
        }
    }

    /// Candidate being rolled out, for members to pull and apply
    pub fn rolling_config(&self) -> Option<ConfigSnapshot> {
        match &self.shared.inner.lock().state {
            RolloutState::Rolling(active) => Some(active.candidate.clone()),
            RolloutState::Idle => None,
        }
    }

    pub fn last_outcome(&self) -> Option<RolloutOutcome> {
        self.shared.inner.lock().last_outcome.clone()
    }
}

enum Ending {
    Committed { stamp: VersionStamp, forced: bool },
    RolledBack(String),
}

/// CAS the candidate against the rollout's baseline. A conflict leaves the
/// rollout in place and marks it, so the change is never silently dropped.
fn commit_candidate(writes: &WriteGuard<'_>, active: &mut ActiveRollout) -> Result<VersionStamp> {
    match writes.update(active.candidate.clone(), active.baseline) {
        Ok(stamp) => Ok(stamp),
        Err(e) => {
            if e.is_conflict() {
                active.conflicted = true;
                tracing::warn!(rollout_id = %active.id, "rollout commit conflicted: {}", e);
            }
            Err(e)
        }
    }
}

/// Rolling -> Committed | RolledBack -> Idle
fn finish(inner: &mut Inner, ending: Ending, stop_tracker: bool) -> RolloutOutcome {
    let previous = std::mem::replace(&mut inner.state, RolloutState::Idle);
    let RolloutState::Rolling(mut active) = previous else {
        unreachable!("finish called without an active rollout");
    };
    if let Some(tracker) = active.tracker.take() {
        if stop_tracker {
            tracker.abort();
        }
    }

    let finished_at = Utc::now();
    let outcome = match ending {
        Ending::Committed { stamp, forced } => RolloutOutcome::Committed {
            rollout_id: active.id,
            stamp,
            forced,
            finished_at,
        },
        Ending::RolledBack(reason) => RolloutOutcome::RolledBack {
            rollout_id: active.id,
            reason,
            finished_at,
        },
    };

    tracing::info!(
        rollout_id = %active.id,
        elapsed = %format_elapsed(active.started.elapsed()),
        "rollout finished: rolling -> {} -> idle",
        outcome.phase()
    );
    inner.last_outcome = Some(outcome.clone());
    outcome
}

/// Members still to probe, or `None` once the rollout is gone or blocked
fn probe_targets(shared: &Shared, id: Uuid) -> Option<(String, Vec<String>)> {
    let inner = shared.inner.lock();
    match &inner.state {
        RolloutState::Rolling(active) if active.id == id && !active.conflicted => Some((
            active.fingerprint.clone(),
            active
                .members
                .iter()
                .filter(|m| m.progress != MemberProgress::Converged)
                .map(|m| m.member.clone())
                .collect(),
        )),
        _ => None,
    }
}

enum Tick {
    Continue,
    Stop,
}

/// A step that needs the store's write lock
enum Due {
    Commit,
    Expire(String),
}

/// Fold probe answers into the rollout, then commit or time out if due.
///
/// Only the final step takes the store's write lock; folding runs under the
/// rollout state lock alone.
fn apply_tick(
    shared: &Shared,
    id: Uuid,
    results: Vec<(String, Result<Option<String>>)>,
) -> Tick {
    let due = {
        let mut inner = shared.inner.lock();
        let RolloutState::Rolling(active) = &mut inner.state else {
            return Tick::Stop;
        };
        if active.id != id || active.conflicted {
            return Tick::Stop;
        }
        fold_results(active, results, shared.settings.member_timeout());

        if active.all_converged() {
            Due::Commit
        } else {
            match shared.settings.timeout() {
                Some(timeout) if active.started.elapsed() >= timeout => {
                    Due::Expire(format!("timed out after {}", format_elapsed(timeout)))
                }
                _ => return Tick::Continue,
            }
        }
    };

    let writes = shared.store.lock_writes();
    let mut inner = shared.inner.lock();
    let RolloutState::Rolling(active) = &mut inner.state else {
        return Tick::Stop;
    };
    if active.id != id || active.conflicted {
        return Tick::Stop;
    }

    match due {
        Due::Commit => match commit_candidate(&writes, active) {
            Ok(stamp) => {
                finish(
                    &mut inner,
                    Ending::Committed {
                        stamp,
                        forced: false,
                    },
                    false,
                );
                Tick::Stop
            }
            Err(e) if e.is_conflict() => Tick::Stop,
            Err(e) => {
                tracing::warn!(rollout_id = %id, "rollout commit failed, retrying: {}", e);
                Tick::Continue
            }
        },
        Due::Expire(reason) => {
            tracing::warn!(rollout_id = %id, "rollout {}", reason);
            finish(&mut inner, Ending::RolledBack(reason), false);
            Tick::Stop
        }
    }
}

fn fold_results(
    active: &mut ActiveRollout,
    results: Vec<(String, Result<Option<String>>)>,
    member_timeout: std::time::Duration,
) {
    let now = Instant::now();
    let id = active.id;
    for (member, result) in results {
        let Some(state) = active.members.iter_mut().find(|m| m.member == member) else {
            continue;
        };
        match result {
            Ok(applied) => {
                state.last_contact = now;
                state.last_error = None;
                if applied.as_deref() == Some(active.fingerprint.as_str()) {
                    state.progress = MemberProgress::Converged;
                    tracing::info!(rollout_id = %id, member = %member, "member converged");
                } else {
                    state.progress = MemberProgress::Pending;
                }
            }
            Err(e) => {
                tracing::debug!(rollout_id = %id, member = %member, "probe failed: {}", e);
                state.last_error = Some(e.to_string());
                if now.duration_since(state.last_contact) >= member_timeout
                    && state.progress != MemberProgress::Unresponsive
                {
                    state.progress = MemberProgress::Unresponsive;
                    tracing::warn!(rollout_id = %id, member = %member, "member unresponsive");
                }
            }
        }
    }
}

async fn track_convergence(shared: Arc<Shared>, id: Uuid) {
    let mut ticker = tokio::time::interval(shared.settings.poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some((fingerprint, targets)) = probe_targets(&shared, id) else {
            break;
        };
        tracing::trace!(rollout_id = %id, fingerprint = %fingerprint, pending = targets.len(), "probing fleet");

        let mut probes = JoinSet::new();
        for member in targets {
            let probe = shared.probe.clone();
            probes.spawn(async move {
                let result = probe.applied_fingerprint(&member).await;
                (member, result)
            });
        }
        let mut results = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(answer) => results.push(answer),
                Err(e) => tracing::warn!(rollout_id = %id, "probe task failed: {}", e),
            }
        }

        if let Tick::Stop = apply_tick(&shared, id, results) {
            break;
        }
    }

    tracing::debug!(rollout_id = %id, "convergence tracking stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::backend::MemoryBackend;
    use crate::coordinator::fleet::LocalFleet;
    use crate::model::{IntKey, StringKey};
    use std::time::Duration;

    fn settings() -> RolloutConfig {
        RolloutConfig {
            poll_interval_ms: 10,
            member_timeout_ms: 30,
            timeout_ms: 0,
        }
    }

    fn setup(settings: RolloutConfig) -> (RolloutCoordinator, Arc<LocalFleet>) {
        let base = ConfigSnapshot::default()
            .with_int(IntKey::ClientPort, 2181)
            .with_string(StringKey::ServersSpec, "1:zk-a,2:zk-b");
        let store = Arc::new(ConfigStore::open(Arc::new(MemoryBackend::with_initial(base))).unwrap());
        let fleet = Arc::new(LocalFleet::new());
        (
            RolloutCoordinator::new(store, fleet.clone(), settings),
            fleet,
        )
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_idle_status() {
        let (coordinator, _) = setup(settings());
        assert_eq!(coordinator.get_rolling_status(), "idle");
        assert!(!coordinator.is_rolling());
        assert!(coordinator.progress().is_none());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let (coordinator, _) = setup(settings());
        let (base, _) = coordinator.store().get_config();
        assert!(matches!(
            coordinator.begin_rolling(base),
            Err(Error::Internal(_))
        ));
        assert!(!coordinator.is_rolling());
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_invalid() {
        let (coordinator, _) = setup(settings());
        assert!(matches!(
            coordinator.cancel_rolling(CancelMode::Rollback),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            coordinator.cancel_rolling(CancelMode::ForceCommit),
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_converged_fleet_commits() {
        let (coordinator, fleet) = setup(settings());
        let (base, v1) = coordinator.store().get_config();
        let candidate = base.with_int(IntKey::ClientPort, 2182);

        assert!(coordinator.start_rolling(candidate.clone()));
        assert_eq!(coordinator.phase(), RolloutPhase::Rolling);
        assert!(coordinator.get_rolling_status().starts_with("rolling: 0/2"));

        fleet.acknowledge("zk-a", candidate.fingerprint());
        wait_until(|| coordinator.progress().map(|p| p.converged()) == Some(1)).await;
        assert!(coordinator.is_rolling());

        fleet.acknowledge("zk-b", candidate.fingerprint());
        wait_until(|| !coordinator.is_rolling()).await;

        let (snapshot, stamp) = coordinator.store().get_config();
        assert_eq!(snapshot, candidate);
        assert_eq!(stamp, v1.next());
        assert!(matches!(
            coordinator.last_outcome(),
            Some(RolloutOutcome::Committed { forced: false, .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_polling_does_not_wait_on_store_writes() {
        let (coordinator, fleet) = setup(settings());
        let (base, v1) = coordinator.store().get_config();
        let candidate = base.with_int(IntKey::ClientPort, 2182);
        assert!(coordinator.start_rolling(candidate.clone()));

        // A long-running writer holds the store
        let writes = coordinator.store().lock_writes();
        fleet.acknowledge("zk-a", candidate.fingerprint());
        wait_until(|| coordinator.progress().map(|p| p.converged()) == Some(1)).await;
        assert_eq!(coordinator.progress().map(|p| p.converged()), Some(1));
        drop(writes);

        coordinator.cancel_rolling(CancelMode::Rollback).unwrap();
        assert_eq!(coordinator.store().stamp(), v1);
    }

    #[tokio::test]
    async fn test_unresponsive_member_reported() {
        let (coordinator, fleet) = setup(settings());
        let (base, _) = coordinator.store().get_config();
        fleet.set_unreachable("zk-b");

        assert!(coordinator.start_rolling(base.with_int(IntKey::ClientPort, 2182)));
        wait_until(|| {
            coordinator
                .progress()
                .map(|p| p.count(MemberProgress::Unresponsive))
                == Some(1)
        })
        .await;
        assert!(coordinator.get_rolling_status().contains("unresponsive: zk-b"));

        coordinator.cancel_rolling(CancelMode::Rollback).unwrap();
    }

    #[tokio::test]
    async fn test_timeout_rolls_back() {
        let (coordinator, _) = setup(RolloutConfig {
            timeout_ms: 50,
            ..settings()
        });
        let (base, v1) = coordinator.store().get_config();

        assert!(coordinator.start_rolling(base.with_int(IntKey::ClientPort, 2182)));
        wait_until(|| !coordinator.is_rolling()).await;

        assert_eq!(coordinator.store().get_config(), (base, v1));
        assert!(coordinator
            .get_rolling_status()
            .starts_with("idle; last rollout rolled back (timed out"));
    }

    #[tokio::test]
    async fn test_empty_fleet_commits_on_first_tick() {
        let store = Arc::new(ConfigStore::open(Arc::new(MemoryBackend::new())).unwrap());
        let coordinator = RolloutCoordinator::new(store, Arc::new(LocalFleet::new()), settings());
        let candidate = ConfigSnapshot::default().with_int(IntKey::ClientPort, 2181);

        assert!(coordinator.start_rolling(candidate.clone()));
        wait_until(|| !coordinator.is_rolling()).await;
        assert_eq!(coordinator.store().get_config().0, candidate);
    }

    #[test]
    fn test_progress_summary() {
        let progress = RolloutProgress {
            rollout_id: Uuid::nil(),
            started_at: Utc::now(),
            elapsed_ms: 65_000,
            baseline: VersionStamp::new(3),
            fingerprint: "abc".into(),
            members: vec![
                MemberStatus {
                    member: "zk-a".into(),
                    progress: MemberProgress::Converged,
                    last_error: None,
                },
                MemberStatus {
                    member: "zk-b".into(),
                    progress: MemberProgress::Pending,
                    last_error: None,
                },
                MemberStatus {
                    member: "zk-c".into(),
                    progress: MemberProgress::Unresponsive,
                    last_error: Some("unreachable".into()),
                },
            ],
            conflicted: false,
        };
        assert_eq!(
            progress.summary(),
            "rolling: 1/3 members converged (33%) after 1m 05s; unresponsive: zk-c"
        );
    }
}
