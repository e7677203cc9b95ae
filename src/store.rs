// file: src/store.rs
// description: in-memory map of execution id to the latest merged execution state

use crate::{
    events::{EventReceiver, EventSender, TrackerEvent, create_event_channel},
    monitoring,
    types::{EventKind, ExecutionEvent, ExecutionState},
};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// Source of `updated_at` timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// What happens to executions that reached a terminal status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Entries live until `clear`/`clear_all` is called.
    #[default]
    Manual,
    /// Terminal entries untouched for longer than the TTL are removed by [`ExecutionStore::sweep`].
    TerminalTtl(Duration),
}

/// Shared execution state store.
///
/// Cloning yields another handle to the same map. Every merge builds the
/// complete new [`ExecutionState`] before swapping it in under the write
/// lock, and readers only ever get clones, so a reader never sees a state
/// assembled from two different events.
#[derive(Clone)]
pub struct ExecutionStore {
    entries: Arc<RwLock<HashMap<String, ExecutionState>>>,
    clock: Arc<dyn Clock>,
    policy: EvictionPolicy,
    changes: EventSender,
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStore")
            .field("len", &self.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), EvictionPolicy::Manual)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, policy: EvictionPolicy) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
            policy,
            changes: create_event_channel(),
        }
    }

    pub fn with_policy(policy: EvictionPolicy) -> Self {
        Self::with_clock(Arc::new(SystemClock), policy)
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Sender shared with the rest of the tracker so connection transitions
    /// and store changes arrive on one channel.
    pub(crate) fn event_sender(&self) -> &EventSender {
        &self.changes
    }

    pub fn subscribe_changes(&self) -> EventReceiver {
        self.changes.subscribe()
    }

    /// Merge one event and return the resulting state.
    pub fn apply_event(&self, event: &ExecutionEvent) -> ExecutionState {
        let merged = {
            let mut entries = self.write();
            let merged = merge(entries.get(&event.execution_id), event, self.clock.now());
            entries.insert(merged.execution_id.clone(), merged.clone());
            monitoring::TRACKED_EXECUTIONS_GAUGE.set(entries.len() as f64);
            merged
        };

        trace!(
            execution_id = %merged.execution_id,
            kind = %event.kind(),
            status = %merged.status,
            "Applied execution event"
        );
        let _ = self
            .changes
            .send(TrackerEvent::ExecutionUpdated(merged.clone()));
        merged
    }

    pub fn get(&self, execution_id: &str) -> Option<ExecutionState> {
        self.read().get(execution_id).cloned()
    }

    /// Snapshot of queued and running executions, oldest update first.
    pub fn get_active(&self) -> Vec<ExecutionState> {
        let mut active: Vec<ExecutionState> = self
            .read()
            .values()
            .filter(|state| state.is_active())
            .cloned()
            .collect();
        sort_by_update(&mut active);
        active
    }

    pub fn get_by_task(&self, task_id: &str) -> Vec<ExecutionState> {
        let mut matching: Vec<ExecutionState> = self
            .read()
            .values()
            .filter(|state| state.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect();
        sort_by_update(&mut matching);
        matching
    }

    pub fn snapshot(&self) -> Vec<ExecutionState> {
        let mut all: Vec<ExecutionState> = self.read().values().cloned().collect();
        sort_by_update(&mut all);
        all
    }

    /// Returns the evicted entry, if there was one.
    pub fn clear(&self, execution_id: &str) -> Option<ExecutionState> {
        let removed = {
            let mut entries = self.write();
            let removed = entries.remove(execution_id);
            monitoring::TRACKED_EXECUTIONS_GAUGE.set(entries.len() as f64);
            removed
        };
        if removed.is_some() {
            debug!(execution_id, "Evicted execution");
            let _ = self.changes.send(TrackerEvent::ExecutionRemoved {
                execution_id: execution_id.to_string(),
            });
        }
        removed
    }

    pub fn clear_all(&self) {
        let count = {
            let mut entries = self.write();
            let count = entries.len();
            entries.clear();
            count
        };
        monitoring::TRACKED_EXECUTIONS_GAUGE.set(0.0);
        debug!(count, "Cleared execution store");
        let _ = self.changes.send(TrackerEvent::Cleared);
    }

    /// Remove terminal entries older than the configured TTL. No-op under [`EvictionPolicy::Manual`].
    pub fn sweep(&self) -> Vec<String> {
        let EvictionPolicy::TerminalTtl(ttl) = self.policy else {
            return Vec::new();
        };
        let Some(cutoff) = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_sub_signed(ttl))
        else {
            return Vec::new();
        };

        let expired: Vec<String> = {
            let mut entries = self.write();
            let expired: Vec<String> = entries
                .values()
                .filter(|state| state.is_terminal() && state.updated_at <= cutoff)
                .map(|state| state.execution_id.clone())
                .collect();
            for id in &expired {
                entries.remove(id);
            }
            monitoring::TRACKED_EXECUTIONS_GAUGE.set(entries.len() as f64);
            expired
        };

        for execution_id in &expired {
            let _ = self.changes.send(TrackerEvent::ExecutionRemoved {
                execution_id: execution_id.clone(),
            });
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Swept terminal executions");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ExecutionState>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ExecutionState>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Last-write-wins by arrival, except a terminal status is never replaced by a non-terminal one.
fn merge(
    previous: Option<&ExecutionState>,
    event: &ExecutionEvent,
    now: DateTime<Utc>,
) -> ExecutionState {
    let target = event.target_status();
    match previous {
        None => ExecutionState {
            execution_id: event.execution_id.clone(),
            task_id: event.task_id.clone(),
            status: target,
            last_event_kind: event.kind(),
            payload: event.payload.clone(),
            updated_at: now,
        },
        Some(prev) => {
            let status = if prev.status.is_terminal() && !target.is_terminal() {
                prev.status
            } else if event.kind() == EventKind::Log {
                prev.status
            } else {
                target
            };
            ExecutionState {
                execution_id: prev.execution_id.clone(),
                task_id: event.task_id.clone().or_else(|| prev.task_id.clone()),
                status,
                last_event_kind: event.kind(),
                payload: event.payload.clone(),
                updated_at: now.max(prev.updated_at),
            }
        }
    }
}

fn sort_by_update(states: &mut [ExecutionState]) {
    states.sort_by(|a, b| {
        a.updated_at
            .cmp(&b.updated_at)
            .then_with(|| a.execution_id.cmp(&b.execution_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CompletedPayload, EventPayload, ExecutionStatus, FailedPayload, LogPayload,
        ProgressPayload, StartStatus, StartedPayload,
    };
    use std::sync::Mutex;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            )))
        }

        fn advance(&self, secs: i64) {
            let mut now = self.0.lock().unwrap();
            *now += TimeDelta::seconds(secs);
        }

        fn rewind(&self, secs: i64) {
            let mut now = self.0.lock().unwrap();
            *now -= TimeDelta::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn started(id: &str) -> ExecutionEvent {
        ExecutionEvent::new(id, EventPayload::Started(StartedPayload::default())).with_task("task-9")
    }

    fn progress(id: &str, pct: f64) -> ExecutionEvent {
        ExecutionEvent::new(
            id,
            EventPayload::Progress(ProgressPayload {
                progress: Some(pct),
                ..Default::default()
            }),
        )
    }

    fn completed(id: &str) -> ExecutionEvent {
        ExecutionEvent::new(id, EventPayload::Completed(CompletedPayload::default()))
    }

    fn failed(id: &str, error: &str) -> ExecutionEvent {
        ExecutionEvent::new(
            id,
            EventPayload::Failed(FailedPayload {
                error: error.to_string(),
                duration_ms: None,
            }),
        )
    }

    fn log(id: &str) -> ExecutionEvent {
        ExecutionEvent::new(
            id,
            EventPayload::Log(LogPayload {
                level: "info".to_string(),
                message: "hello".to_string(),
            }),
        )
    }

    #[test]
    fn first_event_creates_entry() {
        let store = ExecutionStore::new();
        let state = store.apply_event(&started("exec-1"));

        assert_eq!(state.execution_id, "exec-1");
        assert_eq!(state.task_id.as_deref(), Some("task-9"));
        assert_eq!(state.status, ExecutionStatus::Running);
        assert_eq!(state.last_event_kind, EventKind::Started);
        assert_eq!(store.get("exec-1"), Some(state));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn progress_overwrites_payload_and_keeps_task() {
        let store = ExecutionStore::new();
        store.apply_event(&started("exec-1"));
        let state = store.apply_event(&progress("exec-1", 50.0));

        assert_eq!(state.task_id.as_deref(), Some("task-9"));
        assert_eq!(state.last_event_kind, EventKind::Progress);
        assert_eq!(state.progress(), Some(50.0));
    }

    #[test]
    fn terminal_status_never_regresses() {
        let store = ExecutionStore::new();
        store.apply_event(&started("exec-1"));
        store.apply_event(&completed("exec-1"));
        let state = store.apply_event(&progress("exec-1", 10.0));

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.last_event_kind, EventKind::Progress);

        let state = store.apply_event(&started("exec-1"));
        assert_eq!(state.status, ExecutionStatus::Completed);
    }

    #[test]
    fn terminal_to_terminal_is_accepted() {
        let store = ExecutionStore::new();
        store.apply_event(&completed("exec-1"));
        let state = store.apply_event(&failed("exec-1", "boom"));
        assert_eq!(state.status, ExecutionStatus::Failed);
        assert!(matches!(state.payload, EventPayload::Failed(ref f) if f.error == "boom"));

        let state = store.apply_event(&completed("exec-1"));
        assert_eq!(state.status, ExecutionStatus::Completed);
    }

    #[test]
    fn duplicate_terminal_event_is_idempotent() {
        let store = ExecutionStore::new();
        let first = store.apply_event(&completed("exec-1"));
        let second = store.apply_event(&completed("exec-1"));
        assert_eq!(first.status, second.status);
        assert_eq!(first.payload, second.payload);
    }

    #[test]
    fn log_does_not_promote_queued() {
        let store = ExecutionStore::new();
        store.apply_event(&ExecutionEvent::new(
            "exec-1",
            EventPayload::Started(StartedPayload {
                status: StartStatus::Queued,
                started_at: None,
            }),
        ));
        let state = store.apply_event(&log("exec-1"));
        assert_eq!(state.status, ExecutionStatus::Queued);
        assert_eq!(state.last_event_kind, EventKind::Log);

        let state = store.apply_event(&progress("exec-1", 1.0));
        assert_eq!(state.status, ExecutionStatus::Running);
    }

    #[test]
    fn updated_at_is_monotonic() {
        let clock = ManualClock::new();
        let store = ExecutionStore::with_clock(clock.clone(), EvictionPolicy::Manual);

        let first = store.apply_event(&started("exec-1"));
        clock.rewind(60);
        let second = store.apply_event(&progress("exec-1", 5.0));
        assert_eq!(second.updated_at, first.updated_at);

        clock.advance(120);
        let third = store.apply_event(&progress("exec-1", 6.0));
        assert!(third.updated_at > second.updated_at);
    }

    #[test]
    fn snapshot_orders_by_last_update() {
        let clock = ManualClock::new();
        let store = ExecutionStore::with_clock(clock.clone(), EvictionPolicy::Manual);
        store.apply_event(&started("b"));
        store.apply_event(&started("a"));
        clock.advance(1);
        store.apply_event(&progress("b", 50.0));

        let ids: Vec<_> = store
            .snapshot()
            .into_iter()
            .map(|s| s.execution_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn get_active_is_a_snapshot() {
        let store = ExecutionStore::new();
        store.apply_event(&started("exec-1"));
        store.apply_event(&started("exec-2"));
        store.apply_event(&completed("exec-2"));

        let active = store.get_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].execution_id, "exec-1");

        store.apply_event(&completed("exec-1"));
        assert_eq!(active[0].status, ExecutionStatus::Running);
        assert!(store.get_active().is_empty());
    }

    #[test]
    fn get_by_task_filters() {
        let store = ExecutionStore::new();
        store.apply_event(&started("exec-1"));
        store.apply_event(&progress("exec-2", 1.0));
        let by_task = store.get_by_task("task-9");
        assert_eq!(by_task.len(), 1);
        assert_eq!(by_task[0].execution_id, "exec-1");
    }

    #[test]
    fn clear_and_clear_all() {
        let store = ExecutionStore::new();
        store.apply_event(&started("exec-1"));
        store.apply_event(&started("exec-2"));

        assert!(store.clear("exec-1").is_some());
        assert!(store.clear("exec-1").is_none());
        assert_eq!(store.len(), 1);

        store.clear_all();
        assert!(store.is_empty());
    }

    #[test]
    fn sweep_respects_policy() {
        let clock = ManualClock::new();
        let manual = ExecutionStore::with_clock(clock.clone(), EvictionPolicy::Manual);
        manual.apply_event(&completed("exec-1"));
        clock.advance(3_600);
        assert!(manual.sweep().is_empty());
        assert_eq!(manual.len(), 1);

        let ttl = ExecutionStore::with_clock(
            clock.clone(),
            EvictionPolicy::TerminalTtl(Duration::from_secs(60)),
        );
        ttl.apply_event(&completed("done"));
        ttl.apply_event(&started("live"));
        clock.advance(30);
        assert!(ttl.sweep().is_empty());

        clock.advance(31);
        assert_eq!(ttl.sweep(), vec!["done".to_string()]);
        assert!(ttl.get("done").is_none());
        assert!(ttl.get("live").is_some());
    }

    #[test]
    fn changes_are_broadcast() {
        let store = ExecutionStore::new();
        let mut rx = store.subscribe_changes();

        store.apply_event(&started("exec-1"));
        store.clear("exec-1");
        store.clear_all();

        assert!(matches!(
            rx.try_recv().unwrap(),
            TrackerEvent::ExecutionUpdated(ref s) if s.execution_id == "exec-1"
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            TrackerEvent::ExecutionRemoved {
                execution_id: "exec-1".to_string()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), TrackerEvent::Cleared);
    }

    #[test]
    fn clones_share_state() {
        let store = ExecutionStore::new();
        let other = store.clone();
        store.apply_event(&started("exec-1"));
        assert!(other.get("exec-1").is_some());
    }
}
