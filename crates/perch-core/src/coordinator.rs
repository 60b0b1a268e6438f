//! Coordination of competing asynchronous operations.
//!
//! [`AsyncCoordinator`] tracks in-flight operations under an optional
//! [`GroupKey`]. When a new operation starts under a key, every other
//! operation under that key is affected according to the new operation's
//! [`RunAction`]:
//!
//! | Action     | Effect on the others                                   |
//! |------------|--------------------------------------------------------|
//! | `Break`    | become [`RunStatus::Broken`]: outcome turns into `Superseded`, no callbacks |
//! | `Hide`     | become [`RunStatus::Hidden`]: success/fail callbacks suppressed |
//! | `Parallel` | untouched                                              |
//!
//! Nothing is cancelled: a broken operation keeps running to completion,
//! only its outcome is discarded.
//!
//! Bookkeeping happens when [`run`](AsyncCoordinator::run) is *called*, not
//! when the returned future is first polled, so a newly started operation
//! always sees the full set of same-key operations.
//!
//! # Example
//!
//! ```rust,ignore
//! use perch_core::coordinator::{AsyncCoordinator, GroupKey, RunOptions};
//!
//! let search = AsyncCoordinator::new();
//! let key = GroupKey::unique();
//!
//! // Only the latest search may deliver results.
//! let first = search.run(fetch("ru"), RunOptions::new().key(key));
//! let second = search.run(fetch("rust"), RunOptions::new().key(key));
//!
//! assert!(first.await.unwrap_err().is_superseded());
//! let hits = second.await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use crate::error::{BoxError, DispatchError};

static NEXT_GROUP_KEY: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Keys, actions and statuses
// =============================================================================

/// Identifier under which competing operations are correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey(u64);

impl GroupKey {
    /// A well-known key shared by everything that asks for it.
    pub const GLOBAL: Self = Self(0);

    /// A fresh key, distinct from every other key in the process.
    pub fn unique() -> Self {
        Self(NEXT_GROUP_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// Policy applied to same-key operations when a new one starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunAction {
    #[default]
    Break,
    Hide,
    Parallel,
}

/// Current standing of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Superseded by a `Break`; the outcome is discarded.
    Broken,
    /// Superseded by a `Hide`; only the end callback still fires.
    Hidden,
    Running,
}

// =============================================================================
// Options and hooks
// =============================================================================

/// Receives the run's status when it fires.
type Callback = Box<dyn FnOnce(RunStatus) + Send>;

/// Per-run options.
#[derive(Default)]
pub struct RunOptions {
    action: RunAction,
    key: Option<GroupKey>,
    on_success: Option<Callback>,
    on_fail: Option<Callback>,
    on_end: Option<Callback>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("action", &self.action)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, action: RunAction) -> Self {
        self.action = action;
        self
    }

    /// Tracks the operation under `key`. Untracked operations always count
    /// as running.
    pub fn key(mut self, key: GroupKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(RunStatus) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_fail(mut self, f: impl FnOnce(RunStatus) + Send + 'static) -> Self {
        self.on_fail = Some(Box::new(f));
        self
    }

    /// Fires once the operation settled, unless it was broken. Receives
    /// `Hidden` when a newer run muted this one.
    pub fn on_end(mut self, f: impl FnOnce(RunStatus) + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }
}

/// Identity of a run, handed to [`RunHooks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunInfo {
    pub key: Option<GroupKey>,
    /// `None` for untracked runs.
    pub id: Option<u64>,
    pub action: RunAction,
}

/// Lifecycle hooks shared by every run of one coordinator.
#[async_trait]
pub trait RunHooks: Send + Sync + 'static {
    /// Runs before the task is first polled. A failure becomes the run's
    /// own failure.
    async fn on_run_begin(&self, _info: &RunInfo) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs after every run, whatever its status.
    async fn on_run_end(&self, _status: RunStatus, _info: &RunInfo) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl RunHooks for NoHooks {}

// =============================================================================
// Errors
// =============================================================================

/// Failure of a coordinated run.
#[derive(Debug, Error)]
pub enum RunError<E> {
    /// A newer operation broke this one. Never report it.
    #[error("operation superseded")]
    Superseded,

    #[error("{0}")]
    Failed(E),

    #[error("run hook failed: {0}")]
    Hook(BoxError),
}

impl<E> RunError<E> {
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }
}

impl<E: Into<DispatchError>> From<RunError<E>> for DispatchError {
    fn from(err: RunError<E>) -> Self {
        match err {
            RunError::Superseded => DispatchError::Superseded,
            RunError::Failed(e) => e.into(),
            RunError::Hook(e) => DispatchError::Unknown(e),
        }
    }
}

// =============================================================================
// Tracking table
// =============================================================================

type Table = Mutex<HashMap<GroupKey, HashMap<u64, RunStatus>>>;

/// Removes the run's record when the run settles or its future is dropped.
struct RunGuard {
    table: Arc<Table>,
    slot: Option<(GroupKey, u64)>,
}

impl RunGuard {
    fn status(&self) -> RunStatus {
        match self.slot {
            None => RunStatus::Running,
            Some((key, id)) => lookup(&self.table, key, id),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some((key, id)) = self.slot {
            let mut table = self.table.lock();
            if let Some(bucket) = table.get_mut(&key) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    table.remove(&key);
                }
            }
        }
    }
}

fn lookup(table: &Table, key: GroupKey, id: u64) -> RunStatus {
    table
        .lock()
        .get(&key)
        .and_then(|bucket| bucket.get(&id))
        .copied()
        .unwrap_or(RunStatus::Broken)
}

// =============================================================================
// AsyncCoordinator
// =============================================================================

/// Tracks and arbitrates competing asynchronous operations.
///
/// Cloning is cheap; clones share one tracking table.
pub struct AsyncCoordinator<H: RunHooks = NoHooks> {
    table: Arc<Table>,
    next_id: Arc<AtomicU64>,
    hooks: Arc<H>,
}

impl<H: RunHooks> Clone for AsyncCoordinator<H> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            next_id: Arc::clone(&self.next_id),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

impl<H: RunHooks> std::fmt::Debug for AsyncCoordinator<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCoordinator")
            .field("groups", &self.table.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for AsyncCoordinator<NoHooks> {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncCoordinator<NoHooks> {
    pub fn new() -> Self {
        Self::with_hooks(NoHooks)
    }
}

impl<H: RunHooks> AsyncCoordinator<H> {
    pub fn with_hooks(hooks: H) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            hooks: Arc::new(hooks),
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Starts coordinating `task`.
    ///
    /// Same-key bookkeeping is done before this returns; the task itself is
    /// only polled once the returned future is awaited.
    pub fn run<T, E, Fut>(
        &self,
        task: Fut,
        options: RunOptions,
    ) -> BoxFuture<'static, Result<T, RunError<E>>>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let RunOptions {
            action,
            key,
            on_success,
            on_fail,
            on_end,
        } = options;

        let slot = key.map(|key| (key, self.register(key, action)));
        let info = RunInfo {
            key,
            id: slot.map(|(_, id)| id),
            action,
        };
        let guard = RunGuard {
            table: Arc::clone(&self.table),
            slot,
        };
        let hooks = Arc::clone(&self.hooks);

        Box::pin(async move {
            let outcome = match hooks.on_run_begin(&info).await {
                Ok(()) => task.await.map_err(RunError::Failed),
                Err(e) => Err(RunError::Hook(e)),
            };

            let status = guard.status();
            let callback = if outcome.is_ok() { on_success } else { on_fail };
            let result = match status {
                RunStatus::Broken => Err(RunError::Superseded),
                RunStatus::Hidden => outcome,
                RunStatus::Running => {
                    if let Some(callback) = callback {
                        callback(status);
                    }
                    outcome
                }
            };

            let status = guard.status();
            if status != RunStatus::Broken
                && let Some(on_end) = on_end
            {
                on_end(status);
            }
            hooks.on_run_end(status, &info).await;
            trace!(id = ?info.id, status = ?status, "Coordinated run finished");

            drop(guard);
            result
        })
    }

    /// Like [`run`](Self::run), producing the task from `f` immediately.
    pub fn run_with<T, E, Fut, F>(
        &self,
        f: F,
        options: RunOptions,
    ) -> BoxFuture<'static, Result<T, RunError<E>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.run(f(), options)
    }

    /// The status of a tracked run; unknown runs count as broken.
    pub fn status_of(&self, key: GroupKey, id: u64) -> RunStatus {
        lookup(&self.table, key, id)
    }

    /// Number of in-flight runs under `key`.
    pub fn in_flight(&self, key: GroupKey) -> usize {
        self.table.lock().get(&key).map_or(0, HashMap::len)
    }

    fn register(&self, key: GroupKey, action: RunAction) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut table = self.table.lock();
        let bucket = table.entry(key).or_default();
        for status in bucket.values_mut() {
            match action {
                RunAction::Break => *status = RunStatus::Broken,
                RunAction::Hide => *status = RunStatus::Hidden,
                RunAction::Parallel => {}
            }
        }
        bucket.insert(id, RunStatus::Running);
        id
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    #[derive(Default)]
    struct RecordingHooks {
        ends: Mutex<Vec<(Option<u64>, RunStatus)>>,
        fail_begin: bool,
    }

    #[async_trait]
    impl RunHooks for RecordingHooks {
        async fn on_run_begin(&self, _info: &RunInfo) -> Result<(), BoxError> {
            if self.fail_begin {
                return Err("begin refused".into());
            }
            Ok(())
        }

        async fn on_run_end(&self, status: RunStatus, info: &RunInfo) {
            self.ends.lock().push((info.id, status));
        }
    }

    impl RecordingHooks {
        fn statuses(&self) -> Vec<RunStatus> {
            self.ends.lock().iter().map(|(_, s)| *s).collect()
        }
    }

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn push(log: &Log, entry: &'static str) -> impl FnOnce(RunStatus) + Send + 'static {
        let log = Arc::clone(log);
        move |_status| log.lock().push(entry)
    }

    fn options(log: &Log, name: &'static str, key: GroupKey, action: RunAction) -> RunOptions {
        let (success, fail, end) = match name {
            "x" => ("x success", "x fail", "x end"),
            _ => ("y success", "y fail", "y end"),
        };
        RunOptions::new()
            .key(key)
            .action(action)
            .on_success(push(log, success))
            .on_fail(push(log, fail))
            .on_end(push(log, end))
    }

    #[tokio::test]
    async fn break_discards_the_earlier_run() {
        let co = AsyncCoordinator::with_hooks(RecordingHooks::default());
        let log = Log::default();
        let key = GroupKey::unique();
        let (tx, rx) = oneshot::channel::<u32>();

        let x = co.run(
            async move { rx.await.map_err(|_| "dropped") },
            options(&log, "x", key, RunAction::Break),
        );
        let y = co.run(
            async { Ok::<_, &str>(2) },
            options(&log, "y", key, RunAction::Break),
        );
        assert_eq!(co.in_flight(key), 2);

        assert_eq!(y.await.unwrap(), 2);
        tx.send(1).unwrap();
        assert!(x.await.unwrap_err().is_superseded());

        assert_eq!(*log.lock(), vec!["y success", "y end"]);
        assert_eq!(
            co.hooks().statuses(),
            vec![RunStatus::Running, RunStatus::Broken]
        );
        assert_eq!(co.in_flight(key), 0);
    }

    #[tokio::test]
    async fn break_also_swallows_failures() {
        let co = AsyncCoordinator::new();
        let log = Log::default();
        let key = GroupKey::unique();

        let x = co.run(
            async { Err::<u32, _>("boom") },
            options(&log, "x", key, RunAction::Break),
        );
        let y = co.run(
            async { Ok::<_, &str>(2) },
            options(&log, "y", key, RunAction::Break),
        );

        assert!(x.await.unwrap_err().is_superseded());
        assert_eq!(y.await.unwrap(), 2);
        assert_eq!(*log.lock(), vec!["y success", "y end"]);
    }

    #[tokio::test]
    async fn hide_keeps_the_outcome_but_mutes_callbacks() {
        let co = AsyncCoordinator::with_hooks(RecordingHooks::default());
        let log = Log::default();
        let key = GroupKey::unique();
        let (tx, rx) = oneshot::channel::<u32>();

        let x = co.run(
            async move { rx.await.map_err(|_| "dropped") },
            options(&log, "x", key, RunAction::Hide),
        );
        let y = co.run(
            async { Ok::<_, &str>(2) },
            options(&log, "y", key, RunAction::Hide),
        );

        assert_eq!(y.await.unwrap(), 2);
        tx.send(1).unwrap();
        assert_eq!(x.await.unwrap(), 1);

        assert_eq!(*log.lock(), vec!["y success", "y end", "x end"]);
        assert_eq!(
            co.hooks().statuses(),
            vec![RunStatus::Running, RunStatus::Hidden]
        );
    }

    #[tokio::test]
    async fn parallel_leaves_others_alone() {
        let co = AsyncCoordinator::with_hooks(RecordingHooks::default());
        let log = Log::default();
        let key = GroupKey::unique();
        let (tx, rx) = oneshot::channel::<u32>();

        let x = co.run(
            async move { rx.await.map_err(|_| "dropped") },
            options(&log, "x", key, RunAction::Parallel),
        );
        let y = co.run(
            async { Ok::<_, &str>(2) },
            options(&log, "y", key, RunAction::Parallel),
        );

        assert_eq!(y.await.unwrap(), 2);
        tx.send(1).unwrap();
        assert_eq!(x.await.unwrap(), 1);

        assert_eq!(
            *log.lock(),
            vec!["y success", "y end", "x success", "x end"]
        );
        assert_eq!(
            co.hooks().statuses(),
            vec![RunStatus::Running, RunStatus::Running]
        );
    }

    #[tokio::test]
    async fn hide_overrides_an_earlier_break() {
        let co = AsyncCoordinator::with_hooks(RecordingHooks::default());
        let key = GroupKey::unique();
        let ended = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&ended);

        let x = co.run(
            async { Ok::<_, &str>(1) },
            RunOptions::new()
                .key(key)
                .on_end(move |status| seen.lock().push(status)),
        );
        let _y = co.run(async { Ok::<_, &str>(2) }, RunOptions::new().key(key));
        let _z = co.run(
            async { Ok::<_, &str>(3) },
            RunOptions::new().key(key).action(RunAction::Hide),
        );

        assert_eq!(x.await.unwrap(), 1);
        assert_eq!(*ended.lock(), vec![RunStatus::Hidden]);
        assert_eq!(co.hooks().statuses(), vec![RunStatus::Hidden]);
    }

    #[tokio::test]
    async fn superseded_runs_never_return_to_running() {
        let co = AsyncCoordinator::new();
        let key = GroupKey::unique();

        let x = co.run(async { Ok::<_, &str>(1) }, RunOptions::new().key(key));
        let _y = co.run(async { Ok::<_, &str>(2) }, RunOptions::new().key(key));
        let x_id = co.next_id.load(Ordering::Relaxed) - 2;
        assert_eq!(co.status_of(key, x_id), RunStatus::Broken);

        let _z = co.run(
            async { Ok::<_, &str>(3) },
            RunOptions::new().key(key).action(RunAction::Hide),
        );
        assert_eq!(co.status_of(key, x_id), RunStatus::Hidden);

        let _w = co.run(
            async { Ok::<_, &str>(4) },
            RunOptions::new().key(key).action(RunAction::Parallel),
        );
        assert_eq!(co.status_of(key, x_id), RunStatus::Hidden);
        assert_ne!(co.status_of(key, x_id), RunStatus::Running);
        drop(x);
    }

    #[tokio::test]
    async fn callbacks_receive_the_run_status() {
        let co = AsyncCoordinator::new();
        let key = GroupKey::unique();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let (on_success, on_end) = (Arc::clone(&statuses), Arc::clone(&statuses));

        let run = co.run(
            async { Ok::<_, &str>(1) },
            RunOptions::new()
                .key(key)
                .on_success(move |status| on_success.lock().push(status))
                .on_end(move |status| on_end.lock().push(status)),
        );

        assert_eq!(run.await.unwrap(), 1);
        assert_eq!(*statuses.lock(), vec![RunStatus::Running, RunStatus::Running]);
    }

    #[tokio::test]
    async fn untracked_runs_always_fire() {
        let co = AsyncCoordinator::new();
        let log = Log::default();

        let a = co.run(
            async { Ok::<_, &str>(1) },
            RunOptions::new().on_success(push(&log, "a success")),
        );
        let b = co.run_with(
            || async { Err::<u32, _>("nope") },
            RunOptions::new()
                .on_fail(push(&log, "b fail"))
                .on_end(push(&log, "b end")),
        );

        assert_eq!(a.await.unwrap(), 1);
        assert!(matches!(b.await, Err(RunError::Failed("nope"))));
        assert_eq!(*log.lock(), vec!["a success", "b fail", "b end"]);
    }

    #[tokio::test]
    async fn begin_hook_failure_is_the_runs_failure() {
        let co = AsyncCoordinator::with_hooks(RecordingHooks {
            fail_begin: true,
            ..Default::default()
        });
        let log = Log::default();

        let res = co
            .run(
                async { Ok::<_, &str>(1) },
                RunOptions::new().on_fail(push(&log, "failed")),
            )
            .await;

        assert!(matches!(res, Err(RunError::Hook(_))));
        assert_eq!(*log.lock(), vec!["failed"]);
        assert_eq!(co.hooks().statuses(), vec![RunStatus::Running]);
    }

    #[tokio::test]
    async fn dropping_a_run_releases_its_record() {
        let co = AsyncCoordinator::new();
        let key = GroupKey::unique();

        let pending = co.run(
            std::future::pending::<Result<(), &str>>(),
            RunOptions::new().key(key),
        );
        assert_eq!(co.in_flight(key), 1);
        drop(pending);
        assert_eq!(co.in_flight(key), 0);
    }

    #[test]
    fn unknown_runs_count_as_broken() {
        let co = AsyncCoordinator::new();
        assert_eq!(co.status_of(GroupKey::GLOBAL, 42), RunStatus::Broken);
    }

    #[test]
    fn superseded_maps_to_dispatch_superseded() {
        let err: DispatchError = RunError::<DispatchError>::Superseded.into();
        assert!(err.is_superseded());
    }
}
