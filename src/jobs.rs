use crate::db::now_ms;
use crate::import_tmdb::ImportTmdbJob;
use crate::import_watchmode::ImportWatchmodeJob;
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

const DUMMY_SLEEP_SLICE_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// The closed set of task kinds the queue knows how to run. Submitting any
/// other type string is a caller error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    ImportWatchmode,
    ImportTmdb,
    DummySleep,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ImportWatchmode => "import-watchmode",
            JobType::ImportTmdb => "import-tmdb",
            JobType::DummySleep => "dummy-sleep",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "import-watchmode" => Some(JobType::ImportWatchmode),
            "import-tmdb" => Some(JobType::ImportTmdb),
            "dummy-sleep" => Some(JobType::DummySleep),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobType::ImportWatchmode => "Import Watchmode Database",
            JobType::ImportTmdb => "Import TMDB Database",
            JobType::DummySleep => "Dummy Sleep",
        }
    }

    fn build(&self, paths: &AppPaths) -> Box<dyn BackgroundJob> {
        match self {
            JobType::ImportWatchmode => Box::new(ImportWatchmodeJob::new(paths.clone())),
            JobType::ImportTmdb => Box::new(ImportTmdbJob::new(paths.clone())),
            JobType::DummySleep => Box::new(DummySleepJob),
        }
    }
}

/// One named, cancellable unit of work. Implementations must re-check
/// cancellation at least once per processed record batch and report progress
/// through the context rather than touching queue state.
pub trait BackgroundJob: Send {
    fn run(&self, args: &serde_json::Value, ctx: &TaskContext) -> Result<()>;
}

/// Handed to a running task: a read-only view of the cancellation flag plus a
/// write-only progress callback. Tasks never see the queue itself.
pub struct TaskContext {
    cancelled: Arc<AtomicBool>,
    progress: Box<dyn Fn(Option<u64>, Option<u64>, &str) + Send + Sync>,
}

impl TaskContext {
    pub fn new(
        cancelled: Arc<AtomicBool>,
        progress: impl Fn(Option<u64>, Option<u64>, &str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            cancelled,
            progress: Box::new(progress),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    pub fn report_progress(&self, current: Option<u64>, max: Option<u64>, description: &str) {
        (self.progress)(current, max, description);
    }
}

struct DummySleepJob;

impl BackgroundJob for DummySleepJob {
    fn run(&self, args: &serde_json::Value, ctx: &TaskContext) -> Result<()> {
        let millis = args.get("millis").and_then(|v| v.as_u64()).unwrap_or(1_000);
        let mut slept = 0u64;
        while slept < millis {
            ctx.check_cancelled()?;
            let slice = DUMMY_SLEEP_SLICE_MS.min(millis - slept);
            thread::sleep(Duration::from_millis(slice));
            slept += slice;
            ctx.report_progress(Some(slept), Some(millis), "Sleeping...");
        }
        ctx.report_progress(Some(millis), Some(millis), "Complete");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: JobType,
    pub label: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub active: Option<TaskView>,
    pub queue: Vec<TaskView>,
}

struct QueuedEntry {
    id: String,
    task_type: JobType,
    args: serde_json::Value,
}

struct ActiveEntry {
    id: String,
    task_type: JobType,
    status: JobStatus,
    current: Option<u64>,
    max: Option<u64>,
    description: String,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedEntry>,
    active: Option<ActiveEntry>,
}

struct PromotedEntry {
    id: String,
    task_type: JobType,
    args: serde_json::Value,
    cancelled: Arc<AtomicBool>,
}

pub type NotifyFn = Box<dyn Fn(QueueSnapshot) + Send + Sync>;

/// Single-flight task queue: at most one task runs at a time, pending
/// requests wait in FIFO order, and every state transition is fanned out to
/// the subscribed observer. Queue state lives only in memory; a restart
/// forgets everything.
pub struct TaskQueue {
    paths: AppPaths,
    state: Mutex<QueueState>,
    notify: Mutex<Option<NotifyFn>>,
    next_seq: AtomicU64,
    // Self-handle so the worker thread can outlive the caller's borrow.
    me: Weak<TaskQueue>,
}

impl TaskQueue {
    pub fn new(paths: AppPaths) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            paths,
            state: Mutex::new(QueueState::default()),
            notify: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    /// Replaces the current observer. The callback sees the full
    /// `{active, queue}` snapshot on every transition, in the order the
    /// transitions occurred.
    pub fn subscribe(&self, f: impl Fn(QueueSnapshot) + Send + Sync + 'static) {
        *self.lock_notify() = Some(Box::new(f));
    }

    pub fn submit(&self, task_type: &str, args: serde_json::Value) -> Result<String> {
        let task_type = JobType::from_str(task_type)
            .ok_or_else(|| EngineError::UnknownJobType(task_type.to_string()))?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("task-{seq}-{}", now_ms());
        {
            let mut state = self.lock_state();
            state.queue.push_back(QueuedEntry {
                id: id.clone(),
                task_type,
                args,
            });
        }
        self.emit();
        self.maybe_start_worker();
        Ok(id)
    }

    /// Marks the active task cancelled and raises its flag. Returns without
    /// waiting for the pipeline to observe the flag; cancellation is
    /// cooperative.
    pub fn cancel_active(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            let active = state.active.as_mut().ok_or(EngineError::NoActiveJob)?;
            active.status = JobStatus::Cancelled;
            active.cancelled.store(true, Ordering::SeqCst);
        }
        self.emit();
        Ok(())
    }

    /// Removes a still-queued task. The active task is never affected.
    pub fn remove_queued(&self, task_id: &str) -> Result<()> {
        {
            let mut state = self.lock_state();
            let index = state
                .queue
                .iter()
                .position(|entry| entry.id == task_id)
                .ok_or_else(|| EngineError::JobNotFound(task_id.to_string()))?;
            state.queue.remove(index);
        }
        self.emit();
        Ok(())
    }

    pub fn get_state(&self) -> QueueSnapshot {
        let state = self.lock_state();
        snapshot_of(&state)
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_notify(&self) -> MutexGuard<'_, Option<NotifyFn>> {
        self.notify.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self) {
        let snapshot = self.get_state();
        if let Some(f) = self.lock_notify().as_ref() {
            f(snapshot);
        }
    }

    /// Promotes the FIFO head into the active slot and spawns the worker
    /// thread, unless a task is already running. The worker keeps draining
    /// the queue one task at a time; promotion is never parallelized.
    fn maybe_start_worker(&self) {
        let Some(entry) = self.promote_next() else {
            return;
        };
        let Some(queue) = self.me.upgrade() else {
            return;
        };
        thread::spawn(move || queue.worker_loop(entry));
    }

    fn promote_next(&self) -> Option<PromotedEntry> {
        let promoted = {
            let mut state = self.lock_state();
            if state.active.is_some() {
                return None;
            }
            let entry = state.queue.pop_front()?;
            let cancelled = Arc::new(AtomicBool::new(false));
            state.active = Some(ActiveEntry {
                id: entry.id.clone(),
                task_type: entry.task_type,
                status: JobStatus::Running,
                current: None,
                max: None,
                description: String::new(),
                cancelled: cancelled.clone(),
            });
            PromotedEntry {
                id: entry.id,
                task_type: entry.task_type,
                args: entry.args,
                cancelled,
            }
        };
        self.emit();
        Some(promoted)
    }

    fn worker_loop(self: Arc<Self>, mut entry: PromotedEntry) {
        loop {
            Self::execute(&self, entry);
            entry = match self.promote_next() {
                Some(next) => next,
                None => break,
            };
        }
    }

    fn execute(queue: &Arc<TaskQueue>, entry: PromotedEntry) {
        let _ = queue.log_line(
            &entry.id,
            "info",
            "task_started",
            serde_json::json!({ "type": entry.task_type.as_str() }),
        );

        let job = entry.task_type.build(&queue.paths);
        let progress_queue = Arc::clone(queue);
        let ctx = TaskContext::new(entry.cancelled.clone(), move |current, max, description| {
            progress_queue.record_progress(current, max, description)
        });
        let result = job.run(&entry.args, &ctx);
        queue.finish_active(result, &entry);
    }

    fn record_progress(&self, current: Option<u64>, max: Option<u64>, description: &str) {
        {
            let mut state = self.lock_state();
            match state.active.as_mut() {
                Some(active) if !active.cancelled.load(Ordering::SeqCst) => {
                    active.current = current;
                    active.max = max;
                    active.description = description.to_string();
                }
                _ => return,
            }
        }
        self.emit();
    }

    /// Terminal bookkeeping. Cancellation supersedes both success and
    /// failure: once `cancel_active` succeeded, the task ends `cancelled`
    /// even if the pipeline later returned `Ok` or an error of its own.
    fn finish_active(&self, result: Result<()>, entry: &PromotedEntry) {
        let terminal = {
            let mut state = self.lock_state();
            match state.active.as_mut() {
                Some(active) => {
                    let was_cancelled = active.cancelled.load(Ordering::SeqCst);
                    match &result {
                        _ if was_cancelled => active.status = JobStatus::Cancelled,
                        Ok(()) => active.status = JobStatus::Completed,
                        Err(err) => {
                            active.status = JobStatus::Failed;
                            active.description = err.to_string();
                        }
                    }
                    active.status
                }
                None => JobStatus::Failed,
            }
        };
        // Observers see the terminal status while the task is still in the
        // active slot, then see the slot clear.
        self.emit();
        {
            let mut state = self.lock_state();
            state.active = None;
        }
        self.emit();

        let event = match terminal {
            JobStatus::Completed => "task_completed",
            JobStatus::Cancelled => "task_cancelled",
            _ => "task_failed",
        };
        let data = match (&result, terminal) {
            (Err(err), JobStatus::Failed) => serde_json::json!({ "error": err.to_string() }),
            _ => serde_json::json!({}),
        };
        let _ = self.log_line(&entry.id, "info", event, data);
    }

    fn log_line(
        &self,
        task_id: &str,
        level: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "task_id": task_id,
            "level": level,
            "event": event,
            "data": data
        })
        .to_string();

        let path = self.paths.task_logs_dir().join(format!("{task_id}.jsonl"));
        std::fs::create_dir_all(self.paths.task_logs_dir())?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }
}

fn snapshot_of(state: &QueueState) -> QueueSnapshot {
    QueueSnapshot {
        active: state.active.as_ref().map(|active| TaskView {
            id: active.id.clone(),
            task_type: active.task_type,
            label: active.task_type.label().to_string(),
            status: active.status,
            current: active.current,
            max: active.max,
            description: active.description.clone(),
        }),
        queue: state
            .queue
            .iter()
            .map(|entry| TaskView {
                id: entry.id.clone(),
                task_type: entry.task_type,
                label: entry.task_type.label().to_string(),
                status: JobStatus::Queued,
                current: None,
                max: None,
                description: String::new(),
            })
            .collect(),
    }
}
