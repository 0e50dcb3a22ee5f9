//! Job scheduler.
//!
//! All bookkeeping lives in one [`State`] behind a mutex. Control calls
//! (`submit`, `cancel`, `pause`, `resume`) mutate it and return at once; a
//! coordinator task owns dispatch and spawns one worker per running job.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Notify, broadcast};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::events::{EVENT_CHANNEL_CAPACITY, EventEmitter, JobEvent, QueueEvent};
use super::job::{Job, JobStatus};
use super::worker;
use crate::config::{ConfigProvider, ConfigSnapshot};
use crate::convert::{Converter, MediaKind, ProgressUpdate};
use crate::destination::{DestinationResolver, is_excluded};
use crate::{Error, Result};

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub paused: bool,
    pub active: usize,
    pub queued: usize,
    pub max_concurrency: usize,
}

struct JobEntry {
    job: Job,
    config: Arc<ConfigSnapshot>,
    cancel: Option<CancellationToken>,
}

struct State {
    jobs: HashMap<String, JobEntry>,
    /// Submission order of `jobs`.
    order: Vec<String>,
    pending: VecDeque<String>,
    paused: bool,
    active: usize,
    max_concurrency: usize,
    /// Cancelled while processing; removed once the worker confirms exit.
    tearing_down: HashSet<String>,
    /// Destinations owned by running jobs.
    reserved: HashSet<PathBuf>,
    ran_since_idle: bool,
}

impl State {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            order: Vec::new(),
            pending: VecDeque::new(),
            paused: false,
            active: 0,
            max_concurrency: 1,
            tearing_down: HashSet::new(),
            reserved: HashSet::new(),
            ran_since_idle: false,
        }
    }

    fn forget(&mut self, id: &str) -> Option<JobEntry> {
        let entry = self.jobs.remove(id)?;
        self.order.retain(|o| o != id);
        Some(entry)
    }

    fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.active == 0
    }
}

/// Work handed from the dispatcher to a worker.
pub(crate) struct Launch {
    pub id: String,
    pub source: PathBuf,
    pub config: Arc<ConfigSnapshot>,
    pub cancel: CancellationToken,
}

/// How a worker's job ended.
pub(crate) enum Completion {
    Done,
    Failed(Error),
    Cancelled,
}

pub(crate) struct Inner {
    state: Mutex<State>,
    events: EventEmitter,
    pub(crate) converter: Arc<dyn Converter>,
    provider: Arc<dyn ConfigProvider>,
    notify: Notify,
    shutdown: CancellationToken,
    workers: Mutex<JoinSet<()>>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn emit_job(&self, job: &Job) {
        self.events.emit(QueueEvent::Job(JobEvent::from(job)));
    }

    fn emit_idle_if_drained(&self, state: &mut State) {
        if state.ran_since_idle && state.is_drained() {
            state.ran_since_idle = false;
            info!("Queue is idle");
            self.events.emit(QueueEvent::Idle);
        }
    }

    /// Move as many queued jobs as allowed into processing.
    fn dispatch_ready(&self) -> Vec<Launch> {
        let mut state = self.state.lock();
        let mut launches = Vec::new();

        while !state.paused && state.active < state.max_concurrency {
            let Some(id) = state.pending.pop_front() else {
                break;
            };
            let cancel = self.shutdown.child_token();
            let Some(entry) = state.jobs.get_mut(&id) else {
                continue;
            };
            // The status flips once the destination is known.
            entry.cancel = Some(cancel.clone());
            let launch = Launch {
                id: id.clone(),
                source: entry.job.source_path.clone(),
                config: entry.config.clone(),
                cancel,
            };
            state.active += 1;
            state.ran_since_idle = true;
            debug!(job_id = %id, active = state.active, "Dispatching job");
            launches.push(launch);
        }

        launches
    }

    fn spawn_workers(self: &Arc<Self>, launches: Vec<Launch>) {
        if launches.is_empty() {
            return;
        }
        let mut workers = self.workers.lock();
        while workers.try_join_next().is_some() {}
        for launch in launches {
            let span = info_span!("job", id = %launch.id);
            workers.spawn(worker::run(self.clone(), launch).instrument(span));
        }
    }

    /// Resolve and reserve the destination of a running job, then publish
    /// its `processing` record. `Ok(None)` means the job was cancelled.
    pub(crate) fn begin_processing(&self, id: &str, kind: MediaKind) -> Result<Option<PathBuf>> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let Some(entry) = state.jobs.get(id) else {
            return Ok(None);
        };
        let config = entry.config.clone();
        let resolver = DestinationResolver {
            dest_dir: config.dest_dir.as_deref(),
            policy: config.collision_option,
            reserved: &state.reserved,
        };
        let dest = resolver.resolve(&entry.job.source_path, kind)?;

        state.reserved.insert(dest.clone());
        if let Some(entry) = state.jobs.get_mut(id) {
            entry.job.status = JobStatus::Processing;
            entry.job.dest_path = Some(dest.clone());
            entry.job.progress = 0;
            info!(dest = %dest.display(), "Job processing");
            self.emit_job(&entry.job);
        }
        Ok(Some(dest))
    }

    pub(crate) fn report_progress(&self, id: &str, update: ProgressUpdate) {
        let mut state = self.state.lock();
        let Some(entry) = state.jobs.get_mut(id) else {
            return;
        };
        let job = &mut entry.job;
        if job.status != JobStatus::Processing {
            return;
        }

        let percent = update.percent.min(100).max(job.progress);
        if percent == job.progress && update.speed == job.speed {
            return;
        }
        job.progress = percent;
        job.speed = update.speed;
        self.emit_job(job);
    }

    /// Record a worker's outcome and free its slot.
    pub(crate) fn finish(&self, id: &str, dest: Option<&Path>, completion: Completion) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            if let Some(dest) = dest {
                state.reserved.remove(dest);
            }

            let poisoned = state.tearing_down.remove(id);
            if poisoned || matches!(completion, Completion::Cancelled) {
                state.forget(id);
                debug!("Cancelled job torn down");
            } else if let Some(entry) = state.jobs.get_mut(id) {
                entry.cancel = None;
                match completion {
                    Completion::Done => {
                        entry.job.mark_done();
                        info!("Job done");
                    }
                    Completion::Failed(e) => {
                        warn!(error = %e, "Job failed");
                        entry.job.mark_failed(e.to_string());
                    }
                    Completion::Cancelled => {}
                }
                self.emit_job(&entry.job);
            }

            self.emit_idle_if_drained(&mut state);
        }
        self.notify.notify_one();
    }
}

/// Background conversion queue.
///
/// Dropping the queue cancels every running job; call [`shutdown`] to also
/// wait for the converters to exit.
///
/// [`shutdown`]: ConversionQueue::shutdown
pub struct ConversionQueue {
    inner: Arc<Inner>,
}

impl ConversionQueue {
    /// Create the queue and start its dispatcher. Must be called from within
    /// a tokio runtime.
    pub fn start(converter: Arc<dyn Converter>, provider: Arc<dyn ConfigProvider>) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State::new()),
            events: EventEmitter::new(EVENT_CHANNEL_CAPACITY),
            converter,
            provider,
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(JoinSet::new()),
            coordinator: Mutex::new(None),
        });

        let coordinator = tokio::spawn(coordinate(inner.clone()));
        *inner.coordinator.lock() = Some(coordinator);

        Self { inner }
    }

    /// Queue every path not already tracked and not excluded.
    ///
    /// Returns the ids of the jobs created. The configuration is captured
    /// once for the whole batch.
    pub fn submit<I, P>(&self, paths: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::other("Queue has been shut down"));
        }
        let config = self.inner.provider.snapshot()?;

        let mut created = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.max_concurrency = config.effective_concurrency();

            for path in paths {
                let id = path.as_ref().to_string_lossy().into_owned();
                if id.is_empty() || state.tearing_down.contains(&id) {
                    continue;
                }
                let tracked = state.jobs.get(&id).map(|e| e.job.status);
                if tracked.is_some_and(|status| !status.is_terminal()) {
                    continue;
                }
                if is_excluded(&id, &config.exclude_patterns) {
                    debug!(path = %id, "Skipping excluded path");
                    continue;
                }
                if tracked.is_some() {
                    state.forget(&id);
                }

                let job = Job::new(id.clone());
                self.inner.emit_job(&job);
                state.jobs.insert(
                    id.clone(),
                    JobEntry {
                        job,
                        config: config.clone(),
                        cancel: None,
                    },
                );
                state.order.push(id.clone());
                state.pending.push_back(id.clone());
                created.push(id);
            }
        }

        if !created.is_empty() {
            info!(count = created.len(), "Queued jobs");
            self.inner.notify.notify_one();
        }
        Ok(created)
    }

    /// Cancel a queued or running job. Returns whether anything was cancelled.
    ///
    /// A running job disappears from the queue at once and never reports
    /// `done` or `error`; its path can be submitted again once the converter
    /// has exited.
    pub fn cancel(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let (status, dispatched) = match state.jobs.get(id) {
            Some(entry) => (entry.job.status, entry.cancel.is_some()),
            None => return false,
        };

        match status {
            JobStatus::Queued if !dispatched => {
                state.pending.retain(|p| p != id);
                state.forget(id);
                info!(job_id = %id, "Cancelled queued job");
                self.inner.emit_idle_if_drained(&mut state);
                true
            }
            // A dispatched job may not have resolved its destination yet.
            JobStatus::Queued | JobStatus::Processing => {
                if let Some(entry) = state.forget(id)
                    && let Some(cancel) = entry.cancel
                {
                    cancel.cancel();
                }
                state.tearing_down.insert(id.to_string());
                info!(job_id = %id, "Cancelling running job");
                true
            }
            JobStatus::Done | JobStatus::Error => false,
        }
    }

    /// Stop dispatching. Running jobs continue.
    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if !state.paused {
            state.paused = true;
            info!("Queue paused");
            self.inner.events.emit(QueueEvent::Paused);
        }
    }

    pub fn resume(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.paused {
                return;
            }
            state.paused = false;
            info!("Queue resumed");
            self.inner.events.emit(QueueEvent::Resumed);
        }
        self.inner.notify.notify_one();
    }

    /// Drop a finished job from the history.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let finished = state
            .jobs
            .get(id)
            .is_some_and(|e| e.job.status.is_terminal());
        finished && state.forget(id).is_some()
    }

    /// Drop every finished job. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut state = self.inner.state.lock();
        let finished: Vec<String> = state
            .order
            .iter()
            .filter(|id| {
                state
                    .jobs
                    .get(*id)
                    .is_some_and(|e| e.job.status.is_terminal())
            })
            .cloned()
            .collect();
        for id in &finished {
            state.forget(id);
        }
        finished.len()
    }

    /// Snapshots of all tracked jobs in submission order.
    pub fn jobs(&self) -> Vec<Job> {
        let state = self.inner.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .map(|e| e.job.clone())
            .collect()
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.inner.state.lock().jobs.get(id).map(|e| e.job.clone())
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            paused: state.paused,
            active: state.active,
            queued: state.pending.len(),
            max_concurrency: state.max_concurrency,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Cancel every running job, wait for the converters to exit and close
    /// the event stream.
    pub async fn shutdown(&self) {
        info!("Shutting down conversion queue");
        self.inner.shutdown.cancel();

        let coordinator = self.inner.coordinator.lock().take();
        if let Some(handle) = coordinator
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Queue coordinator ended abnormally");
        }

        let mut workers = std::mem::take(&mut *self.inner.workers.lock());
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Queue worker ended abnormally");
            }
        }

        self.inner.events.close();
        info!("Conversion queue stopped");
    }
}

impl Drop for ConversionQueue {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

/// Dispatch loop: wakes on every submit, resume and slot release.
async fn coordinate(inner: Arc<Inner>) {
    debug!("Queue coordinator started");
    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            _ = inner.notify.notified() => {}
        }

        let launches = inner.dispatch_ready();
        inner.spawn_workers(launches);
    }
    debug!("Queue coordinator stopped");
}
