//! Crawl engine
//!
//! [`Engine`] is the control surface around a single background worker that
//! walks every [`CrawlJob`] in order. The caller only toggles state and polls
//! progress:
//!
//! ```no_run
//! # async fn run(config: snpedia_harvest::Config) -> snpedia_harvest::Result<()> {
//! use snpedia_harvest::{Engine, TracingObserver};
//! use std::sync::Arc;
//!
//! let engine = Engine::from_config(&config, Arc::new(TracingObserver::default()))?;
//! engine.start()?;
//! // ... later, from a signal handler or UI
//! engine.stop()?;
//! let reports = engine.wait().await;
//! # Ok(())
//! # }
//! ```

mod crawl;
mod state;

#[cfg(test)]
mod testing;

pub use crawl::{JobOutcome, JobReport};
pub use state::{EngineControl, EngineState};

use crate::config::{Config, TimingConfig};
use crate::job::CrawlJob;
use crate::journal::ErrorJournal;
use crate::progress::{ProgressObserver, SilentObserver};
use crate::source::{ContentSource, MediaWikiSource};
use crate::storage::{self, lock_store, read_count, SharedStore, StorageError, Store};
use crawl::Crawler;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Checkpoint key holding the hash of the configuration of the last run
pub const CONFIG_HASH_KEY: &str = "config_hash";

/// Errors surfaced by the control surface
///
/// Failures inside the worker are never surfaced here; they are journaled and
/// retried.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cannot go from {from} to {to}")]
    InvalidTransition { from: EngineState, to: EngineState },

    #[error("A crawl worker is still running")]
    WorkerBusy,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No job labelled '{0}'")]
    UnknownJob(String),
}

/// Progress of one job as read from its checkpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub label: String,
    pub done: u64,
    pub total: u64,
    /// Whether the exhaustion marker is set
    pub complete: bool,
}

/// Resumable multi-category harvester
pub struct Engine {
    jobs: Arc<Vec<CrawlJob>>,
    timing: TimingConfig,
    source: Arc<dyn ContentSource>,
    store: SharedStore,
    observer: Arc<dyn ProgressObserver>,
    journal: Arc<ErrorJournal>,
    control: Arc<EngineControl>,
    worker: Mutex<Option<JoinHandle<Vec<JobReport>>>>,
}

impl Engine {
    /// Creates an engine over an already opened store
    ///
    /// Record tables for every job are created up front so a bad store fails
    /// here rather than inside the worker.
    pub fn new(
        jobs: Vec<CrawlJob>,
        timing: TimingConfig,
        store: SharedStore,
        source: Arc<dyn ContentSource>,
        journal: Arc<ErrorJournal>,
    ) -> Result<Self, EngineError> {
        {
            let mut guard = lock_store(&store)?;
            for job in &jobs {
                guard.ensure_record_table(&job.table, &job.id_column)?;
            }
        }

        Ok(Self {
            jobs: Arc::new(jobs),
            timing,
            source,
            store,
            observer: Arc::new(SilentObserver),
            journal,
            control: Arc::new(EngineControl::new()),
            worker: Mutex::new(None),
        })
    }

    /// Replaces the default no-op observer
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Builds the store, journal and MediaWiki source described by `config`
    ///
    /// Fails fast on an unusable store path or journal path.
    pub fn from_config(
        config: &Config,
        observer: Arc<dyn ProgressObserver>,
    ) -> crate::Result<Self> {
        let store = storage::open_shared(Path::new(&config.storage.database_path))?;
        let journal = Arc::new(ErrorJournal::open(Path::new(
            &config.storage.error_log_path,
        ))?);
        let source = Arc::new(MediaWikiSource::new(&config.source, &config.user_agent)?);

        tracing::debug!(
            "Engine configured: {} jobs, store {}, journal {}",
            config.effective_jobs().len(),
            config.storage.database_path,
            journal.path().display()
        );

        let engine = Self::new(
            config.effective_jobs(),
            config.timing.clone(),
            store,
            source,
            journal,
        )?;
        Ok(engine.with_observer(observer))
    }

    /// Records the configuration hash, returning true if it differs from the
    /// one stored by a previous run
    pub fn record_config_hash(&self, hash: &str) -> Result<bool, EngineError> {
        let mut store = lock_store(&self.store)?;
        let previous = store.read_checkpoint(CONFIG_HASH_KEY)?;
        store.upsert_checkpoint(CONFIG_HASH_KEY, hash)?;

        let changed = matches!(previous, Some(ref old) if old != hash);
        if changed {
            tracing::warn!("Configuration changed since the last run; resuming from existing checkpoints");
        }
        Ok(changed)
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.control.state()
    }

    /// Spawns the worker and returns immediately
    ///
    /// Valid from `Idle` or `Stopped`, once any previous worker has exited.
    /// Every start rehydrates checkpoints from the store.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(EngineError::WorkerBusy);
        }

        self.control.start()?;
        self.observer.on_log("Scraper started.");

        let crawler = self.crawler();
        let jobs = self.jobs.clone();
        *worker = Some(tokio::spawn(async move { crawler.run(&jobs).await }));

        Ok(())
    }

    /// Suspends work at the next chunk or page boundary
    pub fn pause(&self) -> Result<(), EngineError> {
        self.control.pause()?;
        self.observer.on_log("Scraper paused.");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.control.resume()?;
        self.observer.on_log("Scraper resumed.");
        Ok(())
    }

    /// Asks the worker to exit; observed within one poll interval
    ///
    /// Works from `Paused` without a resume. Chunks already committed stay
    /// committed.
    pub fn stop(&self) -> Result<(), EngineError> {
        self.control.stop()?;
        self.observer.on_log("Scraper stopping...");
        Ok(())
    }

    /// Waits for the current worker to exit
    ///
    /// Returns `None` if no worker was started since the last wait, or if the
    /// worker panicked.
    pub async fn wait(&self) -> Option<Vec<JobReport>> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        match handle.await {
            Ok(reports) => Some(reports),
            Err(e) => {
                tracing::error!("Crawl worker failed: {}", e);
                None
            }
        }
    }

    /// `(done, total)` for the job with this label
    pub fn current_progress(&self, label: &str) -> Result<(u64, u64), EngineError> {
        let job = self
            .jobs
            .iter()
            .find(|job| job.label == label)
            .ok_or_else(|| EngineError::UnknownJob(label.to_string()))?;

        let mut store = lock_store(&self.store)?;
        Ok((read_count(&mut *store, &job.count_key)?, job.expected_total))
    }

    /// `(done, total)` summed over every job
    pub fn combined_progress(&self) -> Result<(u64, u64), EngineError> {
        Ok(self
            .job_progress()?
            .iter()
            .fold((0, 0), |(done, total), p| (done + p.done, total + p.total)))
    }

    /// Per-job progress, in job order
    pub fn job_progress(&self) -> Result<Vec<JobProgress>, EngineError> {
        let mut store = lock_store(&self.store)?;
        self.jobs
            .iter()
            .map(|job| {
                Ok(JobProgress {
                    label: job.label.clone(),
                    done: read_count(&mut *store, &job.count_key)?,
                    total: job.expected_total,
                    complete: store.read_checkpoint(&job.done_key())?.is_some(),
                })
            })
            .collect()
    }

    /// Clears exhaustion markers and cursors so the next start re-walks
    /// every category from the beginning
    ///
    /// Stored records and counts are kept; the re-walk only fetches members
    /// that are not stored yet.
    pub fn reset_completion(&self) -> Result<(), EngineError> {
        if self.control.is_active() {
            return Err(EngineError::WorkerBusy);
        }

        let mut store = lock_store(&self.store)?;
        for job in self.jobs.iter() {
            store.delete_checkpoint(&job.done_key())?;
            store.delete_checkpoint(&job.cursor_key)?;
        }
        self.observer.on_log("Completion markers cleared; next run re-walks all categories.");
        Ok(())
    }

    fn crawler(&self) -> Crawler {
        Crawler {
            source: self.source.clone(),
            store: self.store.clone(),
            observer: self.observer.clone(),
            journal: self.journal.clone(),
            control: self.control.clone(),
            timing: self.timing.clone(),
        }
    }
}
