//! Crawl loop - drives one job at a time from checkpoint to exhaustion
//!
//! Per job:
//! 1. Rehydrate cursor, count and completion marker from the checkpoint table
//! 2. List one page of category members at the cursor (retrying with backoff)
//! 3. Drop members already stored, in one bulk lookup
//! 4. Fetch the rest in chunks; commit each chunk's records together with the
//!    new count checkpoint
//! 5. Advance the cursor checkpoint only once every chunk of the page is resolved
//! 6. At the end of the listing, mark the job complete; if a page had to be
//!    given up on, clear the cursor instead so the next start walks it again
//!
//! Remote calls race against `stop()`, so a stop never waits on a slow request.
//!
//! Every error is recovered here: remote and storage failures are journaled,
//! backed off, and retried on a later attempt or pass. Nothing propagates out
//! of the worker.

use crate::config::TimingConfig;
use crate::engine::state::EngineControl;
use crate::job::CrawlJob;
use crate::journal::{ErrorClass, ErrorJournal};
use crate::progress::ProgressObserver;
use crate::source::ContentSource;
use crate::storage::{lock_store, read_count, SharedStore, SqliteStore, StorageError, StorageResult, Store};
use std::collections::HashSet;
use std::sync::Arc;

/// How a job's crawl ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The listing reported no further pages
    Exhausted,
    /// The listing ended but some members could not be saved; the next
    /// start walks the category again from the top
    Partial,
    /// The job carried a completion marker and was not walked
    Skipped,
    /// The engine stopped before the category was exhausted
    Interrupted,
}

/// Final state of one job after a worker run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub label: String,
    pub outcome: JobOutcome,
    /// Count checkpoint value when the job ended
    pub count: u64,
}

enum ChunkOutcome {
    /// Every member was stored or has no content
    Resolved,
    /// This many members could not be saved
    Unsaved(usize),
    Stopped,
}

enum PageOutcome {
    /// Every member is stored or known to have no content
    Drained,
    /// This many members could not be saved
    Incomplete(usize),
    Stopped,
}

struct Resume {
    cursor: Option<String>,
    count: u64,
    complete: bool,
    /// A page was given up on since the category was last walked from the top
    rewalk: bool,
}

/// Everything the worker needs, cheaply cloneable into the spawned task
#[derive(Clone)]
pub(crate) struct Crawler {
    pub(crate) source: Arc<dyn ContentSource>,
    pub(crate) store: SharedStore,
    pub(crate) observer: Arc<dyn ProgressObserver>,
    pub(crate) journal: Arc<ErrorJournal>,
    pub(crate) control: Arc<EngineControl>,
    pub(crate) timing: TimingConfig,
}

impl Crawler {
    /// Runs the jobs in order until all are done or the engine stops
    ///
    /// Releases the store connection on exit.
    pub(crate) async fn run(&self, jobs: &[CrawlJob]) -> Vec<JobReport> {
        let mut reports = Vec::with_capacity(jobs.len());

        for job in jobs {
            if !self.control.is_active() {
                break;
            }

            let report = self.crawl_job(job).await;
            tracing::debug!(
                "{} harvest ended: {:?} at count {}",
                report.label,
                report.outcome,
                report.count
            );

            let interrupted = report.outcome == JobOutcome::Interrupted;
            reports.push(report);
            if interrupted {
                break;
            }
        }

        // Already stopped if the controller asked for it
        let _ = self.control.stop();
        match lock_store(&self.store) {
            Ok(mut store) => store.close(),
            Err(e) => tracing::warn!("Could not release store: {}", e),
        }
        self.log("Scraper stopped.");

        reports
    }

    async fn crawl_job(&self, job: &CrawlJob) -> JobReport {
        let report = |outcome, count| JobReport {
            label: job.label.clone(),
            outcome,
            count,
        };

        let Some(resume) = self.rehydrate(job).await else {
            return report(JobOutcome::Interrupted, 0);
        };

        if resume.complete && self.timing.skip_completed {
            self.log(&format!(
                "Skipping {} scraping: category already complete.",
                job.label
            ));
            return report(JobOutcome::Skipped, resume.count);
        }

        self.log(&format!("Starting {} scraping...", job.label));
        if let Some(cursor) = &resume.cursor {
            tracing::debug!("Resuming {} at cursor {}", job.category, cursor);
        }

        let mut cursor = resume.cursor;
        let mut count = resume.count;
        // Members with no content, not re-queried for the rest of the page
        let mut unavailable: HashSet<String> = HashSet::new();
        let mut list_failures = 0u32;
        let mut page_attempts = 0u32;
        let mut rewalk = resume.rewalk;

        loop {
            if !self.control.wait_while_paused(self.timing.poll_interval()).await {
                return report(JobOutcome::Interrupted, count);
            }

            let listed = self
                .control
                .unless_stopped(
                    self.source
                        .list_category_members(&job.category, cursor.as_deref()),
                )
                .await;
            let Some(listed) = listed else {
                return report(JobOutcome::Interrupted, count);
            };

            let page = match listed {
                Ok(page) => {
                    list_failures = 0;
                    page
                }
                Err(e) => {
                    list_failures += 1;
                    let class = ErrorClass::of_source(&e);
                    self.journal(&job.category, class, &e.to_string());
                    self.log(&format!(
                        "Error: {}. Retrying in {:?}...",
                        e,
                        self.timing.retry_backoff()
                    ));

                    if let Some(max) = self.timing.max_list_retries {
                        if list_failures > max {
                            self.log(&format!(
                                "Giving up on {} listing after {} retries; stopping. Progress is saved.",
                                job.label, max
                            ));
                            let _ = self.control.stop();
                            return report(JobOutcome::Interrupted, count);
                        }
                    }

                    if !self.backoff().await {
                        return report(JobOutcome::Interrupted, count);
                    }
                    continue;
                }
            };

            match self
                .drain_page(job, &page.members, &mut count, &mut unavailable)
                .await
            {
                PageOutcome::Stopped => return report(JobOutcome::Interrupted, count),
                PageOutcome::Drained => page_attempts = 0,
                PageOutcome::Incomplete(unresolved) => {
                    page_attempts += 1;
                    if page_attempts < self.timing.max_page_attempts {
                        self.log(&format!(
                            "{} {}s on this page were not saved. Retrying the page...",
                            unresolved, job.label
                        ));
                        continue;
                    }
                    let rewalk_key = job.rewalk_key();
                    let saved = self
                        .storage_retry(&job.category, |store| {
                            store.upsert_checkpoint(&rewalk_key, "1")
                        })
                        .await;
                    if saved.is_none() {
                        return report(JobOutcome::Interrupted, count);
                    }
                    rewalk = true;

                    self.log(&format!(
                        "Moving past a page with {} unsaved {}s after {} attempts; they will be retried on the next full pass.",
                        unresolved, job.label, page_attempts
                    ));
                    page_attempts = 0;
                }
            }

            match page.next_cursor {
                Some(next) => {
                    let saved = self
                        .storage_retry(&job.category, |store| {
                            store.upsert_checkpoint(&job.cursor_key, &next)
                        })
                        .await;
                    if saved.is_none() {
                        return report(JobOutcome::Interrupted, count);
                    }
                    cursor = Some(next);
                    unavailable.clear();

                    if !self.pace().await {
                        return report(JobOutcome::Interrupted, count);
                    }
                }
                None if rewalk => {
                    // Leave no marker and restart the walk from the top next time
                    let done_key = job.done_key();
                    let rewalk_key = job.rewalk_key();
                    let saved = self
                        .storage_retry(&job.category, |store| {
                            store.delete_checkpoint(&job.cursor_key)?;
                            store.delete_checkpoint(&done_key)?;
                            store.delete_checkpoint(&rewalk_key)
                        })
                        .await;
                    if saved.is_none() {
                        return report(JobOutcome::Interrupted, count);
                    }

                    self.log(&format!(
                        "Reached end of {} list with unsaved {}s. The next run walks the list again.",
                        job.label, job.label
                    ));
                    return report(JobOutcome::Partial, count);
                }
                None => {
                    let done_key = job.done_key();
                    let saved = self
                        .storage_retry(&job.category, |store| {
                            store.upsert_checkpoint(&done_key, "1")
                        })
                        .await;
                    if saved.is_none() {
                        return report(JobOutcome::Interrupted, count);
                    }

                    self.log(&format!(
                        "Scraping complete: Reached end of {} list.",
                        job.label
                    ));
                    return report(JobOutcome::Exhausted, count);
                }
            }
        }
    }

    async fn rehydrate(&self, job: &CrawlJob) -> Option<Resume> {
        let done_key = job.done_key();
        let rewalk_key = job.rewalk_key();
        self.storage_retry(&job.category, |store| {
            Ok(Resume {
                cursor: store.read_checkpoint(&job.cursor_key)?,
                count: read_count(store, &job.count_key)?,
                complete: store.read_checkpoint(&done_key)?.is_some(),
                rewalk: store.read_checkpoint(&rewalk_key)?.is_some(),
            })
        })
        .await
    }

    /// Fetches and stores every member of a page that is not stored yet
    async fn drain_page(
        &self,
        job: &CrawlJob,
        members: &[String],
        count: &mut u64,
        unavailable: &mut HashSet<String>,
    ) -> PageOutcome {
        let Some(known) = self
            .storage_retry(&job.category, |store| {
                store.existing_identifiers(&job.table, &job.id_column, members)
            })
            .await
        else {
            return PageOutcome::Stopped;
        };

        let mut seen = HashSet::new();
        let mut to_fetch = Vec::new();
        for id in members {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if known.contains(id) {
                self.observer
                    .on_status(*count, job.expected_total, &format!("Skipped {}", id));
            } else if !unavailable.contains(id) {
                to_fetch.push(id.clone());
            }
        }

        tracing::debug!(
            "{}: {} members, {} stored, {} to fetch",
            job.label,
            members.len(),
            known.len(),
            to_fetch.len()
        );

        let mut unresolved = 0;
        for chunk in to_fetch.chunks(job.effective_batch_size()) {
            if !self.control.wait_while_paused(self.timing.poll_interval()).await {
                return PageOutcome::Stopped;
            }

            match self.process_chunk(job, chunk, count, unavailable).await {
                ChunkOutcome::Resolved => {}
                ChunkOutcome::Stopped => return PageOutcome::Stopped,
                ChunkOutcome::Unsaved(missing) => {
                    unresolved += missing;
                    if !self.backoff().await {
                        return PageOutcome::Stopped;
                    }
                }
            }

            if !self.pace().await {
                return PageOutcome::Stopped;
            }
        }

        if unresolved == 0 {
            PageOutcome::Drained
        } else {
            PageOutcome::Incomplete(unresolved)
        }
    }

    /// Fetches one chunk and commits whatever content came back
    ///
    /// A stop during the fetch abandons the chunk without committing.
    async fn process_chunk(
        &self,
        job: &CrawlJob,
        chunk: &[String],
        count: &mut u64,
        unavailable: &mut HashSet<String>,
    ) -> ChunkOutcome {
        let Some(fetched) = self
            .control
            .unless_stopped(self.source.fetch_content_batch(chunk))
            .await
        else {
            return ChunkOutcome::Stopped;
        };

        let contents = match fetched {
            Ok(contents) => contents,
            Err(e) => {
                let class = ErrorClass::of_source(&e);
                let message = e.to_string();
                for id in chunk {
                    self.journal(id, class, &message);
                }
                self.log(&format!(
                    "Error fetching {} {}s ({}..): {}. Retrying in {:?}...",
                    chunk.len(),
                    job.label,
                    chunk.first().map(String::as_str).unwrap_or_default(),
                    message,
                    self.timing.retry_backoff()
                ));
                return ChunkOutcome::Unsaved(chunk.len());
            }
        };

        let mut entries = Vec::with_capacity(chunk.len());
        for id in chunk {
            match contents.get(id).cloned().flatten() {
                Some(content) => entries.push((id.clone(), content)),
                None => {
                    unavailable.insert(id.clone());
                    self.log(&format!("Page not found for {}. Skipping.", id));
                    self.observer
                        .on_status(*count, job.expected_total, &format!("Skipped {}", id));
                }
            }
        }

        if entries.is_empty() {
            return ChunkOutcome::Resolved;
        }

        let new_count = *count + entries.len() as u64;
        let committed = self.with_store(|store| {
            store.commit_chunk(
                &job.table,
                &job.id_column,
                &entries,
                &job.count_key,
                new_count,
            )
        });

        match committed {
            Ok(()) => {
                self.announce(job, entries.iter().map(|(id, _)| id.as_str()), count);
                ChunkOutcome::Resolved
            }
            Err(e) => match self.reconcile(job, &entries, count, e) {
                Ok(()) => ChunkOutcome::Resolved,
                Err(missing) => ChunkOutcome::Unsaved(missing),
            },
        }
    }

    /// Sorts out which entries of a failed commit are in the store anyway
    ///
    /// Entries present after the error count as captured; the rest are
    /// journaled and left for a later attempt.
    fn reconcile(
        &self,
        job: &CrawlJob,
        entries: &[(String, String)],
        count: &mut u64,
        err: StorageError,
    ) -> Result<(), usize> {
        let class = ErrorClass::of_storage(&err);
        let message = err.to_string();
        let ids: Vec<String> = entries.iter().map(|(id, _)| id.clone()).collect();

        let rechecked = self.with_store(|store| {
            Ok((
                store.existing_identifiers(&job.table, &job.id_column, &ids)?,
                read_count(store, &job.count_key)?,
            ))
        });
        let (present, stored_count) = match rechecked {
            Ok(found) => found,
            Err(recheck_err) => {
                for id in &ids {
                    self.journal(id, class, &message);
                }
                self.log(&format!(
                    "Error saving {} {}s: {} (recheck failed: {}). Retrying in {:?}...",
                    ids.len(),
                    job.label,
                    message,
                    recheck_err,
                    self.timing.retry_backoff()
                ));
                return Err(ids.len());
            }
        };

        // The transaction landed even though it reported an error
        if present.len() == ids.len() && stored_count >= *count + ids.len() as u64 {
            self.log(&format!(
                "Got error but {} {}s were saved successfully. Continuing...",
                ids.len(),
                job.label
            ));
            self.announce(job, ids.iter().map(String::as_str), count);
            *count = (*count).max(stored_count);
            return Ok(());
        }

        let recovered: Vec<&str> = ids
            .iter()
            .filter(|id| present.contains(*id))
            .map(String::as_str)
            .collect();
        let missing: Vec<&str> = ids
            .iter()
            .filter(|id| !present.contains(*id))
            .map(String::as_str)
            .collect();

        if !recovered.is_empty() {
            let new_count = *count + recovered.len() as u64;
            match self.with_store(|store| store.upsert_checkpoint(&job.count_key, &new_count.to_string())) {
                Ok(()) => {
                    for id in &recovered {
                        self.log(&format!(
                            "Got error but {} was saved successfully. Continuing...",
                            id
                        ));
                    }
                    self.announce(job, recovered.iter().copied(), count);
                }
                Err(e) => tracing::debug!("Count checkpoint not advanced after recovery: {}", e),
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        for id in &missing {
            self.journal(id, class, &message);
        }
        self.log(&format!(
            "Error saving {} {}s: {}. Retrying in {:?}...",
            missing.len(),
            job.label,
            message,
            self.timing.retry_backoff()
        ));
        Err(missing.len())
    }

    /// Emits a status event per stored record and a log line for the batch
    fn announce<'a>(
        &self,
        job: &CrawlJob,
        stored: impl Iterator<Item = &'a str>,
        count: &mut u64,
    ) {
        let mut latest = None;
        for id in stored {
            *count += 1;
            self.observer.on_status(*count, job.expected_total, id);
            latest = Some(id);
        }
        if let Some(latest) = latest {
            self.log(&format!(
                "Scraped {} {}s. Latest: {}",
                count, job.label, latest
            ));
        }
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut SqliteStore) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut store = lock_store(&self.store)?;
        f(&mut store)
    }

    /// Repeats a storage operation with backoff until it succeeds
    ///
    /// Returns `None` if the engine stops first.
    async fn storage_retry<T>(
        &self,
        identifier: &str,
        mut op: impl FnMut(&mut SqliteStore) -> StorageResult<T>,
    ) -> Option<T> {
        loop {
            match self.with_store(&mut op) {
                Ok(value) => return Some(value),
                Err(e) => {
                    self.journal(identifier, ErrorClass::of_storage(&e), &e.to_string());
                    self.log(&format!(
                        "Storage error: {}. Retrying in {:?}...",
                        e,
                        self.timing.retry_backoff()
                    ));
                    if !self.backoff().await {
                        return None;
                    }
                }
            }
        }
    }

    async fn backoff(&self) -> bool {
        self.control
            .sleep(self.timing.retry_backoff(), self.timing.poll_interval())
            .await
    }

    async fn pace(&self) -> bool {
        self.control
            .sleep(self.timing.chunk_delay(), self.timing.poll_interval())
            .await
    }

    fn log(&self, message: &str) {
        self.observer.on_log(message);
    }

    fn journal(&self, identifier: &str, class: ErrorClass, message: &str) {
        if let Err(e) = self.journal.record(identifier, class, message) {
            tracing::warn!("Failed to write error journal: {}", e);
        }
    }
}
