use super::collection::{copy_collection, CopyOutcome};
use super::options::CopyOptions;
use super::resolver::{CopyTask, Resolver, Selection};
use super::scheduler::{TaskScheduler, TASK_QUEUE_CAPACITY};
use crate::blocking::endpoint::Endpoint;
use crate::Result;
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Span};
use uuid::Uuid;

/// Everything needed to run a copy, except the endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyJob {
    /// what to copy.
    pub selection: Selection,
    /// number of collections copied at the same time.
    pub threads: usize,
    /// how to copy each collection.
    pub options: CopyOptions,
}

/// Counters of a finished job.
#[derive(Debug, Clone)]
pub struct JobSummary {
    /// collection copies handed to workers.
    pub scheduled: usize,
    /// collection copies which finished.
    pub completed: usize,
    /// collections left alone, see [SkipReason](super::SkipReason).
    pub skipped: usize,
    /// collection copies which failed, details are logged.
    pub failed: usize,
    /// documents written by this run.
    pub documents: u64,
    /// when the job started.
    pub started: DateTime<Local>,
    /// when the last collection was handled.
    pub finished: DateTime<Local>,
}

#[derive(Default)]
struct Tally {
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    documents: AtomicU64,
}

impl Tally {
    fn record(&self, outcome: CopyOutcome) {
        match outcome {
            CopyOutcome::Completed { documents } => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                self.documents.fetch_add(documents, Ordering::SeqCst);
            }
            CopyOutcome::Skipped(_) => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
            }
            CopyOutcome::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Copies collections between two endpoints.
///
/// ```no_run
/// use mongo_copy::blocking::{Connection, CopyJob, CopyOptions, MongoCopier, Selection};
///
/// let source = Connection::new("mongodb://localhost:27017").unwrap();
/// let target = Connection::new("mongodb://localhost:27018").unwrap();
/// let job = CopyJob {
///     selection: Selection {
///         source_databases: vec!["shop".to_string()],
///         ..Default::default()
///     },
///     threads: 4,
///     options: CopyOptions::default(),
/// };
/// let summary = MongoCopier::new(source, target, job).run().unwrap();
/// println!("{} collections failed", summary.failed);
/// ```
pub struct MongoCopier<E: Endpoint + 'static> {
    source: Arc<E>,
    target: Arc<E>,
    job: CopyJob,
}

impl<E: Endpoint + 'static> MongoCopier<E> {
    /// create a copier, nothing is checked until [MongoCopier::run].
    pub fn new(source: E, target: E, job: CopyJob) -> Self {
        MongoCopier {
            source: Arc::new(source),
            target: Arc::new(target),
            job,
        }
    }

    /// Run the whole job, returns once every collection is handled.
    ///
    /// Only configuration problems and failing to list source databases are errors, a failed
    /// collection is counted in [JobSummary::failed].
    pub fn run(&self) -> Result<JobSummary> {
        let job_id = Uuid::new_v4();
        let job_span = info_span!("copy_job", %job_id);
        let _enter = job_span.enter();
        let started = Local::now();

        let options = Arc::new(self.effective_options());
        let resolver = Resolver::new(&*self.source, &*self.target, &self.job.selection)?;
        let tasks = resolver.tasks(options)?;

        let tally = Arc::new(Tally::default());
        let scheduler = {
            let source = self.source.clone();
            let target = self.target.clone();
            let tally = tally.clone();
            let parent = Span::current();
            TaskScheduler::start(
                self.job.threads,
                TASK_QUEUE_CAPACITY,
                move |task: CopyTask| {
                    let span = info_span!(
                        parent: &parent,
                        "collection",
                        source = %task.source_namespace(),
                        target = %task.target_namespace()
                    );
                    let _enter = span.enter();
                    let src = source.collection(&task.database.source, &task.collection.source);
                    let dst = target.collection(&task.database.target, &task.collection.target);
                    tally.record(copy_collection(&src, &dst, &task.options));
                    Ok(())
                },
            )?
        };

        info!(threads = self.job.threads, "Copy job start");
        let mut scheduled = 0;
        for task in tasks {
            match task {
                Ok(task) => {
                    scheduler.add_task(task)?;
                    scheduled += 1;
                }
                Err(e) => error!(?e, "Resolve collections failed, skip database"),
            }
        }
        let report = scheduler.close_and_wait();

        let summary = JobSummary {
            scheduled,
            completed: tally.completed.load(Ordering::SeqCst),
            skipped: tally.skipped.load(Ordering::SeqCst),
            // the handler never returns errors, scheduler failures are panics.
            failed: tally.failed.load(Ordering::SeqCst) + report.failed,
            documents: tally.documents.load(Ordering::SeqCst),
            started,
            finished: Local::now(),
        };
        info!(
            scheduled = summary.scheduled,
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            documents = summary.documents,
            elapsed_secs = (summary.finished - summary.started).num_seconds(),
            "Copy job complete"
        );
        Ok(summary)
    }

    /// Options actually used: merging many collections into one target can't drop, resume or
    /// skip that target.
    fn effective_options(&self) -> CopyOptions {
        let mut options = self.job.options.clone();
        if self.job.selection.merge_into.is_some()
            && (options.drop_target_first || options.resume || options.skip_existing || options.if_smaller)
        {
            warn!("Merge copy ignores drop_target_first, resume, skip_existing and if_smaller");
            options.drop_target_first = false;
            options.resume = false;
            options.skip_existing = false;
            options.if_smaller = false;
        }
        options
    }
}
