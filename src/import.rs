//! Off-thread document import.
//!
//! An [`ImportPool`] owns a fixed number of worker threads. Each worker holds
//! its own copy of the parse routine and talks to the orchestrator only through
//! two channels: one job message in, one result message out per document. The
//! result carries the parsed value in its transfer encoding; a dispatcher thread
//! decodes it and completes the matching [`ImportTicket`] by correlation id.
//!
//! Nothing about completion order is promised. Results always name their path.

use std::collections::HashMap;
use std::future::Future;
use std::hash::BuildHasherDefault;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Utc};
use futures_util::future::join_all;
use seahash::SeaHasher;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, oneshot};
use tracing::{debug, info, warn};

use crate::codec::{self, TransferEncoding};
use crate::error::{ParseFailure, Result, StrataError};
use crate::parse::DocumentParser;
use crate::settings::ImportSettings;
use crate::value::{Value, ValueKind};

type PendingHasher = BuildHasherDefault<SeaHasher>;
type PendingJobs = HashMap<JobId, Pending, PendingHasher>;

/// How long `shutdown` waits for workers once nobody awaits an answer.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Host-supplied facts about a document that are not part of its text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub ctime: Option<DateTime<FixedOffset>>,
    pub mtime: Option<DateTime<FixedOffset>>,
    pub size: u64,
}

impl DocumentMetadata {
    /// Reads times and size from the file system.
    pub fn from_fs(path: &std::path::Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let stamp = |t: std::io::Result<std::time::SystemTime>| t.ok().map(|t| DateTime::<Utc>::from(t).fixed_offset());
        Ok(Self { ctime: stamp(meta.created()), mtime: stamp(meta.modified()), size: meta.len() })
    }
}

/// The job message sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub path: String,
    pub contents: String,
    pub metadata: DocumentMetadata,
}

impl ImportJob {
    pub fn new(path: impl Into<String>, contents: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self { path: path.into(), contents: contents.into(), metadata }
    }
}

/// Correlation id of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Envelope {
    id: JobId,
    job: ImportJob,
}

/// The result message sent back by a worker, exactly once per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResultMessage {
    pub id: JobId,
    pub path: String,
    pub result: std::result::Result<TransferEncoding, ParseFailure>,
}

/// What a ticket resolves to: the path it was submitted for and either the
/// decoded value or the reason there is none.
#[derive(Debug)]
pub struct ImportResult {
    pub path: String,
    pub value: Result<Value>,
}

struct Pending {
    path: String,
    reply: oneshot::Sender<ImportResult>,
}

/// Jobs somebody still waits on. Timed out jobs are forgotten here, so their
/// late answers count as unknown.
struct Shared {
    pending: Mutex<PendingJobs>,
    // wakes `drain`
    idle: Notify,
    // wakes a blocking `shutdown`
    emptied: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PendingJobs> {
        // a poisoned map is still consistent: entries are only inserted or removed whole
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn forget(&self, id: JobId) -> Option<Pending> {
        let mut pending = self.lock();
        let entry = pending.remove(&id);
        if pending.is_empty() {
            self.signal_idle();
        }
        entry
    }

    fn forget_all(&self) {
        self.lock().clear();
        self.signal_idle();
    }

    fn signal_idle(&self) {
        self.idle.notify_waiters();
        self.emptied.notify_all();
    }

    fn wait_idle(&self) {
        let mut pending = self.lock();
        while !pending.is_empty() {
            pending = self.emptied.wait(pending).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Future for one submitted job.
pub struct ImportTicket {
    id: JobId,
    path: String,
    reply: oneshot::Receiver<ImportResult>,
}

impl ImportTicket {
    pub fn id(&self) -> JobId {
        self.id
    }
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Future for ImportTicket {
    type Output = ImportResult;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.reply).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                let path = self.path.clone();
                Poll::Ready(ImportResult { value: Err(StrataError::Abandoned { path: path.clone() }), path })
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct ImportPool {
    jobs: Option<Sender<Envelope>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    workers: Vec<Option<JoinHandle<()>>>,
    // each worker reports its index here when it stops
    exits: Mutex<Receiver<usize>>,
    dispatcher: Option<JoinHandle<()>>,
    timeout: Option<Duration>,
}

impl ImportPool {
    /// Spawns the workers (at least one) and the dispatcher. Works without an
    /// async runtime; tickets can be awaited from any executor.
    pub fn start<P: DocumentParser>(parser: P, settings: &ImportSettings) -> Self {
        let worker_count = settings.workers.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Envelope>();
        let (result_tx, result_rx) = mpsc::channel::<ImportResultMessage>();
        let (exit_tx, exit_rx) = mpsc::channel::<usize>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingJobs::default()),
            idle: Notify::new(),
            emptied: Condvar::new(),
        });

        let workers = (0..worker_count)
            .map(|index| {
                let parser = parser.clone();
                let jobs = Arc::clone(&job_rx);
                let results = result_tx.clone();
                let exited = exit_tx.clone();
                Some(std::thread::spawn(move || {
                    run_worker(index, parser, jobs, results);
                    let _ = exited.send(index);
                }))
            })
            .collect();
        // the workers hold the only result senders now
        drop(result_tx);

        let dispatcher = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || run_dispatcher(result_rx, shared))
        };
        info!(workers = worker_count, "import pool started");

        Self {
            jobs: Some(job_tx),
            shared,
            next_id: AtomicU64::new(0),
            workers,
            exits: Mutex::new(exit_rx),
            dispatcher: Some(dispatcher),
            timeout: settings.timeout_ms.map(Duration::from_millis),
        }
    }

    fn allocate_id(&self) -> JobId {
        JobId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Queues a document for parsing.
    pub fn submit(&self, job: ImportJob) -> Result<ImportTicket> {
        let jobs = self.jobs.as_ref().ok_or(StrataError::PoolClosed)?;
        let id = self.allocate_id();
        let path = job.path.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.lock().insert(id, Pending { path: path.clone(), reply: reply_tx });
        if jobs.send(Envelope { id, job }).is_err() {
            self.shared.forget(id);
            return Err(StrataError::PoolClosed);
        }
        debug!(id = id.get(), %path, "import submitted");
        Ok(ImportTicket { id, path, reply: reply_rx })
    }

    /// Submits and waits, applying the configured timeout. A timed out job is
    /// no longer outstanding; the worker is not interrupted and its late answer
    /// is discarded.
    pub async fn import(&self, job: ImportJob) -> ImportResult {
        let path = job.path.clone();
        let ticket = match self.submit(job) {
            Ok(ticket) => ticket,
            Err(e) => return ImportResult { path, value: Err(e) },
        };
        let id = ticket.id();
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, ticket).await {
                Ok(result) => result,
                Err(_) => {
                    self.shared.forget(id);
                    let millis = limit.as_millis() as u64;
                    warn!(%path, ms = millis, "import timed out");
                    ImportResult { value: Err(StrataError::Timeout { path: path.clone(), millis }), path }
                }
            },
            None => ticket.await,
        }
    }

    /// Imports every job concurrently. Results come back in submission order.
    pub async fn import_all(&self, jobs: impl IntoIterator<Item = ImportJob>) -> Vec<ImportResult> {
        join_all(jobs.into_iter().map(|job| self.import(job))).await
    }

    /// Number of submitted jobs that have not been answered or given up on.
    pub fn outstanding(&self) -> usize {
        self.shared.lock().len()
    }

    /// Waits until every submitted job has been answered.
    pub async fn drain(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Closes the queue, answers every job somebody still waits on, then joins
    /// the threads. Workers still stuck in a timed out job are left behind
    /// after a short grace period. Blocks the calling thread.
    pub fn shutdown(mut self) {
        self.close();
        self.shared.wait_idle();

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        let exits = self.exits.get_mut().unwrap_or_else(|e| e.into_inner());
        let mut running = self.workers.iter().filter(|w| w.is_some()).count();
        while running > 0 {
            let Ok(index) = exits.recv_timeout(deadline.saturating_duration_since(Instant::now())) else {
                break;
            };
            running -= 1;
            if let Some(worker) = self.workers.get_mut(index).and_then(Option::take) {
                if worker.join().is_err() {
                    warn!(worker = index, "import worker ended abnormally");
                }
            }
        }

        if running > 0 {
            // the dispatcher lives as long as any worker can still answer
            warn!(busy = running, "import workers still busy, not waiting for them");
            self.workers.clear();
            self.dispatcher.take();
        } else if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                warn!("import dispatcher ended abnormally");
            }
        }
        info!("import pool stopped");
    }

    fn close(&mut self) {
        // workers exit once the queue is empty and closed
        self.jobs.take();
    }
}

impl Drop for ImportPool {
    // dropping closes the queue but does not wait for busy workers
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker<P: DocumentParser>(
    index: usize,
    parser: P,
    jobs: Arc<Mutex<Receiver<Envelope>>>,
    results: Sender<ImportResultMessage>,
) {
    loop {
        let next = match jobs.lock() {
            Ok(queue) => queue.recv(),
            Err(_) => break,
        };
        let Ok(Envelope { id, job }) = next else {
            break;
        };
        debug!(worker = index, id = id.get(), path = %job.path, "parsing");
        let result = parse_isolated(&parser, &job);
        if let Err(failure) = &result {
            debug!(worker = index, path = %job.path, %failure, "parse failed");
        }
        let message = ImportResultMessage { id, path: job.path, result };
        if results.send(message).is_err() {
            break;
        }
    }
    debug!(worker = index, "import worker stopped");
}

/// Runs the parse routine behind the worker boundary. Errors, panics and
/// values that cannot be produced by an import all become a `ParseFailure`.
fn parse_isolated<P: DocumentParser>(parser: &P, job: &ImportJob) -> std::result::Result<TransferEncoding, ParseFailure> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| parser.parse(&job.path, &job.contents, &job.metadata)));
    match outcome {
        Ok(Ok(value)) => {
            if value.contains_kind(ValueKind::Function) {
                return Err(ParseFailure::new("parse routine produced a function value"));
            }
            codec::encode(&value).map_err(|e| ParseFailure::new(format!("parsed value cannot be transferred: {e}")))
        }
        Ok(Err(failure)) => Err(failure),
        Err(payload) => Err(ParseFailure::new(format!("parse routine panicked: {}", panic_message(payload.as_ref())))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

fn run_dispatcher(results: Receiver<ImportResultMessage>, shared: Arc<Shared>) {
    for message in results {
        // the slot is released before the ticket completes, so a woken
        // caller never sees its own job as outstanding
        match shared.forget(message.id) {
            Some(Pending { path, reply }) => {
                if path != message.path {
                    warn!(id = message.id.get(), expected = %path, got = %message.path, "result path does not match job");
                }
                let value = match message.result {
                    Ok(encoding) => codec::decode(&encoding),
                    Err(failure) => Err(StrataError::Parse { path: path.clone(), failure }),
                };
                if let Err(e) = &value {
                    warn!(%path, error = %e, "import failed");
                }
                // the receiver may have given up waiting
                let _ = reply.send(ImportResult { path, value });
            }
            None => debug!(id = message.id.get(), path = %message.path, "result for a job nobody waits on"),
        }
    }
    // every worker is gone; nobody will answer what is left
    shared.forget_all();
}
