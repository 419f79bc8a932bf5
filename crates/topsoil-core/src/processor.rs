//! Thread-affinity processors.
//!
//! SQLite connections must only ever be driven from one nominated thread.
//! A [`Processor`] is the only gateway to that thread: work submitted from
//! any other thread is handed over through a channel and executed by the
//! owner, work submitted from the owner itself runs inline.
//!
//! Three implementations are provided:
//!
//! - [`CurrentThreadProcessor`]: the constructing thread is the owner and no
//!   other thread may submit work. This is the default for a database opened
//!   with `DataBase::at`.
//! - [`ThreadProcessor`]: spawns a dedicated owner thread that runs a single
//!   consumer loop.
//! - [`EventLoopProcessor`]: the constructing thread (typically a UI or event
//!   loop thread) is the owner and drains submitted work whenever it calls
//!   [`EventLoopProcessor::run_pending`].

use crate::Result;
use crate::error::{Error, TaskError, TaskErrorKind};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// A unit of work executed on the owner thread.
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A failure of a fire-and-forget task, delivered to failure subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub message: String,
}

/// The gateway to the thread that owns the storage connection.
pub trait Processor: Send + Sync {
    /// Submit a task and return immediately.
    ///
    /// Runs inline when called on the owner thread. Errors and panics are
    /// logged and forwarded to failure subscribers, since there is no caller
    /// left to report to.
    fn process(&self, task: Task);

    /// Submit a task and block until it has run on the owner thread.
    ///
    /// Runs inline when called on the owner thread. The task's error, or a
    /// panic converted into [`TaskErrorKind::Panicked`], is returned.
    fn process_now(&self, task: Task) -> Result<()>;

    /// The thread allowed to touch the storage connection.
    fn owner_thread(&self) -> ThreadId;

    /// Receive failures of tasks submitted with [`Processor::process`].
    fn subscribe_failures(&self) -> Receiver<TaskFailure>;

    fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner_thread()
    }
}

/// Result hand-back on top of [`Processor::process_now`].
pub trait ProcessorExt: Processor {
    /// Run `supplier` on the owner thread and return its result to the
    /// calling thread.
    fn process_now_and_get<T, F>(&self, supplier: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        self.process_now(Box::new(move || {
            let value = supplier()?;
            *out.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
            Ok(())
        }))?;
        let value = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        value.ok_or_else(|| {
            Error::Task(TaskError {
                kind: TaskErrorKind::Disconnected,
                message: "task finished without producing a result".to_string(),
            })
        })
    }
}

impl<P: Processor + ?Sized> ProcessorExt for P {}

/// Run a task, turning a panic into an error.
fn run_guarded(task: Task) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(result) => result,
        Err(payload) => Err(Error::from_panic(&*payload)),
    }
}

/// Fan-out of fire-and-forget failures.
#[derive(Default)]
struct FailureSink {
    subscribers: Mutex<Vec<Sender<TaskFailure>>>,
}

impl FailureSink {
    fn report(&self, error: &Error) {
        tracing::error!(error = %error, "processed task failed");
        let failure = TaskFailure {
            message: error.to_string(),
        };
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(failure.clone()).is_ok());
    }

    fn subscribe(&self) -> Receiver<TaskFailure> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

enum Job {
    Detached(Task),
    Blocking(Task, SyncSender<Result<()>>),
}

impl Job {
    fn run(self, failures: &FailureSink) {
        match self {
            Job::Detached(task) => {
                if let Err(e) = run_guarded(task) {
                    failures.report(&e);
                }
            }
            Job::Blocking(task, reply) => {
                let result = run_guarded(task);
                // The caller may have given up waiting; nothing to do then.
                let _ = reply.send(result);
            }
        }
    }
}

fn disconnected() -> Error {
    Error::Task(TaskError {
        kind: TaskErrorKind::Disconnected,
        message: "the owner thread is no longer running tasks".to_string(),
    })
}

fn wrong_thread(owner: ThreadId) -> Error {
    Error::Task(TaskError {
        kind: TaskErrorKind::WrongThread,
        message: format!(
            "called from {:?}, but this processor only runs on {:?}",
            thread::current().id(),
            owner
        ),
    })
}

/// Submit a blocking job over `sender` and wait for its reply.
fn send_and_wait(sender: &Sender<Job>, task: Task) -> Result<()> {
    let (reply_tx, reply_rx) = mpsc::sync_channel(1);
    tracing::debug!(caller = ?thread::current().id(), "handing task to owner thread");
    sender
        .send(Job::Blocking(task, reply_tx))
        .map_err(|_| disconnected())?;
    reply_rx.recv().map_err(|_| disconnected())?
}

/// Processor that only accepts work from the thread that created it.
pub struct CurrentThreadProcessor {
    owner: ThreadId,
    failures: FailureSink,
}

impl CurrentThreadProcessor {
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            failures: FailureSink::default(),
        }
    }
}

impl Default for CurrentThreadProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for CurrentThreadProcessor {
    fn process(&self, task: Task) {
        let result = if self.is_owner_thread() {
            run_guarded(task)
        } else {
            Err(wrong_thread(self.owner))
        };
        if let Err(e) = result {
            self.failures.report(&e);
        }
    }

    fn process_now(&self, task: Task) -> Result<()> {
        if self.is_owner_thread() {
            run_guarded(task)
        } else {
            Err(wrong_thread(self.owner))
        }
    }

    fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    fn subscribe_failures(&self) -> Receiver<TaskFailure> {
        self.failures.subscribe()
    }
}

/// Processor backed by a dedicated owner thread.
///
/// The owner runs a single consumer loop over the task channel. Dropping the
/// processor closes the channel, lets the loop finish queued work and joins
/// the thread.
pub struct ThreadProcessor {
    owner: ThreadId,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    failures: Arc<FailureSink>,
}

impl ThreadProcessor {
    /// Spawn the owner thread.
    pub fn spawn() -> Result<Self> {
        Self::spawn_named("topsoil-storage")
    }

    pub fn spawn_named(name: &str) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let failures = Arc::new(FailureSink::default());
        let sink = Arc::clone(&failures);
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                tracing::debug!("storage thread started");
                for job in receiver {
                    job.run(&sink);
                }
                tracing::debug!("storage thread stopped");
            })?;
        Ok(Self {
            owner: worker.thread().id(),
            sender: Some(sender),
            worker: Some(worker),
            failures,
        })
    }
}

impl Processor for ThreadProcessor {
    fn process(&self, task: Task) {
        if self.is_owner_thread() {
            if let Err(e) = run_guarded(task) {
                self.failures.report(&e);
            }
            return;
        }
        let sent = self
            .sender
            .as_ref()
            .is_some_and(|tx| tx.send(Job::Detached(task)).is_ok());
        if !sent {
            self.failures.report(&disconnected());
        }
    }

    fn process_now(&self, task: Task) -> Result<()> {
        if self.is_owner_thread() {
            return run_guarded(task);
        }
        match &self.sender {
            Some(sender) => send_and_wait(sender, task),
            None => Err(disconnected()),
        }
    }

    fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    fn subscribe_failures(&self) -> Receiver<TaskFailure> {
        self.failures.subscribe()
    }
}

impl Drop for ThreadProcessor {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            // The last handle may be released by a task running on the
            // owner thread itself; joining would wait on ourselves.
            if thread::current().id() != self.owner && worker.join().is_err() {
                tracing::warn!("storage thread panicked during shutdown");
            }
        }
    }
}

/// Processor owned by a host event loop.
///
/// Tasks from foreign threads queue up until the owner calls
/// [`run_pending`](Self::run_pending) or [`wait_and_run`](Self::wait_and_run).
/// A blocking submission waits for as long as the owner takes to pump the
/// queue.
pub struct EventLoopProcessor {
    owner: ThreadId,
    sender: Sender<Job>,
    receiver: Mutex<Receiver<Job>>,
    failures: FailureSink,
}

impl EventLoopProcessor {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            owner: thread::current().id(),
            sender,
            receiver: Mutex::new(receiver),
            failures: FailureSink::default(),
        }
    }

    /// Run every task queued so far. Returns how many ran.
    ///
    /// Does nothing when called off the owner thread.
    pub fn run_pending(&self) -> usize {
        if !self.is_owner_thread() {
            tracing::warn!("run_pending called off the owner thread");
            return 0;
        }
        let mut ran = 0;
        loop {
            let job = self
                .receiver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_recv();
            match job {
                Ok(job) => {
                    job.run(&self.failures);
                    ran += 1;
                }
                Err(_) => return ran,
            }
        }
    }

    /// Wait up to `timeout` for a task, then drain the queue.
    pub fn wait_and_run(&self, timeout: Duration) -> usize {
        if !self.is_owner_thread() {
            tracing::warn!("wait_and_run called off the owner thread");
            return 0;
        }
        let first = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv_timeout(timeout);
        match first {
            Ok(job) => {
                job.run(&self.failures);
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }
}

impl Default for EventLoopProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for EventLoopProcessor {
    fn process(&self, task: Task) {
        if self.is_owner_thread() {
            if let Err(e) = run_guarded(task) {
                self.failures.report(&e);
            }
        } else if self.sender.send(Job::Detached(task)).is_err() {
            self.failures.report(&disconnected());
        }
    }

    fn process_now(&self, task: Task) -> Result<()> {
        if self.is_owner_thread() {
            run_guarded(task)
        } else {
            send_and_wait(&self.sender, task)
        }
    }

    fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    fn subscribe_failures(&self) -> Receiver<TaskFailure> {
        self.failures.subscribe()
    }
}
