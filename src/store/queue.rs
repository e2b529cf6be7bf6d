//! Keyed Write Queue
//!
//! Serializes writes per key while letting writes for different keys run
//! concurrently. Each key gets a lane: a channel drained by its own task, so
//! jobs for one key complete in submission order. A shared semaphore bounds
//! how many lanes touch the store at once, and a capacity semaphore bounds
//! how many jobs may be queued before submitters wait.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify, OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Boxed store operation queued for a key
type WriteOp = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Lanes idle for this long are retired
const LANE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Job sent to a lane task
struct WriteJob {
    op: WriteOp,
    response: oneshot::Sender<Result<()>>,
    _capacity: OwnedSemaphorePermit,
}

struct QueueInner {
    /// Queue name, for logs
    name: String,
    /// Active lanes by key
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<WriteJob>>>,
    /// Bounds concurrent store operations
    concurrency: Arc<Semaphore>,
    /// Bounds queued jobs
    capacity: Arc<Semaphore>,
    /// Jobs submitted but not yet acknowledged
    in_flight: AtomicUsize,
    /// Signalled whenever `in_flight` drops to zero
    drained: Notify,
    /// Rejects new submissions once set
    closed: AtomicBool,
}

/// Cloneable handle to a keyed write queue
#[derive(Clone)]
pub struct KeyedWriteQueue {
    inner: Arc<QueueInner>,
}

/// Acknowledgement handle for one submitted write
pub struct WriteTicket {
    key: String,
    rx: oneshot::Receiver<Result<()>>,
}

impl WriteTicket {
    /// Key the write was submitted for
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the write to be applied
    pub async fn wait(self) -> Result<()> {
        self.rx
            .await
            .map_err(|_| Error::Internal(format!("write for {} was dropped", self.key)))?
    }
}

impl KeyedWriteQueue {
    /// Create a queue allowing `max_concurrent` store operations and
    /// `capacity` queued jobs
    pub fn new(name: impl Into<String>, max_concurrent: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                lanes: Mutex::new(HashMap::new()),
                concurrency: Arc::new(Semaphore::new(max_concurrent.max(1))),
                capacity: Arc::new(Semaphore::new(capacity.max(1))),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Queue a write for `key`. Returns once the job is queued; the ticket
    /// resolves when it has been applied.
    pub async fn submit<F>(&self, key: &str, op: F) -> Result<WriteTicket>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let permit = Arc::clone(&self.inner.capacity)
            .acquire_owned()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        let (tx, rx) = oneshot::channel();
        let job = WriteJob {
            op: Box::pin(op),
            response: tx,
            _capacity: permit,
        };

        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        self.enqueue(key, job);

        Ok(WriteTicket {
            key: key.to_string(),
            rx,
        })
    }

    /// Queue a write and wait for it to be applied
    pub async fn submit_and_wait<F>(&self, key: &str, op: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.submit(key, op).await?.wait().await
    }

    fn enqueue(&self, key: &str, job: WriteJob) {
        let mut lanes = self
            .inner
            .lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let job = match lanes.get(key) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                // Lane task is gone; start a fresh one below
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // A fresh channel with a live receiver cannot reject the job
        let _ = sender.send(job);
        lanes.insert(key.to_string(), sender);
        tokio::spawn(run_lane(Arc::clone(&self.inner), key.to_string(), receiver));
    }

    /// Number of writes queued or executing
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every submitted write has been applied
    pub async fn wait_for_writes_completed(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.drained.notified();
            if self.in_flight() == 0 {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(
                    "Timed out waiting for {} writes in queue {}",
                    self.in_flight(),
                    self.inner.name
                );
                return Err(Error::Timeout(timeout.as_millis() as u64));
            }
        }
    }

    /// Reject further submissions; queued writes still complete
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Accept submissions again after `close`
    pub fn reopen(&self) {
        self.inner.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl QueueInner {
    async fn execute(&self, job: WriteJob) {
        let result = match Arc::clone(&self.concurrency).acquire_owned().await {
            Ok(_slot) => job.op.await,
            Err(_) => Err(Error::ShuttingDown),
        };
        let _ = job.response.send(result);
        drop(job._capacity);

        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Lane task: applies jobs for one key strictly in order
async fn run_lane(
    inner: Arc<QueueInner>,
    key: String,
    mut receiver: mpsc::UnboundedReceiver<WriteJob>,
) {
    loop {
        match tokio::time::timeout(LANE_IDLE_TIMEOUT, receiver.recv()).await {
            Ok(Some(job)) => inner.execute(job).await,
            Ok(None) => return,
            Err(_) => {
                // Retire under the lanes lock so no submitter can race the removal,
                // then apply anything that was sent before we got the lock
                {
                    let mut lanes = inner
                        .lanes
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    lanes.remove(&key);
                    receiver.close();
                }
                while let Ok(job) = receiver.try_recv() {
                    inner.execute(job).await;
                }
                tracing::trace!("Retired idle write lane {} in {}", key, inner.name);
                return;
            }
        }
    }
}
