//! Bounded, supervised click accounting.
//!
//! Redirects hand a [`ClickJob`] to the [`ClickRecorder`] and return at once.
//! A fixed pool of workers drains a bounded queue; when the queue is full the
//! caller waits up to the enqueue timeout and then drops the click.

use async_trait::async_trait;
use parking_lot::Mutex;
use snip_core::{ClickEvent, UrlEntity};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One redirect waiting to be accounted for.
#[derive(Debug, Clone)]
pub struct ClickJob {
    /// The entity as resolved for the redirect.
    pub entity: UrlEntity,
    pub event: ClickEvent,
}

/// Work done for every click, off the request path.
#[async_trait]
pub trait ClickHandler: Send + Sync + 'static {
    async fn handle(&self, job: ClickJob);
}

#[derive(Debug, Clone, Copy)]
pub struct ClickRecorderSettings {
    pub workers: usize,
    pub capacity: usize,
    pub enqueue_timeout: Duration,
    pub job_timeout: Duration,
}

/// A fixed-size worker pool over a bounded queue.
pub struct ClickRecorder {
    sender: Mutex<Option<mpsc::Sender<ClickJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    enqueue_timeout: Duration,
    dropped: AtomicU64,
}

impl ClickRecorder {
    /// Spawns the workers. Must be called from within a Tokio runtime.
    pub fn start(handler: Arc<dyn ClickHandler>, settings: ClickRecorderSettings) -> Self {
        let (sender, receiver) = mpsc::channel::<ClickJob>(settings.capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..settings.workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };
                        let code = job.event.short_code.clone();
                        if tokio::time::timeout(settings.job_timeout, handler.handle(job))
                            .await
                            .is_err()
                        {
                            warn!(worker, code = %code, "Click accounting timed out");
                        }
                    }
                    debug!(worker, "Click worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            enqueue_timeout: settings.enqueue_timeout,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queues a click. Returns `false` if it was dropped.
    pub async fn record(&self, job: ClickJob) -> bool {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(code = %job.event.short_code, "Click recorder is shut down, dropping click");
            return false;
        };

        match sender.send_timeout(job, self.enqueue_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(code = %job.event.short_code, "Click queue is full, dropping click");
                false
            }
            Err(SendTimeoutError::Closed(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(code = %job.event.short_code, "Click queue is closed, dropping click");
                false
            }
        }
    }

    /// Clicks dropped so far because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting clicks and lets the workers drain the queue.
    ///
    /// Workers still running after `grace` are aborted together with whatever
    /// they had left. Returns the number of aborted workers.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        drop(self.sender.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        let deadline = tokio::time::Instant::now() + grace;

        let mut aborted = 0;
        for mut worker in workers {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                worker.abort();
                aborted += 1;
            }
        }

        info!(aborted, dropped = self.dropped(), "Click recorder shut down");
        aborted
    }
}
