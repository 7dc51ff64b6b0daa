// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bounded queue of store writes drained by a background flusher.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use anyspawn::Spawner;
use layered::{DynamicService, DynamicServiceExt, Execute, Layer, Service};
use seatbelt::{RecoveryInfo, ResilienceContext, retry::{Backoff, Retry}};
use tokio::sync::{mpsc, mpsc::error::TrySendError, oneshot};

use crate::{
    BackoffOptions, Error, Result, Store,
    coordinator::Shared,
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry},
};

#[derive(Debug)]
enum Job<V> {
    Write { key: String, value: V },
    Flush(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// Why a write could not be queued.
enum Backpressure {
    Full(String),
    Closed,
}

/// One queued write on its way to the store.
#[derive(Clone)]
struct Flush<V> {
    key: String,
    value: V,
    attempts: Arc<AtomicU32>,
}

pub(crate) struct WriteBehind<V> {
    jobs: mpsc::Sender<Job<V>>,
    enqueue: DynamicService<(String, V), std::result::Result<(), Backpressure>>,
    running: Arc<AtomicBool>,
    telemetry: CacheTelemetry,
}

impl<V> std::fmt::Debug for WriteBehind<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBehind")
            .field("running", &self.running.load(Ordering::Acquire))
            .field("queued", &(self.jobs.max_capacity() - self.jobs.capacity()))
            .finish_non_exhaustive()
    }
}

impl<V> WriteBehind<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn spawn<S>(shared: Arc<Shared<V, S>>, spawner: &Spawner) -> Self
    where
        S: Store<V> + 'static,
    {
        let options = &shared.options.write_behind;
        let telemetry = shared.telemetry.clone();
        let (jobs, queue) = mpsc::channel(options.queue_capacity.max(1));
        let enqueue = enqueue_pipeline(&shared, jobs.clone());
        let flush = flush_pipeline(&shared);
        let running = Arc::new(AtomicBool::new(true));

        let _detached = spawner.spawn(drain(shared, queue, flush, Arc::clone(&running)));

        Self {
            jobs,
            enqueue,
            running,
            telemetry,
        }
    }

    /// Queues a store write, backing off while the queue is full.
    pub async fn enqueue(&self, key: &str, value: V) -> Result<()> {
        match self.enqueue.execute((key.to_owned(), value)).await {
            Ok(()) => Ok(()),
            Err(Backpressure::Closed) => Err(Error::Closed),
            Err(Backpressure::Full(key)) => {
                tracing::warn!(cache.name = self.telemetry.name(), cache.key = key, "cache.write_behind.queue_full");
                self.telemetry.record_key(CacheOperation::Write, CacheActivity::Rejected, &key);
                Err(Error::QueueFull { key })
            }
        }
    }

    /// Waits until every write queued before this call has been attempted.
    pub async fn flush(&self) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.jobs.send(Job::Flush(done)).await.map_err(|_closed| Error::Closed)?;
        finished.await.map_err(|_closed| Error::Closed)
    }

    /// Drains the queue and stops the flusher. Later writes fail with [`Error::Closed`].
    pub async fn shutdown(&self) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.jobs.send(Job::Stop(done)).await.map_err(|_closed| Error::Closed)?;
        finished.await.map_err(|_closed| Error::Closed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

fn retry_context<V, S, In, Out>(shared: &Shared<V, S>) -> ResilienceContext<In, Out> {
    ResilienceContext::new(&shared.clock).name(shared.telemetry.name().to_owned())
}

fn with_backoff<In, Out, A, B>(layer: seatbelt::retry::RetryLayer<In, Out, A, B>, options: BackoffOptions) -> seatbelt::retry::RetryLayer<In, Out, A, B> {
    layer
        .backoff(Backoff::Exponential)
        .base_delay(options.base_delay)
        .max_delay(options.max_delay)
        .use_jitter(false)
}

/// Tries `try_send` until the queue has room, the attempts run out or the queue closes.
fn enqueue_pipeline<V, S>(shared: &Shared<V, S>, jobs: mpsc::Sender<Job<V>>) -> DynamicService<(String, V), std::result::Result<(), Backpressure>>
where
    V: Clone + Send + Sync + 'static,
{
    let options = &shared.options.write_behind;
    let telemetry = shared.telemetry.clone();
    let context: ResilienceContext<(String, V), std::result::Result<(), Backpressure>> = retry_context(shared);

    let retry = with_backoff(
        Retry::layer("write_behind_enqueue", &context)
            .clone_input()
            .recovery_with(|outcome: &std::result::Result<(), Backpressure>, _args| match outcome {
                Err(Backpressure::Full(_)) => RecoveryInfo::retry(),
                Ok(()) | Err(Backpressure::Closed) => RecoveryInfo::never(),
            })
            .max_retry_attempts(options.enqueue_attempts.max(1) - 1)
            .on_retry(move |outcome, _args| {
                if let Err(Backpressure::Full(key)) = outcome {
                    telemetry.record_key(CacheOperation::Write, CacheActivity::Retried, key);
                }
            }),
        options.backoff,
    );

    let send = Execute::new(move |(key, value): (String, V)| {
        let result = match jobs.try_send(Job::Write { key, value }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(Job::Write { key, .. })) => Err(Backpressure::Full(key)),
            Err(TrySendError::Full(_) | TrySendError::Closed(_)) => Err(Backpressure::Closed),
        };
        async move { result }
    });

    retry.layer(send).into_dynamic()
}

/// Writes one entry to the store, retrying failures with backoff.
fn flush_pipeline<V, S>(shared: &Arc<Shared<V, S>>) -> DynamicService<Flush<V>, Result<()>>
where
    V: Clone + Send + Sync + 'static,
    S: Store<V> + 'static,
{
    let options = &shared.options.write_behind;
    let telemetry = shared.telemetry.clone();
    let context: ResilienceContext<Flush<V>, Result<()>> = retry_context(shared);

    let retry = with_backoff(
        Retry::layer("write_behind_flush", &context)
            .clone_input()
            .recovery_with(|outcome: &Result<()>, _args| match outcome {
                Ok(()) => RecoveryInfo::never(),
                Err(_) => RecoveryInfo::retry(),
            })
            .max_retry_attempts(options.flush_attempts.max(1) - 1)
            .on_retry(move |_outcome, _args| telemetry.record(CacheOperation::Flush, CacheActivity::Retried)),
        options.backoff,
    );

    let shared = Arc::clone(shared);
    let write = Execute::new(move |flush: Flush<V>| {
        let shared = Arc::clone(&shared);
        async move {
            flush.attempts.fetch_add(1, Ordering::Relaxed);
            shared.guard.write(&shared.store, &flush.key, &flush.value).await
        }
    });

    retry.layer(write).into_dynamic()
}

async fn drain<V, S>(
    shared: Arc<Shared<V, S>>,
    mut queue: mpsc::Receiver<Job<V>>,
    flush: DynamicService<Flush<V>, Result<()>>,
    running: Arc<AtomicBool>,
) where
    V: Clone + Send + Sync + 'static,
    S: Store<V> + 'static,
{
    let mut stopped = Vec::new();

    while let Some(job) = queue.recv().await {
        match job {
            Job::Write { key, value } => flush_one(&shared, &flush, key, value).await,
            Job::Flush(done) => {
                let _ = done.send(());
            }
            // Closing keeps what is already buffered; the loop ends once it is flushed.
            Job::Stop(done) => {
                queue.close();
                stopped.push(done);
            }
        }
    }

    running.store(false, Ordering::Release);
    for done in stopped {
        let _ = done.send(());
    }
}

async fn flush_one<V, S>(shared: &Shared<V, S>, flush: &DynamicService<Flush<V>, Result<()>>, key: String, value: V)
where
    V: Clone + Send + Sync + 'static,
    S: Store<V> + 'static,
{
    let attempts = Arc::new(AtomicU32::new(0));
    let job = Flush {
        key,
        value,
        attempts: Arc::clone(&attempts),
    };
    let key = job.key.clone();

    match flush.execute(job).await {
        Ok(()) => shared.telemetry.record_key(CacheOperation::Flush, CacheActivity::Ok, &key),
        Err(error) => {
            shared.telemetry.record_key(CacheOperation::Flush, CacheActivity::Error, &key);
            let error = Error::WriteBehindFlush {
                attempts: attempts.load(Ordering::Relaxed),
                key,
                source: Box::new(error),
            };
            tracing::error!(cache.name = shared.telemetry.name(), error = %error, "cache.write_behind.failed");
            if let Some(on_error) = &shared.on_flush_error {
                on_error(&error);
            }
        }
    }
}
