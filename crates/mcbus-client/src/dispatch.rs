//! Handler execution policies.
//!
//! A [`Handler`] pairs a callback with where it runs. Inline handlers run on the
//! receive-loop thread and block it for their duration; pooled handlers are queued
//! onto a bounded [`WorkerPool`] so slow handlers never stall the loop.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::client::Client;

/// One delivered request or publication, as seen by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub sender_id: String,
    /// The request signal, or the publication topic.
    pub subject: String,
    pub correlation_id: String,
    pub body: String,
}

/// Where a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// On the receive-loop thread.
    Inline,
    /// On the client's worker pool.
    Pooled,
}

type BodyFn = dyn Fn(&str) -> Option<String> + Send + Sync;
type DetailedFn = dyn Fn(&Delivery) -> Option<String> + Send + Sync;
type SessionFn = dyn Fn(&Client, &Delivery) -> Option<String> + Send + Sync;

/// The argument shape a handler accepts.
///
/// A returned non-empty string is a reply body (see [`Handler`]).
#[derive(Clone)]
pub enum Callback {
    Body(Arc<BodyFn>),
    Detailed(Arc<DetailedFn>),
    Session(Arc<SessionFn>),
}

/// A callback plus its execution policy.
///
/// An inline handler's non-empty return value is sent back to the sender on
/// `rep/<sender>/<subject>` with the delivery's correlation id, for publications
/// as well as requests. Pooled handlers' return values are discarded; they can
/// reply through the [`Client`] passed to [`Handler::threaded_detailed`] callbacks.
#[derive(Clone)]
pub struct Handler {
    execution: Execution,
    callback: Callback,
}

impl Handler {
    pub fn new(execution: Execution, callback: Callback) -> Self {
        Self {
            execution,
            callback,
        }
    }

    /// Inline, body only.
    pub fn simple<F>(f: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self::new(Execution::Inline, Callback::Body(Arc::new(f)))
    }

    /// Inline, with sender, subject and correlation id.
    pub fn detailed<F>(f: F) -> Self
    where
        F: Fn(&Delivery) -> Option<String> + Send + Sync + 'static,
    {
        Self::new(Execution::Inline, Callback::Detailed(Arc::new(f)))
    }

    /// Pooled, body only.
    pub fn threaded_simple<F>(f: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self::new(Execution::Pooled, Callback::Body(Arc::new(f)))
    }

    /// Pooled, with the session and full delivery.
    pub fn threaded_detailed<F>(f: F) -> Self
    where
        F: Fn(&Client, &Delivery) -> Option<String> + Send + Sync + 'static,
    {
        Self::new(Execution::Pooled, Callback::Session(Arc::new(f)))
    }

    pub fn execution(&self) -> Execution {
        self.execution
    }

    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    /// Invoke the callback on the current thread.
    pub fn call(&self, client: &Client, delivery: &Delivery) -> Option<String> {
        match &self.callback {
            Callback::Body(f) => f(&delivery.body),
            Callback::Detailed(f) => f(delivery),
            Callback::Session(f) => f(client, delivery),
        }
    }

    /// Invoke the callback, catching a panic. `Err` carries the panic message.
    pub(crate) fn call_guarded(
        &self,
        client: &Client,
        delivery: &Delivery,
    ) -> std::result::Result<Option<String>, String> {
        panic::catch_unwind(AssertUnwindSafe(|| self.call(client, delivery)))
            .map_err(|payload| panic_message(payload.as_ref()))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.callback {
            Callback::Body(_) => "body",
            Callback::Detailed(_) => "detailed",
            Callback::Session(_) => "session",
        };
        f.debug_struct("Handler")
            .field("execution", &self.execution)
            .field("callback", &shape)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of worker threads fed by a bounded queue.
///
/// [`submit`](Self::submit) never blocks: when the queue is full the job is
/// dropped. Jobs that panic are logged and the worker keeps running.
pub struct WorkerPool {
    tx: Mutex<Option<Sender<Job>>>,
    workers: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Spawn `workers` threads (at least one) sharing a queue of `capacity` jobs.
    pub fn new(name: &str, workers: usize, capacity: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let (tx, rx) = channel::bounded::<Job>(capacity);

        for n in 0..workers {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("{name}-worker-{n}"))
                .spawn(move || {
                    for job in rx.iter() {
                        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                            error!(
                                panic = %panic_message(payload.as_ref()),
                                "pooled handler panicked"
                            );
                        }
                    }
                })?;
        }

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            workers,
            capacity,
        })
    }

    /// Queue a job. Returns false if it was dropped.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            debug!("worker pool shut down; dropping job");
            return false;
        };
        match tx.try_send(Box::new(job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(capacity = self.capacity, "worker queue full; dropping job");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("worker pool has no workers; dropping job");
                false
            }
        }
    }

    /// Stop accepting jobs. Queued jobs still run; workers exit once the queue drains.
    pub fn shutdown(&self) {
        self.tx.lock().take();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("capacity", &self.capacity)
            .field("open", &self.tx.lock().is_some())
            .finish()
    }
}
