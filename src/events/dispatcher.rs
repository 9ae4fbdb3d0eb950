//! # Event Dispatcher
//!
//! ## Architecture
//!
//! Fans every [`LifecycleEvent`] out to two listener shapes, coarse
//! ([`JobListener`]) then fine-grained ([`JobEventListener`]), in registration
//! order, synchronously on the publishing worker. Afterwards the event is
//! broadcast on a `tokio::sync::broadcast` channel for async observers.
//!
//! Listener lists are copy-on-write snapshots: a publish clones the current
//! `Arc<Vec<_>>` and iterates it without holding the lock, so listeners can be
//! added or removed while another worker is mid-dispatch.
//!
//! ## Key Features
//!
//! - **Failure isolation**: a panicking listener is logged and counted; the
//!   remaining listeners and the execution itself are unaffected
//! - **Job-owned registrations**: listeners a job contributes are tagged with the
//!   job name so unregistration removes exactly those

use crate::error::panic_message;
use crate::events::{JobEventListener, JobListener};
use crate::models::LifecycleEvent;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

struct Registration<L: ?Sized> {
    owner: Option<String>,
    listener: Arc<L>,
}

impl<L: ?Sized> Clone for Registration<L> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            listener: Arc::clone(&self.listener),
        }
    }
}

struct ListenerList<L: ?Sized> {
    entries: RwLock<Arc<Vec<Registration<L>>>>,
}

impl<L: ?Sized> ListenerList<L> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn snapshot(&self) -> Arc<Vec<Registration<L>>> {
        Arc::clone(&self.entries.read())
    }

    fn push(&self, owner: Option<String>, listener: Arc<L>) {
        let mut guard = self.entries.write();
        let mut next: Vec<Registration<L>> = guard.iter().cloned().collect();
        next.push(Registration { owner, listener });
        *guard = Arc::new(next);
    }

    /// Drop every registration owned by `owner`, then append `replacement`
    fn replace_owned(&self, owner: &str, replacement: Option<Arc<L>>) -> usize {
        let mut guard = self.entries.write();
        let mut next: Vec<Registration<L>> = guard
            .iter()
            .filter(|entry| entry.owner.as_deref() != Some(owner))
            .cloned()
            .collect();
        let removed = guard.len() - next.len();
        if let Some(listener) = replacement {
            next.push(Registration {
                owner: Some(owner.to_string()),
                listener,
            });
        }
        *guard = Arc::new(next);
        removed
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Dispatcher statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    pub job_listeners: usize,
    pub event_listeners: usize,
    pub events_published: u64,
    pub listener_failures: u64,
    pub subscribers: usize,
}

pub struct EventDispatcher {
    job_listeners: ListenerList<dyn JobListener>,
    event_listeners: ListenerList<dyn JobEventListener>,
    sender: broadcast::Sender<LifecycleEvent>,
    events_published: AtomicU64,
    listener_failures: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create a dispatcher whose broadcast feed buffers `capacity` events per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            job_listeners: ListenerList::new(),
            event_listeners: ListenerList::new(),
            sender,
            events_published: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
        }
    }

    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>) {
        self.job_listeners.push(None, listener);
        debug!(total = self.job_listeners.len(), "Registered job listener");
    }

    pub fn add_event_listener(&self, listener: Arc<dyn JobEventListener>) {
        self.event_listeners.push(None, listener);
        debug!(total = self.event_listeners.len(), "Registered job event listener");
    }

    /// Swap the listeners owned by a job in one step per listener shape
    pub(crate) fn replace_owned(
        &self,
        owner: &str,
        job_listener: Option<Arc<dyn JobListener>>,
        event_listener: Option<Arc<dyn JobEventListener>>,
    ) -> usize {
        self.job_listeners.replace_owned(owner, job_listener)
            + self.event_listeners.replace_owned(owner, event_listener)
    }

    /// Remove every listener registration owned by a job
    pub(crate) fn remove_owned(&self, owner: &str) -> usize {
        self.replace_owned(owner, None, None)
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: LifecycleEvent) {
        for registration in self.job_listeners.snapshot().iter() {
            self.guarded(&event, registration.owner.as_deref(), || {
                dispatch_coarse(registration.listener.as_ref(), &event)
            });
        }
        for registration in self.event_listeners.snapshot().iter() {
            self.guarded(&event, registration.owner.as_deref(), || {
                dispatch_fine(registration.listener.as_ref(), &event)
            });
        }

        self.events_published.fetch_add(1, Ordering::Relaxed);
        // No subscribers is the normal case
        let _ = self.sender.send(event);
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            job_listeners: self.job_listeners.len(),
            event_listeners: self.event_listeners.len(),
            events_published: self.events_published.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }

    fn guarded<F: FnOnce()>(&self, event: &LifecycleEvent, owner: Option<&str>, invoke: F) {
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(invoke)) {
            self.listener_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                event = %event.kind(),
                job_name = event.job_name(),
                execution_id = event.execution_id(),
                listener_owner = owner,
                error = %panic_message(payload.as_ref()),
                "Listener failed while handling event"
            );
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch_coarse(listener: &dyn JobListener, event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Pending { context } => listener.on_job_scheduled(context),
        LifecycleEvent::Started { context } => listener.on_job_start(context),
        LifecycleEvent::Ended { context, outcome } => listener.on_job_complete(context, outcome),
        LifecycleEvent::Failed { context, outcome } => listener.on_job_failure(context, outcome),
        LifecycleEvent::Retrying { context, attempt } => listener.on_job_retry(context, *attempt),
        LifecycleEvent::Cancelled { context, reason } => listener.on_job_cancelled(context, reason),
        LifecycleEvent::Queued { .. }
        | LifecycleEvent::Passed { .. }
        | LifecycleEvent::TimedOut { .. }
        | LifecycleEvent::Skipped { .. } => {}
    }
}

fn dispatch_fine(listener: &dyn JobEventListener, event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Pending { context } => listener.on_pending(context),
        LifecycleEvent::Queued { context } => listener.on_queued(context),
        LifecycleEvent::Started { context } => listener.on_start(context),
        LifecycleEvent::Ended { context, outcome } => listener.on_end(context, outcome),
        LifecycleEvent::Passed { context, outcome } => listener.on_pass(context, outcome),
        LifecycleEvent::Failed { context, outcome } => listener.on_failed(context, outcome),
        LifecycleEvent::Retrying { context, attempt } => listener.on_retry(context, *attempt),
        LifecycleEvent::TimedOut { context } => listener.on_timeout(context),
        LifecycleEvent::Cancelled { context, reason } => listener.on_cancelled(context, reason),
        LifecycleEvent::Skipped { context, reason } => listener.on_skipped(context, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TriggerType;
    use crate::models::{ExecutionContext, JobOutcome, Parameters};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl JobEventListener for Recorder {
        fn on_start(&self, context: &ExecutionContext) {
            self.seen.lock().push(format!("start:{}", context.job_name()));
        }

        fn on_pass(&self, context: &ExecutionContext, _outcome: &JobOutcome) {
            self.seen.lock().push(format!("pass:{}", context.job_name()));
        }
    }

    struct Exploding;

    impl JobEventListener for Exploding {
        fn on_start(&self, _context: &ExecutionContext) {
            panic!("listener bug");
        }
    }

    struct CoarseCounter {
        starts: Mutex<u32>,
    }

    impl JobListener for CoarseCounter {
        fn on_job_start(&self, _context: &ExecutionContext) {
            *self.starts.lock() += 1;
        }
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("report", Parameters::new(), "tester", TriggerType::Manual)
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let dispatcher = EventDispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.add_event_listener(Arc::new(Exploding));
        dispatcher.add_event_listener(recorder.clone());

        dispatcher.publish(LifecycleEvent::Started { context: context() });

        assert_eq!(*recorder.seen.lock(), vec!["start:report".to_string()]);
        assert_eq!(dispatcher.stats().listener_failures, 1);
        assert_eq!(dispatcher.stats().events_published, 1);
    }

    #[test]
    fn test_owned_listeners_are_replaced_and_removed() {
        let dispatcher = EventDispatcher::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        dispatcher.replace_owned("report", None, Some(first.clone()));
        dispatcher.add_event_listener(Arc::new(Recorder::default()));
        assert_eq!(dispatcher.stats().event_listeners, 2);

        let removed = dispatcher.replace_owned("report", None, Some(second.clone()));
        assert_eq!(removed, 1);
        dispatcher.publish(LifecycleEvent::Started { context: context() });
        assert!(first.seen.lock().is_empty());
        assert_eq!(second.seen.lock().len(), 1);

        assert_eq!(dispatcher.remove_owned("report"), 1);
        assert_eq!(dispatcher.stats().event_listeners, 1);
    }

    #[test]
    fn test_coarse_listener_receives_mapped_events() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(CoarseCounter {
            starts: Mutex::new(0),
        });
        dispatcher.add_job_listener(counter.clone());

        dispatcher.publish(LifecycleEvent::Queued { context: context() });
        dispatcher.publish(LifecycleEvent::Started { context: context() });

        assert_eq!(*counter.starts.lock(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_feed_receives_events() {
        let dispatcher = EventDispatcher::new();
        let mut receiver = dispatcher.subscribe();
        dispatcher.publish(LifecycleEvent::Passed {
            context: context(),
            outcome: JobOutcome::success("ok"),
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind(), crate::models::EventKind::Passed);
        assert_eq!(event.outcome().map(JobOutcome::message), Some("ok"));
    }
}
