//! Coalescing notifications from pipeline elements
//!
//! Elements report "something changed" from the audio thread by calling
//! [`ElementObserver::schedule`]. The observer runs the registered callback
//! later, on its own thread. Repeated schedules before the callback runs
//! collapse into one invocation, and a callback never runs concurrently with
//! itself.

use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Handle returned by [`ElementObserver::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u32);

/// Callback run when its id is scheduled
pub type ObserverCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Deferred, coalescing notification scheduler
pub trait ElementObserver: Send + Sync {
    /// Register a callback; only valid before the observer starts
    fn register(&self, callback: ObserverCallback) -> ObserverId;

    /// Mark `id` pending and wake the observer
    fn schedule(&self, id: ObserverId);
}

/// An observer plus the id an element should schedule
#[derive(Clone)]
pub struct ObserverHook {
    observer: Arc<dyn ElementObserver>,
    id: ObserverId,
}

impl ObserverHook {
    pub fn new(observer: Arc<dyn ElementObserver>, id: ObserverId) -> Self {
        Self { observer, id }
    }

    /// Register `callback` with `observer` and wrap the resulting id
    pub fn register(observer: Arc<dyn ElementObserver>, callback: ObserverCallback) -> Self {
        let id = observer.register(callback);
        Self::new(observer, id)
    }

    pub fn fire(&self) {
        self.observer.schedule(self.id);
    }
}

struct PendingCallback {
    id: ObserverId,
    pending: AtomicBool,
    callback: ObserverCallback,
}

impl PendingCallback {
    fn run_if_pending(&self) {
        if self.pending.swap(false, Ordering::AcqRel) {
            (self.callback)();
        }
    }
}

/// Shared state between the scheduling threads and the worker
struct ObserverShared {
    callbacks: Mutex<Vec<Arc<PendingCallback>>>,
    wake: Mutex<bool>,
    condvar: Condvar,
    started: AtomicBool,
    stop_flag: AtomicBool,
}

/// Observer running callbacks on a dedicated thread
pub struct ElementObserverThread {
    shared: Arc<ObserverShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ElementObserverThread {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ObserverShared {
                callbacks: Mutex::new(Vec::new()),
                wake: Mutex::new(false),
                condvar: Condvar::new(),
                started: AtomicBool::new(false),
                stop_flag: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Start the worker; registration is closed from here on
    ///
    /// # Panics
    ///
    /// Panics if already started.
    pub fn start(&self) -> Result<()> {
        assert!(
            !self.shared.started.swap(true, Ordering::AcqRel),
            "ElementObserverThread started twice"
        );
        let callbacks: Vec<Arc<PendingCallback>> = self.shared.callbacks.lock().unwrap().clone();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("PipelineEvents".to_string())
            .spawn(move || Self::worker_loop(shared, callbacks))?;
        *self.thread.lock().unwrap() = Some(handle);
        debug!("Element observer thread started");
        Ok(())
    }

    /// Stop the worker and wait for it to exit
    pub fn stop(&self) {
        self.shared.stop_flag.store(true, Ordering::Release);
        {
            let mut wake = self.shared.wake.lock().unwrap();
            *wake = true;
        }
        self.shared.condvar.notify_one();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                error!("Element observer thread panicked");
            }
        }
    }

    fn worker_loop(shared: Arc<ObserverShared>, callbacks: Vec<Arc<PendingCallback>>) {
        loop {
            {
                let mut wake = shared.wake.lock().unwrap();
                while !*wake {
                    wake = shared.condvar.wait(wake).unwrap();
                }
                *wake = false;
            }
            if shared.stop_flag.load(Ordering::Acquire) {
                break;
            }
            for callback in &callbacks {
                callback.run_if_pending();
            }
        }
        debug!("Element observer thread exiting");
    }
}

impl Default for ElementObserverThread {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementObserver for ElementObserverThread {
    fn register(&self, callback: ObserverCallback) -> ObserverId {
        assert!(
            !self.shared.started.load(Ordering::Acquire),
            "observer registration after start"
        );
        let mut callbacks = self.shared.callbacks.lock().unwrap();
        let id = ObserverId(callbacks.len() as u32);
        callbacks.push(Arc::new(PendingCallback {
            id,
            pending: AtomicBool::new(false),
            callback,
        }));
        id
    }

    fn schedule(&self, id: ObserverId) {
        {
            let callbacks = self.shared.callbacks.lock().unwrap();
            let Some(callback) = callbacks.iter().find(|cb| cb.id == id) else {
                error!("Schedule for unregistered observer id {:?}", id);
                panic!("unregistered observer id {:?}", id);
            };
            callback.pending.store(true, Ordering::Release);
        }
        let mut wake = self.shared.wake.lock().unwrap();
        *wake = true;
        self.shared.condvar.notify_one();
    }
}

impl Drop for ElementObserverThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Observer running callbacks inline on the scheduling thread
#[derive(Default)]
pub struct ElementObserverSync {
    callbacks: Mutex<Vec<Arc<ObserverCallback>>>,
}

impl ElementObserverSync {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ElementObserver for ElementObserverSync {
    fn register(&self, callback: ObserverCallback) -> ObserverId {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.push(Arc::new(callback));
        ObserverId(callbacks.len() as u32 - 1)
    }

    fn schedule(&self, id: ObserverId) {
        let callback = self
            .callbacks
            .lock()
            .unwrap()
            .get(id.0 as usize)
            .cloned()
            .unwrap_or_else(|| panic!("unregistered observer id {:?}", id));
        callback();
    }
}
