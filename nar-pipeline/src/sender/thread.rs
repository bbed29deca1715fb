//! Dedicated thread feeding a slow downstream element

use super::queue::SenderMsgQueue;
use crate::error::Result;
use crate::msg::{Msg, MsgFactory, PipelineElementDownstream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

struct SenderShared {
    queue: Mutex<SenderMsgQueue>,
    condvar: Condvar,
    stop_flag: AtomicBool,
}

/// Push element that hands messages to `downstream` on its own thread
///
/// `push` never blocks on the downstream element. The worker exits after
/// forwarding a `Quit`, or when the sender is dropped.
pub struct SenderThread {
    id: String,
    shared: Arc<SenderShared>,
    thread: Option<JoinHandle<()>>,
}

impl SenderThread {
    /// # Arguments
    /// * `downstream` - Element the worker pushes to
    /// * `id` - Thread name, also used in logs
    /// * `max_backlog` - Queue capacity; exceeding it after pruning panics
    pub fn new(
        downstream: Box<dyn PipelineElementDownstream>,
        id: &str,
        factory: Arc<MsgFactory>,
        max_backlog: usize,
    ) -> Result<Self> {
        let shared = Arc::new(SenderShared {
            queue: Mutex::new(SenderMsgQueue::new(factory, max_backlog)),
            condvar: Condvar::new(),
            stop_flag: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let name = id.to_string();
        let thread = thread::Builder::new()
            .name(id.to_string())
            .spawn(move || Self::worker_loop(&name, worker_shared, downstream))?;
        debug!("SenderThread {} started (backlog {})", id, max_backlog);
        Ok(Self {
            id: id.to_string(),
            shared,
            thread: Some(thread),
        })
    }

    /// Messages waiting for the worker
    pub fn backlog(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    fn worker_loop(
        id: &str,
        shared: Arc<SenderShared>,
        mut downstream: Box<dyn PipelineElementDownstream>,
    ) {
        loop {
            let msg = {
                let mut queue = shared.queue.lock().unwrap();
                loop {
                    if let Some(msg) = queue.dequeue() {
                        break Some(msg);
                    }
                    if shared.stop_flag.load(Ordering::Acquire) {
                        break None;
                    }
                    queue = shared.condvar.wait(queue).unwrap();
                }
            };
            let Some(msg) = msg else {
                break;
            };
            let quit = matches!(msg, Msg::Quit(_));
            trace!("SenderThread {}: sending {:?}", id, msg);
            downstream.push(msg);
            if quit {
                break;
            }
        }
        debug!("SenderThread {} exiting", id);
    }
}

impl PipelineElementDownstream for SenderThread {
    fn push(&mut self, msg: Msg) {
        self.shared.queue.lock().unwrap().enqueue(msg);
        self.shared.condvar.notify_one();
    }
}

impl Drop for SenderThread {
    fn drop(&mut self) {
        self.shared.stop_flag.store(true, Ordering::Release);
        {
            // Taking the lock orders the flag against the worker's wait
            let _queue = self.shared.queue.lock().unwrap();
        }
        self.shared.condvar.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("SenderThread {} panicked", self.id);
            }
        }
    }
}
