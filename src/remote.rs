//! Cross-thread entry into the event loop.
//!
//! Everything the loop owns stays on the loop thread. Other threads reach it
//! only by posting tasks into a lock-free FIFO and waking the blocked poll.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};

use lock_freedom::queue::Queue;
use mio::Waker;
use tracing::trace;

use crate::{
    error::{NetworkError, Result},
    reactor::Reactor,
};

/// A task posted to the loop from any thread.
pub type LoopTask = Box<dyn FnOnce(&Reactor) + Send + 'static>;

pub(crate) struct Shared {
    queue: Queue<LoopTask>,
    waker: Waker,
    interrupted: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    pub fn new(waker: Waker) -> Self {
        Self {
            queue: Queue::new(),
            waker,
            interrupted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, task: LoopTask) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::EventLoopGone);
        }
        self.queue.push(task);
        if self.closed.load(Ordering::Acquire) {
            // lost the race against the loop shutting down
            self.discard();
            return Err(NetworkError::EventLoopGone);
        }
        self.waker.wake()?;
        Ok(())
    }

    /// Pops everything queued right now, in posting order.
    pub fn drain(&self) -> Vec<LoopTask> {
        let mut tasks = Vec::new();
        while let Some(task) = self.queue.pop() {
            tasks.push(task);
        }
        tasks
    }

    pub fn interrupt(&self) -> Result<()> {
        self.interrupted.store(true, Ordering::SeqCst);
        self.waker.wake()?;
        Ok(())
    }

    pub fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Marks the loop gone and drops every pending task.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.discard();
    }

    fn discard(&self) {
        let dropped = self.drain().len();
        if dropped > 0 {
            trace!(dropped, "discarded tasks posted to a closed loop");
        }
    }
}

/// Thread-safe handle to a [`Reactor`].
///
/// `Remote` is the only part of the reactor that may cross threads. It can
/// post work onto the loop thread and ask the loop to stop.
#[derive(Clone)]
pub struct Remote {
    shared: Arc<Shared>,
}

impl Remote {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Appends `task` to the loop's queue and wakes the loop.
    ///
    /// Tasks run on the loop thread in posting order, after the timers of
    /// the pass that picks them up.
    pub fn post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&Reactor) + Send + 'static,
    {
        self.shared.push(Box::new(task))
    }

    /// Posts `task` and blocks until it ran, returning its result.
    ///
    /// Must not be called from the loop thread: the loop would wait on
    /// itself forever.
    pub fn post_and_wait<F, R>(&self, task: F) -> Result<R>
    where
        F: FnOnce(&Reactor) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.post(move |reactor| {
            let _ = tx.send(task(reactor));
        })?;
        rx.recv().map_err(|_| NetworkError::EventLoopGone)
    }

    /// Stops `run_forever` after the pass in progress. Like
    /// [`Reactor::interrupt`], an interrupt sent while the loop is not
    /// running is kept for the next `run_forever`.
    ///
    /// [`Reactor::interrupt`]: crate::Reactor::interrupt
    pub fn interrupt(&self) -> Result<()> {
        self.shared.interrupt()
    }
}
