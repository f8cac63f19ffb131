//! The single-threaded event loop.
//!
//! A [`Reactor`] owns the poller, every socket and listener registered with
//! it, the timer queue and the receiving end of the cross-thread task queue.
//! One pass of the loop looks like this:
//!
//! ```text
//! run_once(timeout)
//!   1. wait for readiness, bounded by `timeout` and the earliest timer
//!   2. dispatch the snapshot of ready sockets and listeners
//!   3. run every timer due at the end of the wait
//!   4. run every task posted from other threads, in posting order
//! ```
//!
//! `Reactor` is a cheap `Rc` handle. It is neither `Send` nor `Sync`; other
//! threads talk to the loop through [`Remote`].

use std::{
    cell::{Cell, OnceCell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
    sync::Arc,
    time::{Duration, Instant},
};

use mio::Token;
use tracing::{debug, trace};

use crate::{
    config::ReactorConfig,
    error::Result,
    net::tcp::{ListenerBinding, PendingConnect, SocketBinding},
    poll::{PollHandle, WAKE_TOKEN},
    remote::{Remote, Shared},
    thread_pool::ThreadPool,
    timer::{TimerHandle, TimerQueue, TimerTask, Timers},
};

pub(crate) struct Inner {
    pub(crate) poll: RefCell<PollHandle>,
    pub(crate) sockets: RefCell<HashMap<Token, SocketBinding>>,
    pub(crate) listeners: RefCell<HashMap<Token, ListenerBinding>>,
    /// Connections waiting for their host name to resolve.
    pub(crate) resolving: RefCell<HashMap<Token, PendingConnect>>,
    pub(crate) timers: Timers,
    pub(crate) shared: Arc<Shared>,
    pub(crate) scratch: RefCell<Vec<u8>>,
    pub(crate) config: ReactorConfig,
    next_token: Cell<usize>,
    resolver: OnceCell<ThreadPool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Handle to an event loop. Clones share the same loop.
#[derive(Clone)]
pub struct Reactor {
    pub(crate) inner: Rc<Inner>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        Self::with_config(ReactorConfig::default())
    }

    pub fn with_config(config: ReactorConfig) -> Result<Self> {
        config.validate()?;
        let (poll, waker) = PollHandle::new(config.events_capacity)?;
        debug!(
            events_capacity = config.events_capacity,
            buffer_size = config.buffer_size,
            "reactor created"
        );

        Ok(Self {
            inner: Rc::new(Inner {
                poll: RefCell::new(poll),
                sockets: RefCell::new(HashMap::new()),
                listeners: RefCell::new(HashMap::new()),
                resolving: RefCell::new(HashMap::new()),
                timers: Rc::new(RefCell::new(TimerQueue::new())),
                shared: Arc::new(Shared::new(waker)),
                scratch: RefCell::new(vec![0; config.max_buffer_size]),
                next_token: Cell::new(WAKE_TOKEN.0 + 1),
                resolver: OnceCell::new(),
                config,
            }),
        })
    }

    pub(crate) fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.inner.config
    }

    /// Thread-safe handle for posting work onto this loop.
    pub fn remote(&self) -> Remote {
        Remote::new(self.inner.shared.clone())
    }

    /// Stops `run_forever` after the pass in progress.
    ///
    /// The request is remembered until a `run_forever` consumes it: issued
    /// while no loop is running, it makes the next `run_forever` return
    /// after a single pass. `run_once` leaves it untouched.
    pub fn interrupt(&self) -> Result<()> {
        self.inner.shared.interrupt()
    }

    /// Number of open sockets, connecting ones included.
    pub fn connection_count(&self) -> usize {
        self.inner.sockets.borrow().len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Tokens increase monotonically and are never handed out twice.
    pub(crate) fn next_token(&self) -> Token {
        let token = self.inner.next_token.get();
        self.inner.next_token.set(token + 1);
        Token(token)
    }

    pub(crate) fn resolver(&self) -> Result<&ThreadPool> {
        if let Some(pool) = self.inner.resolver.get() {
            return Ok(pool);
        }
        let pool = ThreadPool::new("mill-resolver", self.inner.config.resolver_threads)?;
        Ok(self.inner.resolver.get_or_init(|| pool))
    }

    /// Runs a single pass of the loop.
    ///
    /// `None` waits until a socket, a timer or another thread has something
    /// to do. Returns the number of socket and listener events dispatched.
    pub fn run_once(&self, timeout: Option<Duration>) -> Result<usize> {
        let wait = self.wait_bound(timeout);
        let events = self.inner.poll.borrow_mut().poll(wait)?;

        let mut dispatched = 0;
        for readiness in events {
            let token = readiness.token();
            if token == WAKE_TOKEN {
                continue;
            }
            if self.inner.listeners.borrow().contains_key(&token) {
                self.accept(token);
            } else {
                self.dispatch(readiness);
            }
            dispatched += 1;
        }

        self.run_timers();
        self.run_posted();
        Ok(dispatched)
    }

    /// Runs passes until [`Reactor::interrupt`] or [`Remote::interrupt`].
    pub fn run_forever(&self) -> Result<()> {
        debug!("event loop started");
        loop {
            self.run_once(None)?;
            if self.inner.shared.take_interrupt() {
                break;
            }
        }
        debug!("event loop stopped");
        Ok(())
    }

    fn wait_bound(&self, requested: Option<Duration>) -> Option<Duration> {
        let Some(deadline) = self.inner.timers.borrow().next_deadline() else {
            return requested;
        };
        let until = deadline.saturating_duration_since(Instant::now());
        Some(requested.map_or(until, |requested| requested.min(until)))
    }

    fn run_timers(&self) {
        if self.inner.timers.borrow().is_empty() {
            return;
        }
        let due = self.inner.timers.borrow().due(Instant::now());
        for key in due {
            let task = self.inner.timers.borrow_mut().remove(&key);
            match task {
                Some(TimerTask::Once { task, slot }) => {
                    slot.set(None);
                    task(self);
                }
                Some(TimerTask::Every { period, task, slot }) => {
                    let next = self.inner.timers.borrow_mut().insert(
                        key.deadline() + period,
                        TimerTask::Every {
                            period,
                            task: task.clone(),
                            slot: slot.clone(),
                        },
                    );
                    slot.set(Some(next));
                    task(self);
                }
                // cancelled by an earlier task of this pass
                None => {}
            }
        }
    }

    fn run_posted(&self) {
        let tasks = self.inner.shared.drain();
        if !tasks.is_empty() {
            trace!(count = tasks.len(), "running posted tasks");
        }
        for task in tasks {
            task(self);
        }
    }

    /// Runs `task` once, on the first pass that ends at or after `deadline`.
    ///
    /// Tasks with equal deadlines run in the order they were scheduled.
    pub fn post_at<F>(&self, deadline: Instant, task: F) -> TimerHandle
    where
        F: FnOnce(&Reactor) + 'static,
    {
        let slot = Rc::new(Cell::new(None));
        let key = self.inner.timers.borrow_mut().insert(
            deadline,
            TimerTask::Once {
                task: Box::new(task),
                slot: slot.clone(),
            },
        );
        slot.set(Some(key));
        TimerHandle::new(&self.inner.timers, slot)
    }

    pub fn post_after<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnOnce(&Reactor) + 'static,
    {
        self.post_at(Instant::now() + delay, task)
    }

    /// Runs `task` at `first` and then every `period` until cancelled.
    ///
    /// Each run is scheduled from the previous deadline, not from the time
    /// the task actually ran, so a slow pass does not shift later runs.
    pub fn schedule_every<F>(&self, first: Instant, period: Duration, task: F) -> TimerHandle
    where
        F: Fn(&Reactor) + 'static,
    {
        let slot = Rc::new(Cell::new(None));
        let key = self.inner.timers.borrow_mut().insert(
            first,
            TimerTask::Every {
                period,
                task: Rc::new(task),
                slot: slot.clone(),
            },
        );
        slot.set(Some(key));
        TimerHandle::new(&self.inner.timers, slot)
    }

    /// Number of pending timer tasks.
    pub fn timer_count(&self) -> usize {
        self.inner.timers.borrow().len()
    }
}
