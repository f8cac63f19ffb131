use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    rc::{Rc, Weak},
    time::{Duration, Instant},
};

use crate::reactor::Reactor;

/// Sort key of a timer entry.
///
/// Entries order by deadline first; the sequence number keeps insertion
/// order for equal deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    deadline: Instant,
    sequence: u64,
}

impl TimerKey {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Ordered collection of deferred tasks keyed by (deadline, sequence).
pub(crate) struct TimerQueue<T> {
    entries: BTreeMap<TimerKey, T>,
    next_sequence: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    pub fn insert(&mut self, deadline: Instant, task: T) -> TimerKey {
        let key = TimerKey {
            deadline,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.entries.insert(key, task);
        key
    }

    pub fn remove(&mut self, key: &TimerKey) -> Option<T> {
        self.entries.remove(key)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(TimerKey::deadline)
    }

    /// Keys of every entry due at `now`, in firing order.
    ///
    /// This is a snapshot: entries inserted after the call are not part of it.
    pub fn due(&self, now: Instant) -> Vec<TimerKey> {
        self.entries
            .keys()
            .take_while(|key| key.deadline <= now)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) type Timers = Rc<RefCell<TimerQueue<TimerTask>>>;

pub(crate) enum TimerTask {
    Once {
        task: Box<dyn FnOnce(&Reactor)>,
        slot: Rc<Cell<Option<TimerKey>>>,
    },
    Every {
        period: Duration,
        task: Rc<dyn Fn(&Reactor)>,
        slot: Rc<Cell<Option<TimerKey>>>,
    },
}

/// Cancels a scheduled task.
///
/// For periodic tasks the handle always targets the registration that is
/// currently pending, so a task may cancel itself from its own body.
/// Cancelling twice, or after a one-shot task already ran, does nothing.
#[derive(Clone)]
pub struct TimerHandle {
    timers: Weak<RefCell<TimerQueue<TimerTask>>>,
    slot: Rc<Cell<Option<TimerKey>>>,
}

impl TimerHandle {
    pub(crate) fn new(timers: &Timers, slot: Rc<Cell<Option<TimerKey>>>) -> Self {
        Self {
            timers: Rc::downgrade(timers),
            slot,
        }
    }

    pub fn cancel(&self) {
        let Some(key) = self.slot.take() else {
            return;
        };
        if let Some(timers) = self.timers.upgrade() {
            let removed = timers.borrow_mut().remove(&key);
            drop(removed);
        }
    }

    /// Deadline of the pending registration, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.slot.get().map(|key| key.deadline())
    }
}
