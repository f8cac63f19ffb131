use std::{io, time::Duration};

use mio::{event::Source, Events, Interest, Poll, Registry, Token, Waker};

use crate::event::Readiness;

/// Token reserved for the cross-thread wake-up signal.
pub(crate) const WAKE_TOKEN: Token = Token(0);

pub(crate) struct PollHandle {
    poller: Poll,
    events: Events,
}

impl PollHandle {
    pub fn new(events_capacity: usize) -> io::Result<(Self, Waker)> {
        let poller = Poll::new()?;
        let waker = Waker::new(poller.registry(), WAKE_TOKEN)?;
        Ok((
            PollHandle {
                poller,
                events: Events::with_capacity(events_capacity),
            },
            waker,
        ))
    }

    pub fn registry(&self) -> &Registry {
        self.poller.registry()
    }

    /// Waits for readiness and returns a snapshot of what was reported.
    ///
    /// A signal interrupting the wait counts as an empty pass.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Readiness>> {
        match self.poller.poll(&mut self.events, timeout) {
            Ok(()) => Ok(self.events.iter().map(Readiness::from).collect()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Moves `source` from the `current` interest set to the `wanted` one.
    ///
    /// mio has no empty interest, so `None` means "not registered".
    pub fn update_interest<S>(
        &self,
        source: &mut S,
        token: Token,
        current: Option<Interest>,
        wanted: Option<Interest>,
    ) -> io::Result<Option<Interest>>
    where
        S: Source + ?Sized,
    {
        match (current, wanted) {
            (None, None) => {}
            (None, Some(interest)) => self.registry().register(source, token, interest)?,
            (Some(_), None) => self.registry().deregister(source)?,
            (Some(old), Some(new)) if old != new => {
                self.registry().reregister(source, token, new)?
            }
            (Some(_), Some(_)) => {}
        }
        Ok(wanted)
    }
}
