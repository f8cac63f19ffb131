use mio::{event::Event, Token};
use std::fmt;

/// Readiness flags of one socket, copied out of a `mio::event::Event`.
///
/// The reactor dispatches from a snapshot of these so that callbacks which
/// register or drop sockets never touch the poller's event buffer. Readable
/// and writable are independent: one event may carry both.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    token: Token,
    is_readable: bool,
    is_writable: bool,
    is_error: bool,
    is_read_closed: bool,
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("token", &self.token)
            .field("is_readable", &self.is_readable)
            .field("is_writable", &self.is_writable)
            .field("is_error", &self.is_error)
            .field("is_read_closed", &self.is_read_closed)
            .finish()
    }
}

impl Readiness {
    #[cfg(test)]
    pub(crate) fn new(token: Token, is_readable: bool, is_writable: bool) -> Self {
        Self {
            token,
            is_readable,
            is_writable,
            is_error: false,
            is_read_closed: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.is_readable
    }

    pub fn is_writable(&self) -> bool {
        self.is_writable
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn is_read_closed(&self) -> bool {
        self.is_read_closed
    }

    /// Whether a read attempt should be made: errors and hang-ups surface
    /// through the read result.
    pub(crate) fn wants_read(&self) -> bool {
        self.is_readable || self.is_error || self.is_read_closed
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            is_readable: event.is_readable(),
            is_writable: event.is_writable(),
            is_error: event.is_error(),
            is_read_closed: event.is_read_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_independent() {
        let both = Readiness::new(Token(3), true, true);
        assert!(both.is_readable());
        assert!(both.is_writable());
        assert!(both.wants_read());

        let write_only = Readiness::new(Token(3), false, true);
        assert!(!write_only.wants_read());
        assert_eq!(write_only.token(), Token(3));
    }
}
