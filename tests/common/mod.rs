#![allow(dead_code)]

use std::{
    cell::{OnceCell, RefCell},
    rc::Rc,
    time::{Duration, Instant},
};

use mill_reactor::{Connection, ConnectionHandler, Listener, Reactor};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Connect,
    Recv(Vec<u8>),
    Queue(isize, usize),
    Disconnect,
}

/// Application end of a pipeline that records every callback.
#[derive(Default)]
pub struct Recorder {
    pub log: RefCell<Vec<Seen>>,
    handler: OnceCell<Rc<dyn ConnectionHandler>>,
}

impl Recorder {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn handler(&self) -> Rc<dyn ConnectionHandler> {
        self.handler.get().cloned().expect("handler installed")
    }

    pub fn received(&self) -> Vec<u8> {
        self.log
            .borrow()
            .iter()
            .filter_map(|seen| match seen {
                Seen::Recv(data) => Some(data.as_slice()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .concat()
    }

    pub fn count(&self, wanted: &Seen) -> usize {
        self.log.borrow().iter().filter(|seen| *seen == wanted).count()
    }

    pub fn queue_events(&self) -> Vec<(isize, usize)> {
        self.log
            .borrow()
            .iter()
            .filter_map(|seen| match seen {
                Seen::Queue(delta, total) => Some((*delta, *total)),
                _ => None,
            })
            .collect()
    }
}

impl Connection for Recorder {
    fn set_handler(&self, handler: Rc<dyn ConnectionHandler>) {
        assert!(self.handler.set(handler).is_ok(), "handler set twice");
    }

    fn on_recv(&self, data: &[u8]) {
        self.log.borrow_mut().push(Seen::Recv(data.to_vec()));
    }

    fn on_queue(&self, delta: isize, total: usize) {
        self.log.borrow_mut().push(Seen::Queue(delta, total));
    }

    fn on_connect(&self) {
        self.log.borrow_mut().push(Seen::Connect);
    }

    fn on_disconnect(&self) {
        self.log.borrow_mut().push(Seen::Disconnect);
    }
}

pub type Accepted<T> = Rc<RefCell<Vec<Rc<T>>>>;

/// Listens on an ephemeral localhost port, keeping every accepted
/// application connection in the returned list.
pub fn listen<T, F>(reactor: &Reactor, make: F) -> (Listener, Accepted<T>)
where
    T: Connection + Default + 'static,
    F: Fn(Rc<T>) -> Rc<dyn Connection> + 'static,
{
    let accepted: Accepted<T> = Rc::default();
    let list = accepted.clone();
    let listener = reactor
        .add_listener(
            move || {
                let app = Rc::new(T::default());
                list.borrow_mut().push(app.clone());
                make(app)
            },
            "127.0.0.1:0".parse().unwrap(),
        )
        .unwrap();
    (listener, accepted)
}

/// Runs loop passes until `done` holds, failing after five seconds.
pub fn run_until(reactor: &Reactor, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        reactor.run_once(Some(Duration::from_millis(10))).unwrap();
    }
}

/// Runs loop passes for `period`, whatever happens.
pub fn run_for(reactor: &Reactor, period: Duration) {
    let deadline = Instant::now() + period;
    while Instant::now() < deadline {
        reactor.run_once(Some(Duration::from_millis(5))).unwrap();
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
