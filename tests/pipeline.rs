mod common;

use std::{
    cell::Cell,
    io::{Read, Write},
    net::TcpStream,
    rc::Rc,
    thread,
    time::Duration,
};

use common::{init_tracing, listen, run_for, run_until, Recorder, Seen};
use mill_reactor::{
    attach, Connection, ConnectionHandler, FixedSize, FramingFilter, NetworkError, Reactor,
    ReactorConfig,
};

const PAYLOAD_LEN: usize = 4 * 1024 * 1024;

fn payload() -> Vec<u8> {
    (0..PAYLOAD_LEN).map(|i| (i % 251) as u8).collect()
}

/// Sends the payload as soon as it is connected, then closes if `CLOSE`.
#[derive(Default)]
struct Sender<const CLOSE: bool> {
    rec: Recorder,
}

impl<const CLOSE: bool> Connection for Sender<CLOSE> {
    fn set_handler(&self, handler: Rc<dyn ConnectionHandler>) {
        self.rec.set_handler(handler);
    }

    fn on_recv(&self, data: &[u8]) {
        self.rec.on_recv(data);
    }

    fn on_queue(&self, delta: isize, total: usize) {
        self.rec.on_queue(delta, total);
    }

    fn on_connect(&self) {
        self.rec.on_connect();
        let handler = self.rec.handler();
        handler.send(&payload());
        if CLOSE {
            handler.disconnect();
        }
    }

    fn on_disconnect(&self) {
        self.rec.on_disconnect();
    }
}

/// Queues more than the kernel buffers on loopback, then asks to close.
#[derive(Default)]
struct Flooder {
    rec: Recorder,
}

impl Connection for Flooder {
    fn set_handler(&self, handler: Rc<dyn ConnectionHandler>) {
        self.rec.set_handler(handler);
    }

    fn on_connect(&self) {
        self.rec.on_connect();
        let handler = self.rec.handler();
        handler.send(&vec![0x5a; 8 * PAYLOAD_LEN]);
        handler.disconnect();
    }

    fn on_disconnect(&self) {
        self.rec.on_disconnect();
    }

    fn on_recv(&self, data: &[u8]) {
        self.rec.on_recv(data);
    }
}

/// Stops reading once ten bytes arrived.
#[derive(Default)]
struct Pauser {
    rec: Recorder,
    paused: Cell<bool>,
}

impl Connection for Pauser {
    fn set_handler(&self, handler: Rc<dyn ConnectionHandler>) {
        self.rec.set_handler(handler);
    }

    fn on_recv(&self, data: &[u8]) {
        self.rec.on_recv(data);
        if !self.paused.get() && self.rec.received().len() >= 10 {
            self.paused.set(true);
            self.rec.handler().set_buffer_size(0);
        }
    }
}

fn as_connection<T: Connection + 'static>(app: Rc<T>) -> Rc<dyn Connection> {
    app
}

#[test]
fn test_split_frame_is_delivered_whole() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (listener, accepted) = listen(&reactor, |app: Rc<Recorder>| {
        attach(app, FramingFilter::new(FixedSize(4)))
    });

    let mut client = TcpStream::connect(listener.local_addr()).unwrap();
    client.set_nodelay(true).unwrap();
    run_until(&reactor, || accepted.borrow().len() == 1);
    let server = accepted.borrow()[0].clone();

    client.write_all(b"PI").unwrap();
    run_for(&reactor, Duration::from_millis(50));
    assert!(server.received().is_empty());

    client.write_all(b"NG").unwrap();
    run_until(&reactor, || !server.received().is_empty());
    assert_eq!(
        *server.log.borrow(),
        vec![Seen::Connect, Seen::Recv(b"PING".to_vec())]
    );
}

#[test]
fn test_zero_buffer_size_pauses_reading() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (listener, accepted) = listen(&reactor, as_connection::<Pauser>);

    let mut client = TcpStream::connect(listener.local_addr()).unwrap();
    client.write_all(b"0123456789").unwrap();
    run_until(&reactor, || {
        accepted
            .borrow()
            .first()
            .is_some_and(|server| server.rec.received().len() == 10)
    });
    let server = accepted.borrow()[0].clone();

    client.write_all(&[b'x'; 20]).unwrap();
    run_for(&reactor, Duration::from_millis(100));
    assert_eq!(server.rec.received().len(), 10);

    server.rec.handler().set_buffer_size(1024);
    run_until(&reactor, || server.rec.received().len() == 30);
}

#[test]
fn test_reads_are_bounded_by_buffer_size() {
    init_tracing();
    let config = ReactorConfig::builder().buffer_size(4).build();
    let reactor = Reactor::with_config(config).unwrap();
    let (listener, accepted) = listen(&reactor, as_connection::<Recorder>);

    let mut client = TcpStream::connect(listener.local_addr()).unwrap();
    client.write_all(b"abcdefghij").unwrap();
    run_until(&reactor, || {
        accepted
            .borrow()
            .first()
            .is_some_and(|server| server.received().len() == 10)
    });

    let server = accepted.borrow()[0].clone();
    assert_eq!(server.received(), b"abcdefghij");
    for seen in server.log.borrow().iter() {
        if let Seen::Recv(chunk) = seen {
            assert!(chunk.len() <= 4, "chunk of {} bytes", chunk.len());
        }
    }
}

#[test]
fn test_graceful_close_flushes_everything() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (listener, accepted) = listen(&reactor, as_connection::<Sender<true>>);

    let addr = listener.local_addr();
    let reader = thread::spawn(move || {
        let mut client = TcpStream::connect(addr).unwrap();
        let mut data = Vec::new();
        client.read_to_end(&mut data).unwrap();
        data
    });

    run_until(&reactor, || {
        !accepted.borrow().is_empty() && reactor.connection_count() == 0
    });
    let data = reader.join().unwrap();
    assert_eq!(data.len(), PAYLOAD_LEN);
    assert!(data == payload());

    // the close was asked for, so no on_disconnect
    let server = accepted.borrow()[0].clone();
    assert_eq!(server.rec.count(&Seen::Connect), 1);
    assert_eq!(server.rec.count(&Seen::Disconnect), 0);
}

#[test]
fn test_reset_while_draining_reports_disconnect() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (listener, accepted) = listen(&reactor, as_connection::<Flooder>);

    let mut client = TcpStream::connect(listener.local_addr()).unwrap();
    run_until(&reactor, || accepted.borrow().len() == 1);
    let server = accepted.borrow()[0].clone();
    assert_eq!(reactor.connection_count(), 1);

    // leaving unread data behind makes the close a reset
    let mut head = [0u8; 1024];
    client.read_exact(&mut head).unwrap();
    drop(client);

    run_until(&reactor, || reactor.connection_count() == 0);
    assert_eq!(server.rec.count(&Seen::Disconnect), 1);
    run_for(&reactor, Duration::from_millis(30));
    assert_eq!(server.rec.count(&Seen::Disconnect), 1);
}

#[test]
fn test_queue_reports_balance_out() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (listener, accepted) = listen(&reactor, as_connection::<Sender<false>>);

    let addr = listener.local_addr();
    let reader = thread::spawn(move || {
        let mut client = TcpStream::connect(addr).unwrap();
        let mut data = vec![0; PAYLOAD_LEN];
        client.read_exact(&mut data).unwrap();
        data
    });

    run_until(&reactor, || {
        accepted.borrow().first().is_some_and(|server| {
            server
                .rec
                .queue_events()
                .last()
                .is_some_and(|&(_, total)| total == 0)
        })
    });
    assert!(reader.join().unwrap() == payload());

    let server = accepted.borrow()[0].clone();
    let events = server.rec.queue_events();
    assert!(events[0].0 > 0);
    assert_eq!(events.iter().map(|&(delta, _)| delta).sum::<isize>(), 0);

    // the reader hung up after the payload
    run_until(&reactor, || server.rec.count(&Seen::Disconnect) == 1);
    assert_eq!(reactor.connection_count(), 0);
}

#[test]
fn test_disconnect_is_reported_once() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (listener, accepted) = listen(&reactor, as_connection::<Recorder>);

    let client = TcpStream::connect(listener.local_addr()).unwrap();
    run_until(&reactor, || accepted.borrow().len() == 1);
    let server = accepted.borrow()[0].clone();
    drop(client);

    run_until(&reactor, || server.count(&Seen::Disconnect) == 1);
    run_for(&reactor, Duration::from_millis(30));

    // commands on a closed connection are dropped
    server.handler().send(b"late");
    server.handler().disconnect();
    assert_eq!(server.count(&Seen::Disconnect), 1);
    assert_eq!(server.handler().remote_addr(), None);
    assert_eq!(reactor.connection_count(), 0);
}

#[test]
fn test_connect_queues_until_connected() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (listener, accepted) = listen(&reactor, as_connection::<Recorder>);

    let client = Recorder::new();
    reactor
        .connect(client.clone(), listener.local_addr())
        .unwrap();
    client.handler().send(b"hello");
    assert_eq!(client.queue_events(), vec![(5, 5)]);

    run_until(&reactor, || {
        accepted
            .borrow()
            .first()
            .is_some_and(|server| server.received() == b"hello")
    });
    run_until(&reactor, || client.queue_events().len() == 2);
    assert_eq!(
        *client.log.borrow(),
        vec![Seen::Queue(5, 5), Seen::Connect, Seen::Queue(-5, 0)]
    );

    let server = accepted.borrow()[0].clone();
    assert_eq!(client.handler().remote_addr(), Some(listener.local_addr()));
    assert_eq!(server.handler().remote_addr(), client.handler().local_addr());
}

#[test]
fn test_connect_host_goes_through_resolver() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (listener, accepted) = listen(&reactor, as_connection::<Recorder>);

    // not a literal std parses, so it goes through the resolver
    let client = Recorder::new();
    reactor
        .connect_host(client.clone(), "127.1", listener.local_addr().port())
        .unwrap();
    client.handler().send(b"early");
    assert_eq!(client.handler().remote_addr(), None);

    run_until(&reactor, || client.count(&Seen::Connect) == 1);
    run_until(&reactor, || {
        accepted
            .borrow()
            .first()
            .is_some_and(|server| server.received() == b"early")
    });
    assert_eq!(client.handler().remote_addr(), Some(listener.local_addr()));
    run_until(&reactor, || client.queue_events().len() == 2);
    assert_eq!(client.queue_events(), vec![(5, 5), (-5, 0)]);
}

#[test]
fn test_close_listener_keeps_accepted_sockets() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (listener, accepted) = listen(&reactor, as_connection::<Recorder>);

    let mut client = TcpStream::connect(listener.local_addr()).unwrap();
    run_until(&reactor, || accepted.borrow().len() == 1);
    let server = accepted.borrow()[0].clone();

    assert!(reactor.close_listener(listener.id()));
    assert!(!reactor.close_listener(listener.id()));
    assert_eq!(reactor.listener_count(), 0);
    assert!(TcpStream::connect(listener.local_addr()).is_err());

    client.write_all(b"still open").unwrap();
    run_until(&reactor, || server.received() == b"still open");
    server.handler().send(b"ok");
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"ok");
    assert_eq!(reactor.connection_count(), 1);
    assert_eq!(server.count(&Seen::Disconnect), 0);
}

#[test]
fn test_refused_connect_reports_disconnect() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let addr = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap()
    };

    let client = Recorder::new();
    match reactor.connect(client.clone(), addr) {
        Err(NetworkError::Connect { .. }) => {}
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => {
            run_until(&reactor, || client.count(&Seen::Disconnect) == 1);
            assert_eq!(client.count(&Seen::Connect), 0);
        }
    }
    assert_eq!(reactor.connection_count(), 0);
}

#[test]
fn test_bind_conflict_is_an_error() {
    let reactor = Reactor::new().unwrap();
    let (listener, _accepted) = listen(&reactor, as_connection::<Recorder>);

    let result = reactor.add_listener(
        || Recorder::new() as Rc<dyn Connection>,
        listener.local_addr(),
    );
    assert!(matches!(result, Err(NetworkError::Bind { .. })));
}

#[test]
fn test_close_all_shuts_everything_down() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (listener, accepted) = listen(&reactor, as_connection::<Recorder>);

    let mut first = TcpStream::connect(listener.local_addr()).unwrap();
    let mut second = TcpStream::connect(listener.local_addr()).unwrap();
    run_until(&reactor, || accepted.borrow().len() == 2);

    reactor.close_all();
    assert_eq!(reactor.connection_count(), 0);
    assert_eq!(reactor.listener_count(), 0);
    for server in accepted.borrow().iter() {
        assert_eq!(server.count(&Seen::Disconnect), 1);
    }

    let mut buf = [0u8; 1];
    assert_eq!(first.read(&mut buf).unwrap_or(0), 0);
    assert_eq!(second.read(&mut buf).unwrap_or(0), 0);
    assert!(TcpStream::connect(listener.local_addr()).is_err());
}
