use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mill_reactor::{
    attach, Connection, ConnectionHandler, FramingFilter, LengthField, LengthPrefixed, Reactor,
};
use std::{
    cell::Cell,
    net::SocketAddr,
    rc::Rc,
    time::{Duration, Instant},
};

#[derive(Default)]
struct CountingConnection {
    frames: Cell<usize>,
}

impl Connection for CountingConnection {
    fn set_handler(&self, _handler: Rc<dyn ConnectionHandler>) {}

    fn on_recv(&self, data: &[u8]) {
        black_box(data);
        self.frames.set(self.frames.get() + 1);
    }
}

struct NullHandler;

impl ConnectionHandler for NullHandler {
    fn send(&self, _data: &[u8]) {}
    fn disconnect(&self) {}
    fn set_buffer_size(&self, _size: usize) {}
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    let codec = LengthPrefixed::new(LengthField::U16).with_magic(0xA5);

    for payload_len in [16usize, 512, 4096] {
        let stream: Vec<u8> = (0..64)
            .flat_map(|_| codec.encode(&vec![0x42; payload_len]).unwrap())
            .collect();
        group.throughput(Throughput::Bytes(stream.len() as u64));

        for chunk in [64usize, 1500] {
            group.bench_with_input(
                BenchmarkId::new(format!("payload_{payload_len}"), chunk),
                &chunk,
                |b, &chunk| {
                    let app = Rc::new(CountingConnection::default());
                    let chain = attach(app.clone(), FramingFilter::new(codec));
                    chain.set_handler(Rc::new(NullHandler));

                    b.iter(|| {
                        for piece in stream.chunks(chunk) {
                            chain.on_recv(piece);
                        }
                    });
                    black_box(app.frames.get());
                },
            );
        }
    }
    group.finish();
}

fn bench_timers(c: &mut Criterion) {
    let mut group = c.benchmark_group("timers");

    for count in [100usize, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let reactor = Reactor::new().unwrap();
            let fired = Rc::new(Cell::new(0usize));

            b.iter(|| {
                let now = Instant::now();
                for i in 0..count {
                    let fired = fired.clone();
                    reactor.post_at(now + Duration::from_nanos((i % 7) as u64), move |_| {
                        fired.set(fired.get() + 1)
                    });
                }
                while reactor.timer_count() > 0 {
                    reactor.run_once(Some(Duration::ZERO)).unwrap();
                }
            });
            black_box(fired.get());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_framing, bench_timers);
criterion_main!(benches);
