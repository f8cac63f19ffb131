use anyhow::Result;
use mill_reactor::{
    attach, Connection, ConnectionHandler, DumpFilter, FramingFilter, LengthField,
    LengthPrefixed, Reactor, ReactorConfig,
};
use std::{
    cell::OnceCell,
    net::SocketAddr,
    rc::Rc,
    time::{Duration, Instant},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CODEC: LengthPrefixed = LengthPrefixed::new(LengthField::U16).with_magic(0xA5);

/// Echoes every frame back unchanged.
#[derive(Default)]
struct EchoConnection {
    handler: OnceCell<Rc<dyn ConnectionHandler>>,
}

impl Connection for EchoConnection {
    fn set_handler(&self, handler: Rc<dyn ConnectionHandler>) {
        let _ = self.handler.set(handler);
    }

    fn on_recv(&self, frame: &[u8]) {
        if let Some(handler) = self.handler.get() {
            handler.send(frame);
        }
    }

    fn on_queue(&self, delta: isize, total: usize) {
        // stop reading while the peer is not keeping up
        if let Some(handler) = self.handler.get() {
            if delta > 0 && total > 256 * 1024 {
                handler.set_buffer_size(0);
            } else if total == 0 {
                handler.set_buffer_size(16 * 1024);
            }
        }
    }

    fn on_connect(&self) {
        if let Some(handler) = self.handler.get() {
            info!(peer_addr = ?handler.remote_addr(), "client connected");
        }
    }

    fn on_disconnect(&self) {
        info!("client disconnected");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string())
        .parse()?;

    let config = ReactorConfig::builder().no_delay(true).build();
    let reactor = Reactor::with_config(config)?;

    let listener = reactor.add_listener(
        || {
            let app = attach(Rc::new(EchoConnection::default()), DumpFilter::new("app"));
            attach(app, FramingFilter::new(CODEC.with_max_frame(64 * 1024)))
        },
        addr,
    )?;
    info!(local_addr = %listener.local_addr(), "echo server ready");

    reactor.schedule_every(
        Instant::now() + Duration::from_secs(10),
        Duration::from_secs(10),
        |reactor| info!(connections = reactor.connection_count(), "status"),
    );

    reactor.run_forever()?;
    Ok(())
}
