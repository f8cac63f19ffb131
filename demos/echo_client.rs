use anyhow::{bail, Result};
use mill_reactor::{
    attach, Connection, ConnectionHandler, FramingFilter, LengthField, LengthPrefixed, Reactor,
    Remote,
};
use std::{
    cell::{Cell, OnceCell},
    rc::Rc,
    time::{Duration, Instant},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CODEC: LengthPrefixed = LengthPrefixed::new(LengthField::U16).with_magic(0xA5);
const FRAMES: usize = 1000;

/// Sends numbered frames and stops the loop once every echo came back.
struct PingClient {
    handler: OnceCell<Rc<dyn ConnectionHandler>>,
    remote: Remote,
    echoed: Cell<usize>,
    started: Cell<Option<Instant>>,
    failed: Cell<bool>,
}

impl Connection for PingClient {
    fn set_handler(&self, handler: Rc<dyn ConnectionHandler>) {
        let _ = self.handler.set(handler);
    }

    fn on_connect(&self) {
        let Some(handler) = self.handler.get() else {
            return;
        };
        info!(peer_addr = ?handler.remote_addr(), "connected");
        self.started.set(Some(Instant::now()));
        for i in 0..FRAMES {
            match CODEC.encode(format!("ping {i}").as_bytes()) {
                Ok(frame) => handler.send(&frame),
                Err(err) => warn!(%err, "frame not sent"),
            }
        }
    }

    fn on_recv(&self, _frame: &[u8]) {
        let echoed = self.echoed.get() + 1;
        self.echoed.set(echoed);
        if echoed < FRAMES {
            return;
        }
        if let Some(started) = self.started.get() {
            info!(frames = echoed, elapsed = ?started.elapsed(), "all frames echoed");
        }
        if let Some(handler) = self.handler.get() {
            handler.disconnect();
        }
        let _ = self.remote.interrupt();
    }

    fn on_disconnect(&self) {
        warn!(echoed = self.echoed.get(), "server went away");
        self.failed.set(true);
        let _ = self.remote.interrupt();
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "localhost".into());
    let port: u16 = std::env::args()
        .nth(2)
        .map(|port| port.parse())
        .transpose()?
        .unwrap_or(8080);

    let reactor = Reactor::new()?;
    let client = Rc::new(PingClient {
        handler: OnceCell::new(),
        remote: reactor.remote(),
        echoed: Cell::new(0),
        started: Cell::new(None),
        failed: Cell::new(false),
    });
    reactor.connect_host(attach(client.clone(), FramingFilter::new(CODEC)), &host, port)?;

    reactor.post_after(Duration::from_secs(30), |reactor| {
        warn!("giving up after 30 seconds");
        let _ = reactor.interrupt();
    });
    reactor.run_forever()?;

    if client.failed.get() || client.echoed.get() < FRAMES {
        bail!("only {} of {} frames echoed", client.echoed.get(), FRAMES);
    }
    Ok(())
}
