use crate::error::{NetworkError, Result};

pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
pub const DEFAULT_RESOLVER_THREADS: usize = 1;

/// Configuration for a [`Reactor`](crate::Reactor).
///
/// Controls how many readiness events are collected per pass, how much a
/// socket reads at a time and the socket options applied to every stream.
/// Use `ReactorConfig::builder()` for ergonomic construction.
///
/// ## Buffer sizes
///
/// - buffer_size: initial per-socket read size, adjustable at runtime
///   through `ConnectionHandler::set_buffer_size`
/// - max_buffer_size: ceiling every `set_buffer_size` call is clamped to,
///   and the size of the scratch buffer shared by all reads
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Maximum number of readiness events handled per poll
    pub events_capacity: usize,
    /// Initial read size of every new socket
    pub buffer_size: usize,
    /// Upper bound for any socket's read size
    pub max_buffer_size: usize,
    /// Enable TCP_NODELAY
    pub no_delay: bool,
    /// Worker threads used for host name resolution
    pub resolver_threads: usize,
}

impl ReactorConfig {
    /// Create a new builder for ReactorConfig
    pub fn builder() -> ReactorConfigBuilder {
        ReactorConfigBuilder::new()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.events_capacity == 0 {
            return Err(NetworkError::Configuration(
                "events_capacity must be positive".into(),
            ));
        }
        if self.max_buffer_size == 0 {
            return Err(NetworkError::Configuration(
                "max_buffer_size must be positive".into(),
            ));
        }
        if self.buffer_size > self.max_buffer_size {
            return Err(NetworkError::Configuration(format!(
                "buffer_size {} exceeds max_buffer_size {}",
                self.buffer_size, self.max_buffer_size
            )));
        }
        if self.resolver_threads == 0 {
            return Err(NetworkError::Configuration(
                "resolver_threads must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_buffer_size: MAX_FRAME_SIZE,
            no_delay: true,
            resolver_threads: DEFAULT_RESOLVER_THREADS,
        }
    }
}

/// Builder for ReactorConfig using the builder pattern.
///
/// All fields are optional and will use defaults from ReactorConfig::default()
/// if not explicitly set.
#[derive(Default)]
pub struct ReactorConfigBuilder {
    events_capacity: Option<usize>,
    buffer_size: Option<usize>,
    max_buffer_size: Option<usize>,
    no_delay: Option<bool>,
    resolver_threads: Option<usize>,
}

impl ReactorConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of events collected per poll
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    /// Set the initial read size of new sockets
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Set the read size ceiling
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = Some(size);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    /// Set the number of resolver worker threads
    pub fn resolver_threads(mut self, threads: usize) -> Self {
        self.resolver_threads = Some(threads);
        self
    }

    /// Build the ReactorConfig
    pub fn build(self) -> ReactorConfig {
        let default = ReactorConfig::default();
        ReactorConfig {
            events_capacity: self.events_capacity.unwrap_or(default.events_capacity),
            buffer_size: self.buffer_size.unwrap_or(default.buffer_size),
            max_buffer_size: self.max_buffer_size.unwrap_or(default.max_buffer_size),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
            resolver_threads: self.resolver_threads.unwrap_or(default.resolver_threads),
        }
    }
}
