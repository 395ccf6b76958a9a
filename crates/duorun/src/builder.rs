//! # Connection Builder
//!
//! Provides a fluent API for configuring a connection before its pump starts.

use std::sync::Arc;
use std::time::Duration;

use crate::connection::Config;
use crate::connection::Connection;
use crate::listener::ErasedListener;
use crate::listener::InvocationListener;
use crate::reentrancy::Coordinator;
use crate::transport::Transport;

/// Fluent builder for a `Connection`.
///
/// Defaults: client-only (not bidirectional), uri `"/"`, no listener, no
/// response timeout, the process-wide coordinator.
pub struct ConnectionBuilder {
    name: String,
    uri: String,
    bidirectional: bool,
    listener: Option<Arc<dyn ErasedListener>>,
    response_timeout: Option<Duration>,
    coordinator: Option<Arc<Coordinator>>,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self {
            name: "connection".to_string(),
            uri: "/".to_string(),
            bidirectional: false,
            listener: None,
            response_timeout: None,
            coordinator: None,
        }
    }

    /// Name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Endpoint every outbound request is addressed to.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Lets local objects passed as interface-typed arguments be exported to the peer.
    pub fn bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    pub fn listener<L: InvocationListener>(mut self, listener: L) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Fails a call with `Error::Timeout` if no response arrives in time.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Uses `coordinator` instead of the process-wide one.
    pub fn coordinator(mut self, coordinator: Arc<Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Starts the connection over `transport`. Must be called within a tokio runtime.
    pub fn build(self, transport: impl Transport) -> Connection {
        self.build_shared(Arc::new(transport))
    }

    pub fn build_shared(self, transport: Arc<dyn Transport>) -> Connection {
        let config = Config {
            name: self.name,
            uri: self.uri,
            bidirectional: self.bidirectional,
            listener: self.listener,
            response_timeout: self.response_timeout,
            coordinator: self.coordinator.unwrap_or_else(Coordinator::shared),
        };
        Connection::start(config, transport)
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
