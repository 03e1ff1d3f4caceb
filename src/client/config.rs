//! Client configuration
//!
//! This module provides the configuration builder for secure clients.

use super::{DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_READ_TIMEOUT_MS};
use std::time::Duration;

/// Secure client configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub(crate) handshake_timeout: Duration,
    pub(crate) read_timeout: Duration,
}

impl ClientConfig {
    /// Create a new configuration builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Bound on connect plus handshake
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Bound on the timed read used to fill the peek buffer
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfigBuilder::new().build()
    }
}

/// Client configuration builder
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    handshake_timeout: Duration,
    read_timeout: Duration,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        ClientConfigBuilder {
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the timeout for `peek`'s blocking read
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ClientConfig {
        ClientConfig {
            handshake_timeout: self.handshake_timeout,
            read_timeout: self.read_timeout,
        }
    }
}
