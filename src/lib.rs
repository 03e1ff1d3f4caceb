//! securestream - secure stream-socket client for constrained network devices
//!
//! This crate provides a byte-stream client (connect, read, write, peek,
//! available, close) backed by a TLS session. The TLS work itself is done by
//! an [`engine::Engine`]; the client owns the session lifecycle, the one-byte
//! peek buffer and the credential slots.

pub mod client;
pub mod engine;

pub use client::{ClientConfig, Error, Result, SecureClient, Target};
pub use engine::{Engine, EngineError, OpenSslEngine};
