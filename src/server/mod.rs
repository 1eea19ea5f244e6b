//! Dispatcher-side networking
//!
//! The [`ConnectionRegistry`] accepts worker connections in the background
//! and hands out snapshots of the live list. Each [`Connection`] carries one
//! frame/result round trip at a time.

pub mod config;
pub mod connection;
pub mod listener;

pub use config::RelayConfig;
pub use connection::Connection;
pub use listener::ConnectionRegistry;
