//! Babytrack application library: local store, data synchronization service,
//! client state and the reference backend.

pub mod config;
pub mod db;
pub mod server;
pub mod state;
pub mod sync;
