//! Noble CCTP relayer - library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod address_codec;
pub mod api;
pub mod attestation;
pub mod bounded_cache;
pub mod codec;
pub mod config;
pub mod db;
pub mod filters;
pub mod hash;
pub mod metrics;
pub mod pipeline;
pub mod rpc_fallback;
pub mod store;
pub mod types;
pub mod watchers;
pub mod writers;
