//! RPC dispatcher integration tests.

mod binding;
mod middleware;

#[cfg(feature = "http")]
mod http;
