//! Fleet bus integration tests.

mod support;

mod broadcast;
mod claims;
mod heartbeat;
mod lifecycle;
