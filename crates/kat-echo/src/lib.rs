//! KAT echo backend.
//!
//! A cooperating probe target: every request, on any path and with any
//! method, is answered with a JSON [`common::echo::EchoRecord`] describing
//! the request as received. WebSocket upgrades on any path echo each message
//! back verbatim.

pub mod config;
pub mod handlers;
pub mod routes;
pub mod server_harness;

pub use server_harness::EchoServer;
