//! Voice relay server and assistant client.
//!
//! The server half exposes the completion relay over HTTP. The client half
//! drives one turn at a time: transcript in, relay events accumulated into a
//! reply, reply synthesized and played.

pub mod config;
pub mod error;
pub mod metrics;
pub mod recognizer;
pub mod relay_client;
pub mod routes;
pub mod turn;
pub mod validation;
