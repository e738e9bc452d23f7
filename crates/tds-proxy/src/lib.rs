//! Library surface for the proxy binary, split out so integration tests can
//! drive the accept loop and rewrite controller directly over real sockets.

pub mod config;
pub mod controller;
pub mod error;
pub mod pipe;
