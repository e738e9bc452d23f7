//! # proxy-metrics
//!
//! The decision log and counter store the rewrite controller writes every
//! evaluation to, plus a Prometheus-style text exposition helper for
//! scraping.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod counters;
pub mod decisions;
pub mod prometheus;

pub use counters::CounterStore;
pub use decisions::{
    default_decisions_path, DecisionRecord, DecisionSink, FileDecisionSink, InMemoryDecisionSink,
    SharedDecisionSink,
};
pub use prometheus::render_text;
