//! # proxy-rpc
//!
//! Best-effort handling of TDS RPC (stored procedure call) payloads: scan a
//! payload for its procedure name and named parameter literals, rewrite a
//! parameter's value in place under a strict length invariant, and
//! optionally rebuild a payload from scratch for a small typed subset.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod build;
pub mod rewrite;
pub mod scan;
pub mod types;

pub use build::{build_rpc_payload, ParamValue};
pub use rewrite::{rewrite_param_inplace, RewriteOutcome};
pub use scan::{decode_utf16le_best_effort, extract_proc_and_params, Param};
pub use types::{load_param_types, lookup as lookup_param_type, ParamTypeMap};
