//! Best-effort scanning of an RPC payload for a procedure name and named
//! parameter literals.
//!
//! This is not a TDS RPC parser: it decodes the payload as UTF-16LE and
//! looks for `@name` occurrences followed, within a bounded window, by a
//! single-quoted literal. It is good enough to evaluate policy rules against
//! named parameters without understanding the binary parameter encoding.

use once_cell::sync::Lazy;
use regex::Regex;

/// How far past an `@name` occurrence to look for its quoted value.
const VALUE_WINDOW: usize = 200;

static PROC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\w.\[\]]{3,})\s*@").unwrap());
static PARAM_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]{1,64})").unwrap());
static QUOTED_VALUE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"'([^']{0,120})'").unwrap());

/// Decode `data` as UTF-16LE, discarding any unpaired surrogate or invalid
/// code unit rather than failing.
#[must_use]
pub fn decode_utf16le_best_effort(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// A named RPC parameter and its best-effort extracted literal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name, without the leading `@`.
    pub name: String,
    /// The literal found for this parameter, if any.
    pub value: String,
}

/// Best-effort extraction of the procedure name and named parameter values
/// from an RPC payload.
#[must_use]
pub fn extract_proc_and_params(payload: &[u8]) -> (Option<String>, Vec<Param>) {
    let s = decode_utf16le_best_effort(payload);
    if s.is_empty() {
        return (None, Vec::new());
    }

    let proc = PROC_RE.captures(&s).map(|c| c[1].to_string());

    let mut params = Vec::new();
    for pm in PARAM_NAME_RE.captures_iter(&s) {
        let whole = pm.get(0).unwrap();
        let name = pm[1].to_string();
        let window_start = whole.end();
        let window_end = (window_start + VALUE_WINDOW).min(s.len());
        // `window_end` may land mid-codepoint; back off to a char boundary.
        let mut window_end = window_end;
        while window_end < s.len() && !s.is_char_boundary(window_end) {
            window_end += 1;
        }
        let window = &s[window_start..window_end];
        if let Some(vm) = QUOTED_VALUE_RE.captures(window) {
            params.push(Param {
                name,
                value: vm[1].to_string(),
            });
        }
    }

    (proc, params)
}
