//! Length-safe in-place rewriting of RPC parameter literals.
//!
//! TDS parameter encodings carry their own byte lengths inline; replacing a
//! value's bytes without also patching every length field ahead of it would
//! corrupt the message. Restricting a rewrite to "no longer than the
//! original, UTF-16LE space-padded if shorter" sidesteps that problem
//! entirely: every surrounding length field stays correct because the
//! parameter's own byte span never changes size.

/// Outcome of attempting an in-place rewrite for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The value was replaced (possibly space-padded) in place.
    Applied,
    /// The new value was longer than the old one and truncation was not
    /// requested, so the parameter was left unchanged.
    SkippedTooLong,
    /// The old value's UTF-16LE bytes were not found in the payload.
    NotFound,
}

/// Attempt to replace the first occurrence of `old_value`'s UTF-16LE bytes
/// with `new_value`'s, padding with UTF-16LE spaces if shorter.
///
/// If `new_value` encodes to more bytes than `old_value` and `truncate` is
/// `false`, the payload is left untouched and [`RewriteOutcome::SkippedTooLong`]
/// is returned. If `truncate` is `true`, the new value's UTF-16LE units are
/// cut down to fit the old byte length (on a unit boundary, never splitting
/// a code unit).
pub fn rewrite_param_inplace(
    payload: &mut Vec<u8>,
    old_value: &str,
    new_value: &str,
    truncate: bool,
) -> RewriteOutcome {
    let old_bytes = utf16le_bytes(old_value);
    let Some(pos) = find_subslice(payload, &old_bytes) else {
        return RewriteOutcome::NotFound;
    };

    let mut new_bytes = utf16le_bytes(new_value);
    if new_bytes.len() > old_bytes.len() {
        if !truncate {
            return RewriteOutcome::SkippedTooLong;
        }
        new_bytes.truncate(old_bytes.len());
    } else if new_bytes.len() < old_bytes.len() {
        let pad_units = (old_bytes.len() - new_bytes.len()) / 2;
        new_bytes.extend(std::iter::repeat_n([0x20, 0x00], pad_units).flatten());
    }

    debug_assert_eq!(new_bytes.len(), old_bytes.len());
    payload[pos..pos + old_bytes.len()].copy_from_slice(&new_bytes);
    RewriteOutcome::Applied
}

fn utf16le_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn pads_shorter_value_with_spaces() {
        let mut payload = utf16le("TEST@EXAMPLE.COM");
        let before_len = payload.len();
        let outcome = rewrite_param_inplace(&mut payload, "TEST@EXAMPLE.COM", "test@x.com", false);
        assert_eq!(outcome, RewriteOutcome::Applied);
        assert_eq!(payload.len(), before_len);
        let decoded = String::from_utf16(
            &payload
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect::<Vec<_>>(),
        )
        .unwrap();
        assert_eq!(decoded, "test@x.com      ");
    }

    #[test]
    fn equal_length_substitutes_cleanly() {
        let mut payload = utf16le("TEST@EXAMPLE.COM");
        let outcome = rewrite_param_inplace(&mut payload, "TEST@EXAMPLE.COM", "test@example.com", false);
        assert_eq!(outcome, RewriteOutcome::Applied);
        assert_eq!(payload, utf16le("test@example.com"));
    }

    #[test]
    fn longer_value_skipped_without_truncate() {
        let mut payload = utf16le("short");
        let before = payload.clone();
        let outcome = rewrite_param_inplace(&mut payload, "short", "a much longer value", false);
        assert_eq!(outcome, RewriteOutcome::SkippedTooLong);
        assert_eq!(payload, before);
    }

    #[test]
    fn longer_value_truncated_when_requested() {
        let mut payload = utf16le("short");
        let before_len = payload.len();
        let outcome = rewrite_param_inplace(&mut payload, "short", "a much longer value", true);
        assert_eq!(outcome, RewriteOutcome::Applied);
        assert_eq!(payload.len(), before_len);
    }

    #[test]
    fn missing_value_reports_not_found() {
        let mut payload = utf16le("something else");
        let outcome = rewrite_param_inplace(&mut payload, "absent", "x", false);
        assert_eq!(outcome, RewriteOutcome::NotFound);
    }

    proptest::proptest! {
        #[test]
        fn length_invariant_holds(old in "[a-zA-Z0-9]{1,20}", new in "[a-zA-Z0-9]{1,10}") {
            let mut payload = utf16le(&old);
            let before_len = payload.len();
            let outcome = rewrite_param_inplace(&mut payload, &old, &new, false);
            if outcome == RewriteOutcome::Applied {
                proptest::prop_assert_eq!(payload.len(), before_len);
            }
        }
    }
}
