//! Byte-scanning extraction of the three integer fields the pipeline needs
//! from exchange JSON payloads. A full JSON decode would dominate the hot
//! path; the merger only orders by `u` and the logger only needs `T`/`E`.

/// Locates `needle` in `haystack`.
#[inline]
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parses an unsigned decimal run starting at `pos`, skipping leading
/// whitespace. Rejects values that overflow `u64`.
#[inline]
fn parse_u64_at(payload: &[u8], mut pos: usize) -> Option<u64> {
    while payload.get(pos).is_some_and(u8::is_ascii_whitespace) {
        pos += 1;
    }
    let mut value: u64 = 0;
    let mut digits = 0usize;
    while let Some(&b) = payload.get(pos) {
        if !b.is_ascii_digit() {
            break;
        }
        value = value
            .checked_mul(10)?
            .checked_add(u64::from(b - b'0'))?;
        digits += 1;
        pos += 1;
    }
    (digits > 0).then_some(value)
}

/// Extracts the total-order update id from a `"u":<digits>` field.
///
/// Whitespace between the colon and the digits is tolerated. Returns `None`
/// when the field is missing, empty, or out of `u64` range; the merger
/// drops such payloads.
#[inline]
pub fn extract_update_id(payload: &[u8]) -> Option<u64> {
    let key = find(payload, b"\"u\":")?;
    parse_u64_at(payload, key + 4)
}

#[inline]
fn extract_ms_field(payload: &[u8], key: &[u8]) -> Option<i64> {
    let at = find(payload, key)?;
    let v = parse_u64_at(payload, at + key.len())?;
    i64::try_from(v).ok()
}

/// Event timestamp in epoch milliseconds: field `T`, falling back to `E`,
/// else 0.
#[inline]
pub fn extract_event_ms(payload: &[u8]) -> i64 {
    extract_ms_field(payload, b"\"T\":")
        .or_else(|| extract_ms_field(payload, b"\"E\":"))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_id_plain() {
        let p = br#"{"u":400900217,"s":"BTCUSDT","b":"25.35","a":"25.36"}"#;
        assert_eq!(extract_update_id(p), Some(400_900_217));
    }

    #[test]
    fn update_id_whitespace_after_colon() {
        let p = b"{\"u\": \t 42,\"s\":\"BTCUSDT\"}";
        assert_eq!(extract_update_id(p), Some(42));
    }

    #[test]
    fn update_id_full_range() {
        let p = br#"{"u":18446744073709551615}"#;
        assert_eq!(extract_update_id(p), Some(u64::MAX));
        // One past u64::MAX overflows and must be rejected.
        let p = br#"{"u":18446744073709551616}"#;
        assert_eq!(extract_update_id(p), None);
    }

    #[test]
    fn update_id_zero_parses() {
        assert_eq!(extract_update_id(br#"{"u":0}"#), Some(0));
    }

    #[test]
    fn update_id_missing_or_empty() {
        assert_eq!(extract_update_id(br#"{"s":"BTCUSDT"}"#), None);
        assert_eq!(extract_update_id(br#"{"u":}"#), None);
        assert_eq!(extract_update_id(br#"{"u":"abc"}"#), None);
    }

    #[test]
    fn event_ms_prefers_t() {
        let p = br#"{"u":1,"T":1700000000001,"E":1700000000002}"#;
        assert_eq!(extract_event_ms(p), 1_700_000_000_001);
    }

    #[test]
    fn event_ms_falls_back_to_e() {
        let p = br#"{"u":1,"E":1700000000002}"#;
        assert_eq!(extract_event_ms(p), 1_700_000_000_002);
    }

    #[test]
    fn event_ms_absent_is_zero() {
        assert_eq!(extract_event_ms(br#"{"u":1}"#), 0);
    }
}
