//! Wall-clock helpers. Monotonic arithmetic everywhere else uses
//! `std::time::Instant` directly.

use chrono::{Local, Utc};

/// Milliseconds since the Unix epoch, UTC. Arrival stamps compare against
/// the exchange's `T`/`E` fields, which are epoch milliseconds.
#[inline(always)]
pub fn epoch_ms_utc() -> i64 {
    Utc::now().timestamp_millis()
}

/// Compact local timestamp for filenames: `YYYYMMDD_HHMMSS`.
pub fn file_stamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_ms_is_recent() {
        // 2020-01-01 as a floor; catches unit mixups (seconds vs millis).
        assert!(epoch_ms_utc() > 1_577_836_800_000);
    }

    #[test]
    fn file_stamp_shape() {
        let s = file_stamp();
        assert_eq!(s.len(), 15);
        assert_eq!(s.as_bytes()[8], b'_');
        assert!(s[..8].bytes().all(|b| b.is_ascii_digit()));
        assert!(s[9..].bytes().all(|b| b.is_ascii_digit()));
    }
}
