use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod auth;
pub mod chat;
pub mod health;
pub mod pairing;
pub mod profile;
pub mod session;
pub mod sse;
pub mod validation;
pub mod ws;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

/// Parse an RFC 3339 timestamp as produced by the API.
pub fn parse_timestamp(value: &str) -> Option<SystemTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .map(SystemTime::from)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn timestamps_keep_sub_second_precision() {
        let at = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let formatted = format_system_time(at);
        assert_eq!(formatted, "2023-11-14T22:13:20.123456789Z");
        assert_eq!(parse_timestamp(&formatted), Some(at));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
