#![forbid(unsafe_code)]

use chrono::{SecondsFormat, Utc};

/// Current time as RFC 3339 with millisecond precision and a `Z` suffix.
pub fn now_rfc3339() -> String {
	Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
