//! Extraction of the upstream's suggested retry wait from 429 responses.
//!
//! The upstream phrases its hint inside the error message
//! (`"You reached your request limit. Wait 12 seconds."`) and, on some
//! plans, also in a counter-reset header.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

use super::json::parse_json_with_context;

static WAIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)wait\s+(\d+)\s*(?:seconds?|secs?|s)\b").expect("valid wait regex")
});

/// Headers consulted, in order, when the body carries no hint.
const WAIT_HEADERS: [&str; 2] = ["retry-after", "x-requestcounter-reset"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: Option<String>,
}

/// Find a "Wait N seconds" hint in free text.
pub fn wait_from_message(message: &str) -> Option<Duration> {
    WAIT_PATTERN
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// The human-readable message from an upstream error body, falling back to the raw body.
pub fn error_message(body: &str) -> String {
    match parse_json_with_context::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ => body.trim().chars().take(200).collect(),
    }
}

/// Suggested wait for a 429 response: the body message wins, headers are the fallback.
pub fn suggested_wait(message: &str, headers: &http::HeaderMap) -> Option<Duration> {
    wait_from_message(message).or_else(|| {
        WAIT_HEADERS.iter().find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};

    #[test]
    fn parses_wait_hint_from_message() {
        assert_eq!(
            wait_from_message("You reached your request limit. Wait 12 seconds."),
            Some(Duration::from_secs(12))
        );
        assert_eq!(wait_from_message("wait 1 second"), Some(Duration::from_secs(1)));
        assert_eq!(wait_from_message("Too many requests"), None);
    }

    #[test]
    fn message_is_extracted_from_json_body() {
        let body = r#"{"message": "You reached your request limit. Wait 40 seconds.", "errorCode": 429}"#;
        assert_eq!(
            error_message(body),
            "You reached your request limit. Wait 40 seconds."
        );
        assert_eq!(error_message("  plain text  "), "plain text");
    }

    #[test]
    fn header_is_used_when_message_has_no_hint() {
        let mut headers = HeaderMap::new();
        headers.insert("x-requestcounter-reset", HeaderValue::from_static("33"));
        assert_eq!(
            suggested_wait("Too many requests", &headers),
            Some(Duration::from_secs(33))
        );
        assert_eq!(
            suggested_wait("Wait 7 seconds", &headers),
            Some(Duration::from_secs(7))
        );
        assert_eq!(suggested_wait("nope", &HeaderMap::new()), None);
    }
}
