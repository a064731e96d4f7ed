use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::{Client, Response};
use serde_json::Value;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 6;
const ERROR_PREVIEW_CHARS: usize = 180;

pub static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(concat!("arena-campaign/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .build()
        .expect("failed to build HTTP client")
});

/// Splits a response into its body, or a readable failure line for non-2xx.
pub async fn read_body(response: Response) -> Result<String, HttpFailure> {
    let status = response.status();
    let body = response.text().await.map_err(HttpFailure::Transport)?;
    if !status.is_success() {
        return Err(HttpFailure::Status {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }
    Ok(body)
}

#[derive(Debug)]
pub enum HttpFailure {
    Transport(reqwest::Error),
    Status { status: u16, message: String },
}

/// Pulls a human-readable message out of a JSON error body, falling back to
/// a truncated preview of the raw text.
pub fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for path in ["message", "error.message", "error", "msg", "details"] {
            if let Some(text) = string_at(&value, path) {
                return text;
            }
        }
    }
    body.chars().take(ERROR_PREVIEW_CHARS).collect()
}

fn string_at(value: &Value, path: &str) -> Option<String> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    match current {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::http::{error_message, escape_html};

    #[test]
    fn extracts_messages_from_common_error_shapes() {
        assert_eq!(
            error_message(r#"{"message":"duplicate key value","code":"23505"}"#),
            "duplicate key value"
        );
        assert_eq!(
            error_message(r#"{"error":{"message":"Your card was declined."}}"#),
            "Your card was declined."
        );
        assert_eq!(error_message(r#"{"error":"invalid api key"}"#), "invalid api key");
    }

    #[test]
    fn falls_back_to_truncated_body() {
        let body = "x".repeat(500);
        assert_eq!(error_message(&body).len(), 180);
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn escapes_markup_in_user_supplied_text() {
        assert_eq!(
            escape_html("<b>Tom & \"Jo\"</b>"),
            "&lt;b&gt;Tom &amp; &quot;Jo&quot;&lt;/b&gt;"
        );
    }
}
