//! Session authentication
//!
//! Inbound connections authenticate either with an HTTP Basic credential
//! header on the upgrade request or with a first-message
//! `{"type": "auth", "username": ..., "password": ...}` handshake. An empty
//! configured password disables authentication entirely: every connection is
//! accepted, credentials or not. That permissive default is intentional and
//! matches the configuration surface, but leaves the control channel open on
//! whatever interface the server is bound to.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::time::Duration;

/// Realm announced in HTTP Basic challenges.
pub const AUTH_REALM: &str = "Signal Remote";

/// Bound on waiting for the first-message auth handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Authentication failures. Each maps to a distinguishable close reason; the
/// connection is closed after a single failed attempt, no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    Required,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Authentication timeout")]
    Timeout,
}

impl AuthError {
    /// Close-frame reason text for this failure.
    pub fn close_reason(&self) -> &'static str {
        match self {
            AuthError::Required => "Authentication required",
            AuthError::InvalidCredentials => "Invalid credentials",
            AuthError::Timeout => "Authentication timeout",
        }
    }
}

/// Validate an HTTP Basic Authorization header value.
///
/// Returns true when authentication is disabled (empty configured password)
/// or the decoded `user:pass` pair matches.
pub fn check_basic_auth(auth_header: Option<&str>, username: &str, password: &str) -> bool {
    if password.is_empty() {
        return true;
    }

    let Some(header) = auth_header else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };

    let Ok(decoded) = BASE64.decode(encoded.trim()) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    match credentials.split_once(':') {
        Some((user, pass)) => user == username && pass == password,
        None => false,
    }
}

/// Build a `Basic ...` Authorization header value for outbound handshakes.
pub fn basic_auth_header(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", username, password))
    )
}

/// Validate a first-message auth handshake.
///
/// The handshake is raw JSON, not a protocol `Message`: "auth" is outside the
/// closed message-type set and never reaches the dispatcher.
pub fn check_handshake_message(raw: &str, username: &str, password: &str) -> Result<(), AuthError> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Err(AuthError::Required);
    };
    if value.get("type").and_then(|v| v.as_str()) != Some("auth") {
        return Err(AuthError::Required);
    }

    let provided_user = value.get("username").and_then(|v| v.as_str()).unwrap_or("");
    let provided_pass = value.get("password").and_then(|v| v.as_str()).unwrap_or("");
    if provided_user == username && provided_pass == password {
        Ok(())
    } else {
        Err(AuthError::InvalidCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_password_disables_auth() {
        assert!(check_basic_auth(None, "admin", ""));
        assert!(check_basic_auth(Some("Basic garbage"), "admin", ""));
        assert!(check_basic_auth(Some(""), "", ""));
    }

    #[test]
    fn test_valid_header_accepted() {
        let header = basic_auth_header("admin", "secret");
        assert!(check_basic_auth(Some(&header), "admin", "secret"));
    }

    #[test]
    fn test_mismatched_credentials_rejected() {
        let header = basic_auth_header("admin", "wrong");
        assert!(!check_basic_auth(Some(&header), "admin", "secret"));

        let header = basic_auth_header("intruder", "secret");
        assert!(!check_basic_auth(Some(&header), "admin", "secret"));
    }

    #[test]
    fn test_missing_or_malformed_header_rejected() {
        assert!(!check_basic_auth(None, "admin", "secret"));
        assert!(!check_basic_auth(Some("Bearer token"), "admin", "secret"));
        assert!(!check_basic_auth(Some("Basic ???"), "admin", "secret"));
        assert!(!check_basic_auth(Some("Basic bm9jb2xvbg=="), "admin", "secret")); // "nocolon"
    }

    #[test]
    fn test_password_containing_colon() {
        let header = basic_auth_header("admin", "se:cr:et");
        assert!(check_basic_auth(Some(&header), "admin", "se:cr:et"));
    }

    #[test]
    fn test_handshake_accepted() {
        let raw = r#"{"type": "auth", "username": "admin", "password": "secret"}"#;
        assert!(check_handshake_message(raw, "admin", "secret").is_ok());
    }

    #[test]
    fn test_handshake_wrong_password() {
        let raw = r#"{"type": "auth", "username": "admin", "password": "nope"}"#;
        assert_eq!(
            check_handshake_message(raw, "admin", "secret"),
            Err(AuthError::InvalidCredentials)
        );
    }

    #[test]
    fn test_non_auth_first_message_requires_auth() {
        let raw = r#"{"type": "get_state", "payload": {}}"#;
        assert_eq!(
            check_handshake_message(raw, "admin", "secret"),
            Err(AuthError::Required)
        );
        assert_eq!(
            check_handshake_message("not json", "admin", "secret"),
            Err(AuthError::Required)
        );
    }
}
