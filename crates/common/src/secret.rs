//! Secret types for credentials that must never reach a log line.
//!
//! Re-exports the [`secrecy`] types used for the store URL (which may embed a
//! password) and the chatroom service bearer token. `SecretString` redacts
//! itself in `Debug`, so config structs that derive or hand-write `Debug`
//! stay safe to print.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let token = SecretString::from("bearer-value");
//! assert!(!format!("{token:?}").contains("bearer-value"));
//! assert_eq!(token.expose_secret(), "bearer-value");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("redis://:hunter2@localhost:6379");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_deserialized_token_stays_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct ChatroomCredentials {
            endpoint: String,
            token: SecretString,
        }

        let json = r#"{"endpoint": "https://chat.local/rooms", "token": "tok-123"}"#;
        let creds: ChatroomCredentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.token.expose_secret(), "tok-123");

        let debug = format!("{creds:?}");
        assert!(debug.contains("https://chat.local/rooms"));
        assert!(!debug.contains("tok-123"));
    }
}
