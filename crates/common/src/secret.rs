//! Secret types for integration credentials.
//!
//! Re-exports [`secrecy`] so API keys for external services (mail delivery,
//! spreadsheet sync, error reporting) are redacted in `Debug` output and
//! zeroized on drop. The monitoring layer only ever checks whether a secret
//! is *present*; it never reads the value beyond that.
//!
//! ```rust
//! use common::secret::{is_configured, SecretString};
//!
//! let key = Some(SecretString::from("SG.abc"));
//! assert!(is_configured(key.as_ref()));
//! assert!(!is_configured(None));
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// True when the secret exists and is not blank.
#[must_use]
pub fn is_configured(secret: Option<&SecretString>) -> bool {
    secret.is_some_and(|s| !s.expose_secret().trim().is_empty())
}
