//! A wrapper for credential material that never shows up in `Display` or
//! `Debug` output, so it can sit inside structs that get logged.
//!
//! The mask has a fixed width, which keeps the secret's length out of logs too.
//!
//! # Examples
//! ```
//! use secret_string::SecretString;
//! let token = SecretString::new("FwoGZXIvYXdzEXAMPLE");
//! assert_eq!(format!("{}", token), "********");
//! assert_eq!(format!("{:?}", token), "SecretString(********)");
//! assert_eq!(token.value(), "FwoGZXIvYXdzEXAMPLE");
//! ```

#![deny(warnings)]
#![deny(clippy::todo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::fmt;

const MASK: &str = "********";

#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        SecretString(value.into())
    }

    /// Returns the underlying value. Only hand this to the SDK.
    pub fn value(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        SecretString::new(value)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        SecretString(value)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString({})", MASK)
    }
}
