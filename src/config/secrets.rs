//! Secret handling utilities.
//!
//! Re-exports secrecy types used for connection strings.

pub use secrecy::{ExposeSecret, SecretString};
