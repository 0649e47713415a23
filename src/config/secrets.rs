//! Secret handling.
//!
//! Re-exports the secrecy types the binary needs to hand the database URL to
//! sqlx without ever formatting it.

pub use secrecy::{ExposeSecret, SecretString};
