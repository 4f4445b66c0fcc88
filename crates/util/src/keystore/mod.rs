//! Credential storage backends.

mod credentials;

pub use credentials::*;
