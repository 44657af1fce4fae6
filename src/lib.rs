pub mod account;
pub mod acme;
pub mod bundle;
pub mod cert;
pub mod challenge_solver;
pub mod cli;
pub mod config;
pub mod error;
pub mod expiry;
pub mod issuer;
pub mod renew;
pub mod time;

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

/// Printed once when the daemon starts.
pub const STARTUP_BANNER: &str = "Let's Encrypt client is starting...";
