#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Small helpers shared by the remote repository crates.

pub mod humantime_serde;
mod secret_string;

pub use secret_string::SecretString;
