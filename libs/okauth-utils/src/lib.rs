#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Small building blocks shared by the okauth crates.

#[cfg(feature = "serde")]
pub mod humantime_serde;
mod secret_string;

pub use secret_string::SecretString;
