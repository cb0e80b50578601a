//! # castv2-cli
//!
//! Library half of `castctl`: the layered TOML configuration shared by
//! the binary and its tests.

pub mod config;
