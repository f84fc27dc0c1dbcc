//! # Shared Types Crate
//!
//! Cross-crate domain vocabulary for the relay gateway: transaction hashes,
//! short numeric aliases, network identifiers, and policy flags.
//!
//! Every type here is plain data. Behavior lives in the subsystem crates;
//! this crate only carries the flag algebra that all of them share.

pub mod entities;

pub use entities::*;
