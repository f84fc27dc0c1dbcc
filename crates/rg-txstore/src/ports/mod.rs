//! Capability traits the store consumes.

pub mod outbound;
