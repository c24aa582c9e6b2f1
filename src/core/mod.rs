//! Core transparent proxy firewall functionality
//!
//! - [`rules`]: Handler, listener and rule specification types
//! - [`builder`]: Ordered rule generation for apply and revert
//! - [`executor`]: Running one rule through the external rule tool
//! - [`controller`]: Serialized apply/revert/status entry points
//! - [`verify`]: Rule presence checks
//! - [`error`]: Error and outcome types

pub mod builder;
pub mod controller;
pub mod error;
pub mod executor;
pub mod rules;
pub mod verify;

#[cfg(test)]
pub mod test_helpers;
