//! nello public API integration module
//!
//! - `client`: `LockApi` seam and the HTTPS client implementing it

pub mod client;
#[cfg(test)]
pub mod fake;

pub use client::{LockApi, NelloClient, Token};
