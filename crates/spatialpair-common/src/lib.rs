// ============================================
// File: crates/spatialpair-common/src/lib.rs
// ============================================
//! # SpatialPair Common - Shared Utilities Library
//!
//! ## Creation Reason
//! Types every other SpatialPair crate needs: who the remote party is,
//! how timeouts are reported, and the base error type.
//!
//! ## Main Functionality
//! - [`types`]: `RemoteId`, `RemoteParty`
//! - [`time`]: `millis`
//! - [`error`]: `CommonError` and result alias
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               spatialpair-node                      │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │  spatialpair-core    spatialpair-transport          │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │           spatialpair-common  ◄── You are here      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Leaf crate: no internal dependencies, keep external ones minimal
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

pub use error::{CommonError, Result};
pub use time::millis;
pub use types::{RemoteId, RemoteParty};
