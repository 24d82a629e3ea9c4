//! # Rollcall Common
//!
//! Shared types, errors, and constants used across Rollcall components.
//!
//! ## Modules
//! - `types` - Control-plane and roster data structures (NodeInfo, NodeStatus, etc.)
//! - `fields` - Typed field maps carried by membership rows and sync records
//! - `error` - Common error taxonomy
//! - `constants` - Shared configuration constants and key names

pub mod constants;
pub mod error;
pub mod fields;
pub mod types;

pub use error::{RollcallError, RollcallResult};
pub use fields::{FieldMap, FieldValue};
pub use types::*;
