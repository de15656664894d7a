#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/adaptivemgmt/datamonster-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core types shared by the DataMonster client crates.
//!
//! - [`DmError`](error::DmError) - the error taxonomy for every client operation
//! - [`Filters`](filters::Filters) - validated filter maps for dimension and raw-data
//!   queries

/// Error types for client operations.
pub mod error;
/// Validated query filters.
pub mod filters;

pub use error::{DmError, Result};
pub use filters::Filters;
