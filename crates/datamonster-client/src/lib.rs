#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/adaptivemgmt/datamonster-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Signed transport and pagination for the DataMonster REST API.
//!
//! - [`DmClient`](client::DmClient) - authenticated HTTP session
//! - [`Transport`](transport::Transport) - the seam higher layers call through
//! - [`PagedRecords`](pagination::PagedRecords) - lazy cursor over list endpoints

/// The signed reqwest-backed session.
pub mod client;
/// Lazy traversal of paginated list endpoints.
pub mod pagination;
/// Request signature computation.
pub mod sign;
/// The transport trait and payload classification.
pub mod transport;

pub use client::DmClient;
pub use pagination::{Page, PagedRecords, Pagination};
pub use transport::{Payload, Transport};
