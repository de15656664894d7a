#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/adaptivemgmt/datamonster-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! High-level client for the DataMonster service.
//!
//! - [`DataMonster`](datamonster::DataMonster) - the facade all operations go through
//! - [`Company`](company::Company) / [`Datasource`](datasource::Datasource) /
//!   [`DataGroup`](data_group::DataGroup) - domain entities with lazily fetched details
//! - [`DimensionSet`](dimensions::DimensionSet) - streaming view over split metadata
//! - [`decode`] - the binary table decoder producing normalized `DataFrame`s

/// Time aggregation of fetched data.
pub mod aggregation;
/// The company entity.
pub mod company;
/// Uploaded data group entities and schema validation.
pub mod data_group;
/// The facade and lazy listings.
pub mod datamonster;
/// The datasource entity.
pub mod datasource;
/// Binary table payload decoding and normalization.
pub mod decode;
/// Streaming dimension (split) metadata.
pub mod dimensions;

mod detail;

pub use aggregation::{Aggregation, AggregationPeriod};
pub use company::Company;
pub use data_group::{ColumnKind, DataGroup, DataGroupColumn, DataGroupStatus, SchemaDiff};
pub use datamonster::{DataMonster, FromRecord, Listing};
pub use datasource::Datasource;
pub use decode::TableSchema;
pub use dimensions::{Dimension, DimensionSet};

pub use datamonster_client::{DmClient, Payload, Transport};
pub use datamonster_core::{DmError, Filters, Result};
