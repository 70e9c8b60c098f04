// SPDX-License-Identifier: Apache-2.0

//! Federation layer
//!
//! Presents N independent SQL backends as one logical database. Tables are
//! either replicated on every backend or horizontally partitioned by value
//! ranges of one column, with generated CHECK constraints deciding which
//! backend owns a row.

pub mod catalog;
pub mod classifier;
pub mod connection;
pub mod controller;
pub mod cursor;
pub mod normalizer;
pub mod partition;
pub mod types;

pub use catalog::{BackendCatalog, PartitionCatalog, PartitionConstraint};
pub use classifier::{QueryClassifier, SqlClassifier};
pub use connection::{ConnectionOptions, FedConnection};
pub use controller::FederalController;
pub use cursor::FederatedCursor;
pub use normalizer::{normalize, NormalizedQuery};
pub use partition::{HorizontalClause, PartitionStatement};
pub use types::{BackendSet, ClassifiedQuery, QueryKind, SessionState, StatementId};
