// SPDX-License-Identifier: Apache-2.0

// fedsql - federation layer over independent SQL backends
// Core library

pub mod config;
pub mod engine;
pub mod federation;
pub mod observability;
pub mod script;

pub use fedsql_core::{
    BackendError, BackendErrorKind, BackendId, BackendResult, BackendStore, ColumnInfo,
    ConstraintClass, ConstraintKind, ConstraintRecord, FedError, FedErrorKind, FedResult,
    MemoryCursor, ResultCursor, Row, Value, ViolationKind,
};

pub use config::FederationConfig;
pub use engine::DriverRegistry;
pub use federation::{FedConnection, FederatedCursor};
