// SPDX-License-Identifier: Apache-2.0

//! fedsql-core: backend store abstraction shared by the federation layer and its drivers

pub mod cursor;
pub mod error;
pub mod traits;
pub mod types;

pub use cursor::MemoryCursor;
pub use error::{
    BackendError, BackendErrorKind, BackendResult, ConstraintClass, FedError, FedErrorKind,
    FedResult, ViolationKind,
};
pub use traits::{BackendStore, ResultCursor};
pub use types::{BackendId, ColumnInfo, ConstraintKind, ConstraintRecord, Row, Value};
