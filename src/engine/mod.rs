// SPDX-License-Identifier: Apache-2.0

// Backend engine module
// Driver registry and the concrete backend store implementations

pub mod drivers;
pub mod registry;

pub use drivers::sqlite::{SqliteBackend, SqliteConnector};
pub use registry::{BackendConnector, DriverRegistry};
