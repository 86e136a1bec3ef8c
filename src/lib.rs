// sqlbridge - pluggable data-access layer for relational backends
// Core library

pub mod contract;
pub mod drivers;
pub mod dsn;
pub mod engine;
pub mod error;
pub mod registry;
pub mod session;
pub mod stmt;
pub mod tunnel;
pub mod types;
pub mod value;

pub use contract::{Connection, Database, Driver};
pub use engine::Engine;
pub use error::{Error, Result};
pub use registry::DriverRegistry;
pub use session::Session;
pub use types::{
    ColDef, ColType, CondStmt, FetchTableOptions, Operator, SortDirection, SortOption, TableDef,
    TableKind,
};
pub use value::{parse_value, Value, NULL_PATTERN};

/// Builds an engine with every built-in driver registered.
pub fn default_engine() -> Engine {
    let mut registry = DriverRegistry::new();
    drivers::register_all(&mut registry);
    Engine::new(registry)
}
