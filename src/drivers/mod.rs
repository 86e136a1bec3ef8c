//! Backend driver implementations.

use std::sync::Arc;

use crate::registry::DriverRegistry;

pub mod mysql;
pub mod mysql_ssh;
pub mod sqlite;

/// Registers every built-in driver. Called once at startup, before any
/// connection attempt.
pub fn register_all(registry: &mut DriverRegistry) {
    registry.register("mysql", Arc::new(mysql::MySqlDriver::new()));
    registry.register("mysql+ssh", Arc::new(mysql_ssh::MySqlSshDriver::new()));
    registry.register("sqlite", Arc::new(sqlite::SqliteDriver::new()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtin_schemes_resolve() {
        let mut registry = DriverRegistry::new();
        register_all(&mut registry);

        assert_eq!(registry.len(), 3);
        assert!(registry.resolve("mysql://localhost:3306").is_ok());
        assert!(registry
            .resolve("mysql+ssh://localhost:3306,jump;22;SSH_AUTH_SOCK")
            .is_ok());
        assert!(registry.resolve("sqlite://app.db").is_ok());
    }
}
