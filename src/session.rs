//! Session state carried through every engine call.
//!
//! A session is immutable; each state transition derives a new value and the
//! prior one stays valid for whatever still references it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::contract::{Connection, Database};

/// One engine session: at most one live connection, at most one selected
/// database, and an optional deadline.
#[derive(Clone, Default)]
pub struct Session {
    connection: Option<Arc<dyn Connection>>,
    database: Option<Arc<dyn Database>>,
    deadline: Option<Instant>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a session holding `connection`, dropping any selected
    /// database.
    pub fn with_connection(&self, connection: Arc<dyn Connection>) -> Self {
        Self {
            connection: Some(connection),
            database: None,
            deadline: self.deadline,
        }
    }

    /// Derives a session with `database` selected on the current connection.
    pub fn with_database(&self, database: Arc<dyn Database>) -> Self {
        Self {
            connection: self.connection.clone(),
            database: Some(database),
            deadline: self.deadline,
        }
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            connection: self.connection.clone(),
            database: self.database.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.clone()
    }

    pub fn database(&self) -> Option<Arc<dyn Database>> {
        self.database.clone()
    }

    /// Time remaining before the deadline, zero once it has passed.
    pub fn time_left(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
