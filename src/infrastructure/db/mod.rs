pub mod sqlite;

use crate::domain::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

pub use sqlite::{SqliteConnectionProvider, SqlxExecutor};

/// Rows returned by an executed query, one JSON object per row
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Runs read-only SQL against the records database
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn run(&self, sql: &str) -> Result<QueryRows>;
}

/// Resolves the person ids a caller may see. Empty means nothing.
#[async_trait]
pub trait ScopeResolver: Send + Sync {
    async fn resolve_scope(&self, caller_id: i64) -> Result<Vec<i64>>;
}

/// Explicit connection lifecycle for the executors
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Connection: Send;

    async fn acquire(&self) -> Result<Self::Connection>;

    async fn release(&self, connection: Self::Connection);
}
