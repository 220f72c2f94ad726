use super::{ConnectionProvider, QueryExecutor, QueryRows, ScopeResolver};
use crate::domain::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{
    pool::PoolConnection,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Column, Row, Sqlite,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Children of a guardian: personne → parent → parenteleve → eleve → personne
pub const DEFAULT_GUARDIAN_QUERY: &str = "SELECT DISTINCT pe.id AS id_enfant
FROM personne p
JOIN parent pa ON p.id = pa.Personne
JOIN parenteleve pev ON pa.id = pev.Parent
JOIN eleve e ON pev.Eleve = e.id
JOIN personne pe ON e.IdPersonne = pe.id
WHERE p.id = ?";

/// SQLite pool exposed through explicit acquire/release
pub struct SqliteConnectionProvider {
    pool: SqlitePool,
}

impl SqliteConnectionProvider {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to parse connection string: {}", e))
            })?
            .create_if_missing(true);

        // Every in-memory connection is its own database, so keep exactly one alive
        let in_memory = database_url.contains(":memory:");
        let max_connections = if in_memory { 1 } else { max_connections.max(1) };

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {}", e)))?;

        info!(max_connections, "SQLite pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        info!("Closing SQLite pool");
        self.pool.close().await;
    }
}

#[async_trait]
impl ConnectionProvider for SqliteConnectionProvider {
    type Connection = PoolConnection<Sqlite>;

    async fn acquire(&self) -> Result<Self::Connection> {
        self.pool
            .acquire()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to acquire connection: {}", e)))
    }

    async fn release(&self, connection: Self::Connection) {
        // Dropping a pooled connection hands it back to the pool
        drop(connection);
        debug!(idle = self.pool.num_idle(), "Connection released");
    }
}

/// Query executor and scope resolver over one connection provider
pub struct SqlxExecutor {
    provider: Arc<SqliteConnectionProvider>,
    guardian_query: String,
}

impl SqlxExecutor {
    pub fn new(provider: Arc<SqliteConnectionProvider>) -> Self {
        Self {
            provider,
            guardian_query: DEFAULT_GUARDIAN_QUERY.to_string(),
        }
    }

    /// Replace the guardian query; it must select person ids and take the caller id as its only bind
    pub fn with_guardian_query(mut self, query: impl Into<String>) -> Self {
        self.guardian_query = query.into();
        self
    }

    fn extract_column_value(row: &SqliteRow, index: usize) -> Value {
        // Try different types in order of likelihood
        if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            return v
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            return v.map(Value::String).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
            return v
                .map(|dt| Value::String(dt.to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
            return v
                .map(|bytes| Value::String(hex::encode(bytes)))
                .unwrap_or(Value::Null);
        }

        // Default to null for unsupported types
        Value::Null
    }

    fn rows_to_json(rows: &[SqliteRow]) -> QueryRows {
        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = rows
            .iter()
            .map(|row| {
                let mut object = Map::new();
                for (index, column) in row.columns().iter().enumerate() {
                    object.insert(column.name().to_string(), Self::extract_column_value(row, index));
                }
                object
            })
            .collect();

        QueryRows { columns, rows }
    }
}

#[async_trait]
impl QueryExecutor for SqlxExecutor {
    async fn run(&self, sql: &str) -> Result<QueryRows> {
        let mut conn = self.provider.acquire().await?;
        let fetched = sqlx::query(sql).fetch_all(&mut *conn).await;
        self.provider.release(conn).await;

        let rows = fetched.map_err(|e| AppError::DatabaseError(e.to_string()))?;
        debug!(rows = rows.len(), "Query executed");
        Ok(Self::rows_to_json(&rows))
    }
}

#[async_trait]
impl ScopeResolver for SqlxExecutor {
    async fn resolve_scope(&self, caller_id: i64) -> Result<Vec<i64>> {
        let mut conn = self.provider.acquire().await?;
        let fetched = sqlx::query(&self.guardian_query)
            .bind(caller_id)
            .fetch_all(&mut *conn)
            .await;
        self.provider.release(conn).await;

        let rows = fetched.map_err(|e| {
            AppError::DatabaseError(format!("Failed to resolve scope for {}: {}", caller_id, e))
        })?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            match row.try_get::<i64, _>(0) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(caller_id, "Skipping non-integer scope id: {}", e),
            }
        }
        info!(caller_id, children = ids.len(), "Resolved caller scope");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_executor() -> SqlxExecutor {
        let provider = Arc::new(SqliteConnectionProvider::connect("sqlite::memory:", 4).await.unwrap());
        for statement in [
            "CREATE TABLE personne (id INTEGER PRIMARY KEY, NomFr TEXT, PrenomFr TEXT)",
            "CREATE TABLE parent (id INTEGER PRIMARY KEY, Personne INTEGER)",
            "CREATE TABLE eleve (id INTEGER PRIMARY KEY, IdPersonne INTEGER)",
            "CREATE TABLE parenteleve (id INTEGER PRIMARY KEY, Parent INTEGER, Eleve INTEGER)",
            "CREATE TABLE note (id INTEGER PRIMARY KEY, eleve INTEGER, valeur REAL, codeperiexam INTEGER)",
            "INSERT INTO personne VALUES (1, 'BENALI', 'SAMI'), (101, 'BENALI', 'ADAM'), (102, 'BENALI', 'LINA'), (201, 'TRABELSI', 'YASMINE')",
            "INSERT INTO parent VALUES (10, 1)",
            "INSERT INTO eleve VALUES (1001, 101), (1002, 102), (1003, 201)",
            "INSERT INTO parenteleve VALUES (1, 10, 1001), (2, 10, 1002)",
            "INSERT INTO note VALUES (1, 1001, 14.5, 31), (2, 1001, NULL, 32), (3, 1003, 9.0, 31)",
        ] {
            sqlx::query(statement).execute(provider.pool()).await.unwrap();
        }
        SqlxExecutor::new(provider)
    }

    #[tokio::test]
    async fn test_resolve_scope_follows_guardian_links() {
        let executor = seeded_executor().await;
        let mut ids = executor.resolve_scope(1).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![101, 102]);
        assert!(executor.resolve_scope(201).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_converts_rows_to_json() {
        let executor = seeded_executor().await;
        let rows = executor
            .run(
                "SELECT n.valeur, n.codeperiexam, p.NomFr FROM note n \
                 JOIN eleve e ON e.id = n.eleve JOIN personne p ON p.id = e.IdPersonne \
                 WHERE e.IdPersonne IN (101) ORDER BY n.id",
            )
            .await
            .unwrap();

        assert_eq!(rows.columns, vec!["valeur", "codeperiexam", "NomFr"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows[0]["valeur"], serde_json::json!(14.5));
        assert_eq!(rows.rows[0]["codeperiexam"], serde_json::json!(31));
        assert_eq!(rows.rows[0]["NomFr"], serde_json::json!("BENALI"));
        assert_eq!(rows.rows[1]["valeur"], Value::Null);
    }

    #[tokio::test]
    async fn test_run_reports_sql_errors() {
        let executor = seeded_executor().await;
        match executor.run("SELECT missing_column FROM note").await {
            Err(AppError::DatabaseError(msg)) => assert!(msg.contains("missing_column")),
            other => panic!("unexpected result: {:?}", other),
        }
        // The connection went back to the pool
        assert!(executor.run("SELECT COUNT(*) AS total FROM note").await.is_ok());
    }
}
