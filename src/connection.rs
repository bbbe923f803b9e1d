//! Connections to the database under test.
//!
//! The fuzzer only needs two things from a target: run a statement, and run
//! a query returning rows as optional text. [`SqlConnection`] is that seam;
//! the synchronous `postgres` client implements it for PostgreSQL-wire
//! targets and tests plug in in-memory engines.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FuzzError;

/// One result row; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlErrorKind {
    /// The server rejected the statement.
    Database,
    /// The connection is gone or unusable.
    Connection,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SqlError {
    pub kind: SqlErrorKind,
    pub message: String,
    /// SQLSTATE, when the server sent one.
    pub code: Option<String>,
}

impl SqlError {
    pub fn database(message: impl Into<String>) -> Self {
        Self {
            kind: SqlErrorKind::Database,
            message: message.into(),
            code: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: SqlErrorKind::Connection,
            message: message.into(),
            code: None,
        }
    }

    pub fn is_connection(&self) -> bool {
        self.kind == SqlErrorKind::Connection
    }

    pub fn into_fuzz_error(self, sql: &str) -> FuzzError {
        match self.kind {
            SqlErrorKind::Connection => FuzzError::Connection(self.message),
            SqlErrorKind::Database => FuzzError::UnexpectedSql {
                sql: sql.to_string(),
                message: self.message,
            },
        }
    }
}

pub trait SqlConnection: Send {
    fn execute(&mut self, sql: &str) -> Result<(), SqlError>;

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, SqlError>;
}

/// Opens a fresh connection (and database, where supported) per session.
pub trait Connector: Send + Sync {
    fn connect(&self, database: &str) -> Result<Box<dyn SqlConnection>, FuzzError>;
}

// ── Expected errors ────────────────────────────────────────────────────────

/// Errors that mean "the generator produced something the target rejects"
/// rather than a finding.
#[derive(Debug, Clone, Default)]
pub struct ExpectedErrors {
    patterns: Vec<Regex>,
    substrings: Vec<String>,
}

impl ExpectedErrors {
    pub fn from_patterns(patterns: &[String]) -> Result<Self, FuzzError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    FuzzError::InvalidArgument(format!("expected error pattern {p:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            substrings: Vec::new(),
        })
    }

    pub fn with_substring(mut self, text: impl Into<String>) -> Self {
        self.substrings.push(text.into());
        self
    }

    /// Connection failures are never expected.
    pub fn is_expected(&self, error: &SqlError) -> bool {
        if error.is_connection() {
            return false;
        }
        self.substrings.iter().any(|s| error.message.contains(s.as_str()))
            || self.patterns.iter().any(|p| p.is_match(&error.message))
    }
}

// ── Query routing ──────────────────────────────────────────────────────────

/// How oracle queries reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueryRoute {
    #[default]
    Direct,
    /// Materialize through an indexed view with this many columns.
    IndexedView(usize),
}

const INDEXED_VIEW: &str = "dialect_fuzz_indexed";

/// Run `sql` along `route`. View creation failures fall back to the direct
/// query.
pub fn run_query(
    conn: &mut dyn SqlConnection,
    sql: &str,
    route: QueryRoute,
) -> Result<Vec<Row>, SqlError> {
    let width = match route {
        QueryRoute::Direct => return conn.query(sql),
        QueryRoute::IndexedView(width) if width > 0 => width,
        QueryRoute::IndexedView(_) => return conn.query(sql),
    };

    let columns: Vec<String> = (1..=width).map(|i| format!("a{i}")).collect();
    drop_indexed_view(conn)?;
    if let Err(e) = conn.execute(&format!(
        "CREATE VIEW {INDEXED_VIEW}({}) AS {sql}",
        columns.join(", ")
    )) {
        if e.is_connection() {
            return Err(e);
        }
        tracing::debug!(error = %e, "indexed view rejected, querying directly");
        return conn.query(sql);
    }
    if let Err(e) = conn.execute(&format!("CREATE INDEX {INDEXED_VIEW}_idx ON {INDEXED_VIEW}(a1)")) {
        tracing::debug!(error = %e, "index on view rejected");
    }
    let rows = conn.query(&format!("SELECT {} FROM {INDEXED_VIEW}", columns.join(", ")));
    drop_indexed_view(conn)?;
    rows
}

fn drop_indexed_view(conn: &mut dyn SqlConnection) -> Result<(), SqlError> {
    match conn.execute(&format!("DROP VIEW IF EXISTS {INDEXED_VIEW}")) {
        Err(e) if e.is_connection() => Err(e),
        _ => Ok(()),
    }
}

// ── PostgreSQL ─────────────────────────────────────────────────────────────

impl From<postgres::Error> for SqlError {
    fn from(e: postgres::Error) -> Self {
        match e.as_db_error() {
            Some(db) => SqlError {
                kind: SqlErrorKind::Database,
                message: db.message().to_string(),
                code: Some(db.code().code().to_string()),
            },
            None => SqlError::connection(e.to_string()),
        }
    }
}

impl SqlConnection for postgres::Client {
    fn execute(&mut self, sql: &str) -> Result<(), SqlError> {
        self.batch_execute(sql).map_err(SqlError::from)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, SqlError> {
        let messages = self.simple_query(sql)?;
        Ok(messages
            .into_iter()
            .filter_map(|message| match message {
                postgres::SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_string))
                        .collect(),
                ),
                _ => None,
            })
            .collect())
    }
}

/// Creates one database per session on a PostgreSQL server.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    url: String,
    create_database: bool,
}

impl PostgresConnector {
    pub fn new(url: impl Into<String>, create_database: bool) -> Self {
        Self {
            url: url.into(),
            create_database,
        }
    }

    fn base_config(&self) -> Result<postgres::Config, FuzzError> {
        self.url
            .parse::<postgres::Config>()
            .map_err(|e| FuzzError::Config(format!("connection url: {e}")))
    }
}

impl Connector for PostgresConnector {
    fn connect(&self, database: &str) -> Result<Box<dyn SqlConnection>, FuzzError> {
        let config = self.base_config()?;
        if !self.create_database {
            let client = config
                .connect(postgres::NoTls)
                .map_err(|e| FuzzError::Connection(e.to_string()))?;
            return Ok(Box::new(client));
        }

        let mut admin = config
            .connect(postgres::NoTls)
            .map_err(|e| FuzzError::Connection(e.to_string()))?;
        for sql in [
            format!("DROP DATABASE IF EXISTS {database}"),
            format!("CREATE DATABASE {database}"),
        ] {
            admin
                .batch_execute(&sql)
                .map_err(|e| SqlError::from(e).into_fuzz_error(&sql))?;
        }
        drop(admin);

        let mut session = config;
        session.dbname(database);
        let client = session
            .connect(postgres::NoTls)
            .map_err(|e| FuzzError::Connection(e.to_string()))?;
        tracing::debug!(database, "created session database");
        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        executed: Vec<String>,
        reject_views: bool,
    }

    impl SqlConnection for Recorder {
        fn execute(&mut self, sql: &str) -> Result<(), SqlError> {
            self.executed.push(sql.to_string());
            if self.reject_views && sql.starts_with("CREATE VIEW") {
                return Err(SqlError::database("views not supported"));
            }
            Ok(())
        }

        fn query(&mut self, sql: &str) -> Result<Vec<Row>, SqlError> {
            self.executed.push(sql.to_string());
            Ok(vec![vec![Some("1".into()), None]])
        }
    }

    #[test]
    fn test_expected_errors_match_patterns() {
        let expected = ExpectedErrors::from_patterns(&["division by zero".into(), "^value .* out of range$".into()])
            .unwrap()
            .with_substring("does not exist");
        assert!(expected.is_expected(&SqlError::database("division by zero")));
        assert!(expected.is_expected(&SqlError::database("value 99 out of range")));
        assert!(expected.is_expected(&SqlError::database("relation t9 does not exist")));
        assert!(!expected.is_expected(&SqlError::database("syntax error")));
    }

    #[test]
    fn test_connection_errors_never_expected() {
        let expected = ExpectedErrors::from_patterns(&[".*".into()]).unwrap();
        assert!(!expected.is_expected(&SqlError::connection("server closed the connection")));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let err = ExpectedErrors::from_patterns(&["(".into()]).unwrap_err();
        assert_eq!(err.kind(), crate::error::FuzzErrorKind::Data);
    }

    #[test]
    fn test_indexed_view_route() {
        let mut conn = Recorder::default();
        let rows = run_query(&mut conn, "SELECT t0.c0, t0.c1 FROM t0", QueryRoute::IndexedView(2)).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(conn.executed.iter().any(|s| s == "CREATE VIEW dialect_fuzz_indexed(a1, a2) AS SELECT t0.c0, t0.c1 FROM t0"));
        assert!(conn.executed.contains(&"SELECT a1, a2 FROM dialect_fuzz_indexed".to_string()));
        assert_eq!(conn.executed.last().unwrap(), "DROP VIEW IF EXISTS dialect_fuzz_indexed");
    }

    #[test]
    fn test_indexed_view_falls_back() {
        let mut conn = Recorder {
            reject_views: true,
            ..Default::default()
        };
        run_query(&mut conn, "SELECT 1", QueryRoute::IndexedView(1)).unwrap();
        assert_eq!(conn.executed.last().unwrap(), "SELECT 1");
    }

    #[test]
    fn test_sql_error_conversion() {
        let err = SqlError::database("boom").into_fuzz_error("SELECT 1");
        assert_eq!(err.kind(), crate::error::FuzzErrorKind::Sql);
        assert!(!err.is_retryable());
        assert!(SqlError::connection("gone").into_fuzz_error("x").is_retryable());
    }
}
