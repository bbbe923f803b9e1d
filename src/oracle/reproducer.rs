//! Replayable bug reproducers.
//!
//! A reproducer is the list of setup statements that succeeded in the
//! failing session plus the comparison that disagreed. It is written next to
//! the logs as JSON (for `reproduce`) and as a plain SQL script.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::connection::{QueryRoute, SqlConnection};
use crate::error::FuzzError;
use crate::hash::statements_id;

use super::{Comparison, OracleKind, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reproducer {
    pub oracle: OracleKind,
    pub setup: Vec<String>,
    pub comparison: Comparison,
    #[serde(default)]
    pub route: QueryRoute,
}

impl Reproducer {
    /// Re-run the comparison against the current database state.
    ///
    /// Returns `true` when the mismatch still shows. A query that now fails
    /// counts as not reproduced.
    pub fn replay(&self, conn: &mut dyn SqlConnection) -> Result<bool, FuzzError> {
        match self.comparison.evaluate(conn, self.route) {
            Ok(Verdict::Mismatch(message)) => {
                tracing::info!(oracle = %self.oracle, %message, "reproduced");
                Ok(true)
            }
            Ok(Verdict::Consistent) => Ok(false),
            Err(e) if e.is_connection() => Err(e.into_fuzz_error(self.comparison.primary_query())),
            Err(e) => {
                tracing::warn!(error = %e, "reproducer query failed");
                Ok(false)
            }
        }
    }

    /// Run the setup statements on an empty database, then [`replay`].
    ///
    /// [`replay`]: Reproducer::replay
    pub fn replay_from_scratch(&self, conn: &mut dyn SqlConnection) -> Result<bool, FuzzError> {
        for sql in &self.setup {
            if let Err(e) = conn.execute(sql) {
                if e.is_connection() {
                    return Err(e.into_fuzz_error(sql));
                }
                tracing::warn!(sql = %sql, error = %e, "setup statement failed on replay");
            }
        }
        self.replay(conn)
    }

    /// Stable id over the compared queries.
    pub fn id(&self) -> String {
        statements_id(&self.comparison.queries())
    }

    pub fn to_sql_script(&self) -> String {
        let mut script = String::new();
        for sql in &self.setup {
            script.push_str(sql);
            script.push_str(";\n");
        }
        script.push_str(&format!("-- oracle: {}\n", self.oracle));
        for sql in self.comparison.queries() {
            script.push_str(&sql);
            script.push_str(";\n");
        }
        script
    }

    pub fn to_json(&self) -> Result<String, FuzzError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FuzzError::InternalError(format!("JSON serialization failed: {e}")))
    }

    pub fn from_json(text: &str) -> Result<Self, FuzzError> {
        serde_json::from_str(text)
            .map_err(|e| FuzzError::MalformedConfigRow(format!("reproducer: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, FuzzError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Write `<id>.json` and `<id>.sql` under `dir`, returning the JSON path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, FuzzError> {
        std::fs::create_dir_all(dir)?;
        let id = self.id();
        let json = dir.join(format!("{id}.json"));
        std::fs::write(&json, self.to_json()?)?;
        std::fs::write(dir.join(format!("{id}.sql")), self.to_sql_script())?;
        Ok(json)
    }
}
