//! Result comparison shared by the oracles and reproducer replay.
//!
//! Rows are compared as multisets of canonical strings: NULL becomes a
//! sentinel that cannot occur in text, trailing fractional zeros are
//! stripped so `1.0` and `1` agree, and columns are joined with a record
//! separator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::connection::{QueryRoute, Row, SqlConnection, SqlError, run_query};

const NULL_MARKER: &str = "\x00NULL\x00";
const COLUMN_SEPARATOR: char = '\x1E';
/// Sample rows shown in a mismatch message.
const DIFF_SAMPLE: usize = 5;

pub fn canonical_value(value: &Option<String>) -> String {
    let Some(text) = value else {
        return NULL_MARKER.to_string();
    };
    let text = text.trim();
    let text = match text.rfind('.') {
        Some(dot) if dot + 1 < text.len() && text[dot + 1..].bytes().all(|b| b == b'0') => {
            &text[..dot]
        }
        _ => text,
    };
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

pub fn canonical_row(row: &Row) -> String {
    let mut out = String::new();
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            out.push(COLUMN_SEPARATOR);
        }
        out.push_str(&canonical_value(value));
    }
    out
}

fn multiset(rows: &[Row]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(canonical_row(row)).or_insert(0) += 1;
    }
    counts
}

/// Rows in one multiset but not the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDiff {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl RowDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Compare `expected` against `actual` as multisets.
pub fn multiset_diff(expected: &[Row], actual: &[Row]) -> RowDiff {
    let want = multiset(expected);
    let got = multiset(actual);
    let mut diff = RowDiff::default();
    for (row, &n) in &want {
        let m = got.get(row).copied().unwrap_or(0);
        diff.missing.extend(std::iter::repeat_n(row.clone(), n.saturating_sub(m)));
    }
    for (row, &m) in &got {
        let n = want.get(row).copied().unwrap_or(0);
        diff.extra.extend(std::iter::repeat_n(row.clone(), m.saturating_sub(n)));
    }
    diff
}

/// `t`, `true` and `1` in any case.
pub fn is_truthy(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "t" | "true" | "1"))
        .unwrap_or(false)
}

fn printable(row: &str) -> String {
    row.replace(NULL_MARKER, "NULL").replace(COLUMN_SEPARATOR, " | ")
}

// ── Comparisons ────────────────────────────────────────────────────────────

/// The queries of one oracle check and how their results must relate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Comparison {
    /// Row count of the optimized query equals the number of rows for
    /// which the unoptimized query's first column is true.
    RowCount {
        optimized: String,
        unoptimized: String,
    },
    /// The partitions together return exactly the baseline's rows.
    Partition {
        baseline: String,
        partitions: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Consistent,
    Mismatch(String),
}

impl Comparison {
    pub fn queries(&self) -> Vec<String> {
        match self {
            Comparison::RowCount {
                optimized,
                unoptimized,
            } => vec![optimized.clone(), unoptimized.clone()],
            Comparison::Partition {
                baseline,
                partitions,
            } => std::iter::once(baseline.clone())
                .chain(partitions.iter().cloned())
                .collect(),
        }
    }

    /// Query recorded as the example of a passing check.
    pub fn primary_query(&self) -> &str {
        match self {
            Comparison::RowCount { optimized, .. } => optimized,
            Comparison::Partition { baseline, .. } => baseline,
        }
    }

    pub fn evaluate(
        &self,
        conn: &mut dyn SqlConnection,
        route: QueryRoute,
    ) -> Result<Verdict, SqlError> {
        match self {
            Comparison::RowCount {
                optimized,
                unoptimized,
            } => {
                let expected = run_query(conn, optimized, route)?.len();
                let actual = conn
                    .query(unoptimized)?
                    .iter()
                    .filter(|row| row.first().is_some_and(is_truthy))
                    .count();
                if expected == actual {
                    Ok(Verdict::Consistent)
                } else {
                    Ok(Verdict::Mismatch(format!(
                        "{optimized}; -- {expected}\n{unoptimized} -- {actual}"
                    )))
                }
            }
            Comparison::Partition {
                baseline,
                partitions,
            } => {
                let expected = run_query(conn, baseline, route)?;
                let mut actual = Vec::new();
                for partition in partitions {
                    actual.extend(run_query(conn, partition, route)?);
                }
                let diff = multiset_diff(&expected, &actual);
                if diff.is_empty() {
                    return Ok(Verdict::Consistent);
                }
                let sample = |rows: &[String]| {
                    rows.iter()
                        .take(DIFF_SAMPLE)
                        .map(|r| format!("  {}", printable(r)))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                Ok(Verdict::Mismatch(format!(
                    "{baseline}; -- {} rows\n{}; -- {} rows\nmissing:\n{}\nextra:\n{}",
                    expected.len(),
                    partitions.join(";\n"),
                    actual.len(),
                    sample(&diff.missing),
                    sample(&diff.extra),
                )))
            }
        }
    }
}
