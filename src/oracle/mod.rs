//! Test oracles.
//!
//! An oracle generates a small set of queries whose results must relate in a
//! fixed way regardless of how the target optimizes them, runs them, and
//! compares. A mismatch is a logic bug candidate; it is reported as a
//! [`FuzzError::OracleViolation`] carrying a [`Reproducer`] that replays the
//! schema setup and the failing comparison.
//!
//! - [`norec`]: non-optimizing reference engine construction.
//! - [`partition`]: ternary partitioning of a predicate (TLP WHERE).

pub mod compare;
pub mod norec;
pub mod partition;
pub mod reproducer;

use serde::{Deserialize, Serialize};

pub use compare::{Comparison, Verdict};
pub use reproducer::Reproducer;

use crate::connection::{QueryRoute, SqlConnection};
use crate::error::{FuzzError, Outcome, Skip};
use crate::feature::Node;
use crate::generator::Generator;
use crate::hash::record_fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OracleKind {
    NoRec,
    Partition,
}

impl OracleKind {
    pub const ALL: [OracleKind; 2] = [OracleKind::NoRec, OracleKind::Partition];

    pub fn as_str(&self) -> &'static str {
        match self {
            OracleKind::NoRec => "NOREC",
            OracleKind::Partition => "WHERE",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, FuzzError> {
        match s.trim().to_uppercase().as_str() {
            "NOREC" => Ok(OracleKind::NoRec),
            "WHERE" | "TLP" | "PARTITION" => Ok(OracleKind::Partition),
            other => Err(FuzzError::InvalidArgument(format!("unknown oracle {other}"))),
        }
    }

    /// Feature recorded for every check of this oracle.
    pub fn node(&self) -> Node {
        match self {
            OracleKind::NoRec => Node::NOREC,
            OracleKind::Partition => Node::WHERE,
        }
    }

    /// Generate this oracle's queries. Returns the comparison and the
    /// projection width of the compared queries.
    pub fn generate(&self, generator: &mut Generator<'_>) -> Outcome<(Comparison, usize)> {
        match self {
            OracleKind::NoRec => norec::generate(generator),
            OracleKind::Partition => partition::generate(generator),
        }
    }
}

impl std::fmt::Display for OracleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confirmed oracle mismatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugReport {
    pub oracle: OracleKind,
    pub session: String,
    pub message: String,
    pub queries: Vec<String>,
    /// Fingerprint of the failing execution record.
    pub fingerprint: u64,
    pub reproducer: Reproducer,
}

/// Where oracle queries run and what led up to them.
pub struct OracleContext<'c> {
    pub conn: &'c mut dyn SqlConnection,
    pub auto_index: bool,
    /// Successful statements of the session so far.
    pub setup: &'c [String],
}

/// Run one check of `kind`.
///
/// - `Ok(Done(()))`: results agree; the record is finalized as a success.
/// - `Ok(Skipped(..))`: nothing to compare, or a query failed (the record
///   is finalized as a failure and the check is inconclusive).
/// - `Err(OracleViolation)`: results disagree. Every query ran, so the
///   record is finalized as a success.
pub fn check(
    kind: OracleKind,
    generator: &mut Generator<'_>,
    ctx: &mut OracleContext<'_>,
) -> Result<Outcome<()>, FuzzError> {
    generator.feedback.record(kind.node());
    let (comparison, width) = match kind.generate(generator) {
        Outcome::Done(generated) => generated,
        Outcome::Skipped(skip) => {
            generator.feedback.discard();
            return Ok(Outcome::Skipped(skip));
        }
    };
    let route = if ctx.auto_index {
        QueryRoute::IndexedView(width)
    } else {
        QueryRoute::Direct
    };

    match comparison.evaluate(ctx.conn, route) {
        Err(e) if e.is_connection() => {
            generator.feedback.discard();
            Err(e.into_fuzz_error(comparison.primary_query()))
        }
        Err(e) => {
            tracing::debug!(oracle = %kind, error = %e, "oracle query failed");
            generator.feedback.finalize(false, true, None);
            Ok(Outcome::Skipped(Skip::Inconclusive))
        }
        Ok(Verdict::Consistent) => {
            generator
                .feedback
                .finalize(true, true, Some(comparison.primary_query()));
            Ok(Outcome::Done(()))
        }
        Ok(Verdict::Mismatch(message)) => {
            generator
                .feedback
                .finalize(true, true, Some(comparison.primary_query()));
            let fingerprint = generator
                .feedback
                .last_record()
                .map(record_fingerprint)
                .unwrap_or_default();
            let report = BugReport {
                oracle: kind,
                session: generator.feedback.session().to_string(),
                message,
                queries: comparison.queries(),
                fingerprint,
                reproducer: Reproducer {
                    oracle: kind,
                    setup: ctx.setup.to_vec(),
                    comparison,
                    route,
                },
            };
            Err(FuzzError::OracleViolation(Box::new(report)))
        }
    }
}
