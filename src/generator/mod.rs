//! Feedback-directed SQL generation.
//!
//! A [`Generator`] borrows one session's randomness, feedback controller and
//! schema for the duration of one statement. Every decision it takes is
//! checked against the controller first and recorded after it succeeds, so
//! the statement's [`ExecutionRecord`](crate::feedback::ExecutionRecord)
//! names exactly the features it exercised.
//!
//! - [`expr`]: typed, depth-bounded expressions.
//! - [`untyped`]: expressions without type targeting.
//! - [`statement`]: DDL/DML statements and the action schedule.
//! - [`select`]: FROM clauses with joins for the oracles.
//! - [`sketch`]: statements rendered with numbered holes for the learner.

pub mod expr;
pub mod select;
pub mod sketch;
pub mod statement;
pub mod untyped;

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::feature::{FragmentKey, Node, SyntaxFeature};
use crate::feedback::FeedbackController;
use crate::fragments::{VariableKind, VariableSource};
use crate::schema::{ColumnRef, DataType, Schema};
use crate::state::{EngineState, lock};

// ── Randomness ─────────────────────────────────────────────────────────────

const EDGE_INTS: [i64; 7] = [0, 1, -1, 2_147_483_647, -2_147_483_648, 100, -100];
const STRING_CHARS: &[u8] = b"abcdefgxyz019 %_";

/// Seeded random source with the probability helpers the generator uses.
#[derive(Debug, Clone)]
pub struct Randomly {
    rng: StdRng,
}

impl Randomly {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// True with probability 1/10.
    pub fn rather_low(&mut self) -> bool {
        self.rng.gen_ratio(1, 10)
    }

    /// True with probability 1/100.
    pub fn small(&mut self) -> bool {
        self.rng.gen_ratio(1, 100)
    }

    pub fn coin(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    pub fn probability(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Uniform in `0..n`; 0 when `n` is 0.
    pub fn below(&mut self, n: usize) -> usize {
        if n == 0 { 0 } else { self.rng.gen_range(0..n) }
    }

    /// Uniform in `lo..hi`; `lo` when the range is empty.
    pub fn range(&mut self, lo: u32, hi: u32) -> u32 {
        if hi <= lo { lo } else { self.rng.gen_range(lo..hi) }
    }

    /// Geometric count in `0..=8`, mostly 0 or 1.
    pub fn small_number(&mut self) -> usize {
        let mut n = 0;
        while n < 8 && self.coin() {
            n += 1;
        }
        n
    }

    pub fn int(&mut self) -> i64 {
        if self.rather_low() {
            EDGE_INTS[self.below(EDGE_INTS.len())]
        } else {
            self.rng.gen_range(-100..=100)
        }
    }

    pub fn positive_int(&mut self) -> i64 {
        self.rng.gen_range(1..=1000)
    }

    /// Short string without quotes.
    pub fn string(&mut self) -> String {
        let len = self.below(6);
        (0..len)
            .map(|_| STRING_CHARS[self.below(STRING_CHARS.len())] as char)
            .collect()
    }

    pub fn date(&mut self) -> String {
        self.naive_date().format("%Y-%m-%d").to_string()
    }

    pub fn timestamp(&mut self) -> String {
        let seconds = self.rng.gen_range(0..86_400);
        let time = NaiveTime::MIN + ChronoDuration::seconds(seconds);
        self.naive_date()
            .and_time(time)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    fn naive_date(&mut self) -> NaiveDate {
        let days = self.rng.gen_range(0..25_000);
        NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(ChronoDuration::days(days)))
            .unwrap_or_default()
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Weighted choice; zero-weight items are never picked.
    pub fn weighted<T: Copy>(&mut self, items: &[(T, u32)]) -> Option<T> {
        let total: u32 = items.iter().map(|(_, w)| *w).sum();
        if total == 0 {
            return None;
        }
        let mut roll = self.rng.gen_range(0..total);
        for (item, weight) in items {
            if roll < *weight {
                return Some(*item);
            }
            roll -= weight;
        }
        None
    }

    /// Random non-empty subset, in original order. Empty input gives empty.
    pub fn non_empty_subset<T: Clone>(&mut self, items: &[T]) -> Vec<T> {
        if items.is_empty() {
            return Vec::new();
        }
        let keep = 1 + self.below(items.len());
        let mut indexes: Vec<usize> = (0..items.len()).collect();
        indexes.shuffle(&mut self.rng);
        indexes.truncate(keep);
        indexes.sort_unstable();
        indexes.into_iter().map(|i| items[i].clone()).collect()
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    pub fn next_seed(&mut self) -> u64 {
        self.rng.r#gen()
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

// ── Generator ──────────────────────────────────────────────────────────────

/// Per-statement generation flags.
#[derive(Debug, Clone, Default)]
pub struct GenOptions {
    /// Holes render as `{n}` and names as `TEST_TABLE`/`TEST_COLUMNi`.
    pub sketch: bool,
    /// Record type-store fragment choices (only while building the schema).
    pub record_type_fragments: bool,
    /// Type currently being learned; preferred for new columns.
    pub preferred_type: Option<DataType>,
}

/// Borrowed view of one session used to build one statement.
pub struct Generator<'a> {
    pub(crate) rng: &'a mut Randomly,
    pub(crate) feedback: &'a mut FeedbackController,
    pub(crate) engine: &'a EngineState,
    pub(crate) schema: &'a Schema,
    pub(crate) options: GenOptions,
    /// Columns visible to expressions.
    columns: Vec<ColumnRef>,
    /// Table that `<RANDOM_TABLE>`/`<RANDOM_COLUMN>` refer to.
    target: Option<String>,
    test_objects: Vec<(String, String)>,
    depth_limit: u32,
    types: Vec<DataType>,
}

impl<'a> Generator<'a> {
    pub fn new(
        rng: &'a mut Randomly,
        feedback: &'a mut FeedbackController,
        engine: &'a EngineState,
        schema: &'a Schema,
        options: GenOptions,
    ) -> Self {
        let depth_limit = engine.config.max_expression_depth.min(feedback.depth());
        let types = lock(&engine.catalog).supported_types(engine.config.enable_extra_features);
        Self {
            rng,
            feedback,
            engine,
            schema,
            options,
            columns: Vec::new(),
            target: None,
            test_objects: Vec::new(),
            depth_limit,
            types,
        }
    }

    pub fn set_columns(&mut self, columns: Vec<ColumnRef>) {
        self.columns = columns;
    }

    pub fn columns(&self) -> &[ColumnRef] {
        &self.columns
    }

    /// Scope expressions and fragment variables to one table.
    pub fn focus_table(&mut self, table: &str) {
        self.target = Some(table.to_string());
        self.columns = self
            .schema
            .table(table)
            .map(|t| {
                t.columns
                    .iter()
                    .map(|c| ColumnRef {
                        table: t.name.clone(),
                        column: c.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
    }

    pub fn set_test_objects(&mut self, objects: Vec<(String, String)>) {
        self.test_objects = objects;
        // TEST_COLUMN10 before TEST_COLUMN1
        self.test_objects
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    }

    pub fn depth_limit(&self) -> u32 {
        self.depth_limit
    }

    pub(crate) fn max_rounds(&self) -> u32 {
        self.engine.config.max_rejection_rounds
    }

    pub(crate) fn node_enabled(&self, node: Node) -> bool {
        self.feedback.node_option(node)
    }

    pub(crate) fn record(&mut self, feature: impl Into<SyntaxFeature>) {
        self.feedback.record(feature);
    }

    pub(crate) fn supported_types(&self) -> &[DataType] {
        &self.types
    }

    /// Re-roll a weighted category until its node is enabled and an
    /// acceptance coin lands, within the rejection budget.
    pub(crate) fn pick_enabled<T: Copy>(&mut self, choices: &[(T, Node, u32)]) -> Option<T> {
        let weighted: Vec<((T, Node), u32)> =
            choices.iter().map(|(v, n, w)| ((*v, *n), *w)).collect();
        for _ in 0..self.max_rounds() {
            let (value, node) = self.rng.weighted(&weighted)?;
            if self.rng.small() && self.node_enabled(node) {
                return Some(value);
            }
        }
        None
    }

    /// Uniform choice among operators whose node is enabled.
    pub(crate) fn pick_operator<O: Copy>(&mut self, ops: &[O], node: fn(&O) -> Node) -> Option<O> {
        let enabled: Vec<O> = ops
            .iter()
            .copied()
            .filter(|op| self.node_enabled(node(op)))
            .collect();
        self.rng.pick(&enabled).copied()
    }

    /// Type for an operand: mostly a column's type, sometimes any
    /// supported type, preferring the type being learned.
    pub fn random_type(&mut self) -> DataType {
        if self.columns.is_empty() || self.rng.rather_low() {
            if let Some(preferred) = self.options.preferred_type.clone()
                && self.rng.rather_low()
            {
                return preferred;
            }
            let index = self.rng.below(self.types.len());
            return self.types.get(index).cloned().unwrap_or(DataType::Int);
        }
        let index = self.rng.below(self.columns.len());
        self.columns[index].column.ty.clone()
    }

    fn target_table(&self) -> Option<&crate::schema::Table> {
        self.target
            .as_deref()
            .and_then(|name| self.schema.table(name))
    }
}

impl VariableSource for Generator<'_> {
    fn render_variable(&mut self, kind: VariableKind) -> String {
        match kind {
            VariableKind::RandomInt => self.rng.int().to_string(),
            VariableKind::RandomPositiveInt => self.rng.positive_int().to_string(),
            VariableKind::RandomString => self.rng.string(),
            VariableKind::RandomDate => self.rng.date(),
            VariableKind::RandomTimestamp => self.rng.timestamp(),
            VariableKind::RandomTable => match &self.target {
                Some(name) => name.clone(),
                None => {
                    let tables = self.schema.base_tables();
                    self.rng
                        .pick(&tables)
                        .map(|t| t.name.clone())
                        .unwrap_or_else(|| "t0".to_string())
                }
            },
            VariableKind::RandomColumn => {
                let names: Vec<String> = match self.target_table() {
                    Some(t) => t.columns.iter().map(|c| c.name.clone()).collect(),
                    None => self.columns.iter().map(|c| c.column.name.clone()).collect(),
                };
                self.rng
                    .pick(&names)
                    .cloned()
                    .unwrap_or_else(|| "c0".to_string())
            }
            VariableKind::RandomExpression => self.generate_expression(&DataType::Boolean).to_string(),
            VariableKind::Null => String::new(),
        }
    }

    fn pick_index(&mut self, len: usize) -> usize {
        self.rng.below(len)
    }

    fn record_fragment(&mut self, key: FragmentKey) {
        self.feedback.record(key);
    }

    fn sketch_mode(&self) -> bool {
        self.options.sketch
    }

    fn replace_test_objects(&self, mut text: String) -> String {
        for (placeholder, name) in &self.test_objects {
            if text.contains(placeholder.as_str()) {
                text = text.replace(placeholder.as_str(), name);
            }
        }
        text
    }
}
