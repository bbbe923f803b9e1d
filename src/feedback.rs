//! Feedback controller.
//!
//! Every generator decision is recorded against the session's in-flight
//! [`ExecutionRecord`]. When the statement's outcome is known the record is
//! finalized into the session's [`ExecutionHistory`]. At teardown the history
//! is folded into the process-wide [`FeedbackStats`], whose per-feature
//! success rates switch features on and off for every later session.
//!
//! # Update rule
//!
//! - A rate is only trusted once a feature has more attempts than its
//!   category's warm-up threshold, or immediately when quick-start is on for
//!   that category and it has at least one success.
//! - Enablement is monotonic: a feature that is enabled stays enabled. A
//!   disabled feature is re-enabled as soon as its trusted rate is positive.
//! - `UNTYPE_EXPR` starts disabled and, once enabled, stays on only while its
//!   rate exceeds 0.5.
//! - A function whose argument positions have no enabled type left is
//!   disabled as a whole.
//!
//! # Concurrency
//!
//! [`SharedFeedback`] holds the statistics, bug history and depth table
//! behind separate mutexes. Sessions only take a lock for the duration of a
//! single read or fold; no lock is held across SQL execution.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::config::FuzzConfig;
use crate::dedup::BugHistory;
use crate::error::{Outcome, Skip};
use crate::feature::{Category, CompositeKey, Node, SyntaxFeature};
use crate::state::lock;

// ── Records ────────────────────────────────────────────────────────────────

/// Outcome of one generated statement or query pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Feature → number of uses while building the statement.
    pub features: BTreeMap<SyntaxFeature, u64>,
    pub success: bool,
    pub is_query: bool,
    pub example: Option<String>,
}

impl ExecutionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, feature: SyntaxFeature) {
        *self.features.entry(feature).or_insert(0) += 1;
    }

    /// Feature keys excluding meta features.
    pub fn feature_set(&self) -> impl Iterator<Item = &SyntaxFeature> {
        self.features.keys().filter(|f| !f.is_meta())
    }

    pub fn is_trivial(&self) -> bool {
        self.feature_set().next().is_none()
    }
}

/// Records finalized by one session, with a cursor marking what has already
/// been folded into the shared statistics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionHistory {
    records: Vec<ExecutionRecord>,
    folded: usize,
}

impl ExecutionHistory {
    pub fn push(&mut self, record: ExecutionRecord) {
        self.records.push(record);
    }

    pub fn last(&self) -> Option<&ExecutionRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records not yet folded; advances the cursor.
    fn take_unfolded(&mut self) -> &[ExecutionRecord] {
        let start = self.folded;
        self.folded = self.records.len();
        &self.records[start..]
    }
}

// ── Shared statistics ──────────────────────────────────────────────────────

/// Accumulated success units and attempts for one feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Σ uses-in-record over successful records.
    pub successes: u64,
    /// Number of records touching the feature.
    pub attempts: u64,
}

/// Warm-up thresholds and quick-start flags per category.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackSettings {
    pub node_warmup: u64,
    pub composite_warmup: u64,
    pub fragment_warmup: u64,
    pub node_quick_start: bool,
    pub composite_quick_start: bool,
    pub fragment_quick_start: bool,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self::from_config(&FuzzConfig::default())
    }
}

impl FeedbackSettings {
    pub fn from_config(config: &FuzzConfig) -> Self {
        Self {
            node_warmup: config.node_warmup,
            composite_warmup: config.composite_warmup,
            fragment_warmup: config.fragment_warmup,
            node_quick_start: config.node_quick_start,
            composite_quick_start: config.composite_quick_start,
            fragment_quick_start: config.fragment_quick_start,
        }
    }

    fn warmup(&self, category: Category) -> (u64, bool) {
        match category {
            Category::Node => (self.node_warmup, self.node_quick_start),
            Category::Composite => (self.composite_warmup, self.composite_quick_start),
            Category::Fragment => (self.fragment_warmup, self.fragment_quick_start),
        }
    }

    /// Whether a tally has enough evidence for its rate to be used.
    pub fn is_trusted(&self, category: Category, tally: Tally) -> bool {
        let (threshold, quick_start) = self.warmup(category);
        tally.attempts > threshold || (quick_start && tally.successes > 0)
    }
}

/// One row of the statistics export.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStat {
    pub feature: SyntaxFeature,
    pub enabled: bool,
    pub tally: Tally,
    pub example: Option<String>,
}

/// Process-wide enablement flags and statistics.
#[derive(Debug, Clone)]
pub struct FeedbackStats {
    settings: FeedbackSettings,
    options: HashMap<SyntaxFeature, bool>,
    totals: HashMap<SyntaxFeature, Tally>,
    rates: HashMap<SyntaxFeature, f64>,
    examples: HashMap<SyntaxFeature, String>,
    executions: u64,
}

impl FeedbackStats {
    pub fn new(settings: FeedbackSettings) -> Self {
        let mut options = HashMap::new();
        options.insert(SyntaxFeature::Node(Node::UNTYPE_EXPR), false);
        Self {
            settings,
            options,
            totals: HashMap::new(),
            rates: HashMap::new(),
            examples: HashMap::new(),
            executions: 0,
        }
    }

    /// Enablement; absent means enabled.
    pub fn option(&self, feature: &SyntaxFeature) -> bool {
        self.options.get(feature).copied().unwrap_or(true)
    }

    /// Enablement; absent means disabled.
    pub fn option_or_false(&self, feature: &SyntaxFeature) -> bool {
        self.options.get(feature).copied().unwrap_or(false)
    }

    pub fn set_option(&mut self, feature: SyntaxFeature, enabled: bool) {
        self.options.insert(feature, enabled);
    }

    /// Set a flag only if the feature has never been observed.
    pub fn set_option_if_absent(&mut self, feature: SyntaxFeature, enabled: bool) {
        self.options.entry(feature).or_insert(enabled);
    }

    pub fn rate(&self, feature: &SyntaxFeature) -> Option<f64> {
        self.rates.get(feature).copied()
    }

    pub fn tally(&self, feature: &SyntaxFeature) -> Tally {
        self.totals.get(feature).copied().unwrap_or_default()
    }

    pub fn example(&self, feature: &SyntaxFeature) -> Option<&str> {
        self.examples.get(feature).map(String::as_str)
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn mark_execution(&mut self) {
        self.executions += 1;
    }

    /// Fold finalized records into the all-time totals and recompute the
    /// rate of every feature they touched.
    pub fn fold(&mut self, records: &[ExecutionRecord]) {
        let mut local: HashMap<&SyntaxFeature, Tally> = HashMap::new();
        for record in records {
            for (feature, uses) in &record.features {
                let tally = local.entry(feature).or_default();
                if record.success {
                    tally.successes += uses;
                }
                tally.attempts += 1;
            }
            if record.success
                && let Some(example) = &record.example
            {
                for feature in record.features.keys() {
                    self.examples
                        .entry(feature.clone())
                        .or_insert_with(|| example.clone());
                }
            }
        }

        for (feature, run) in local {
            let total = self.totals.entry(feature.clone()).or_default();
            total.successes += run.successes;
            total.attempts += run.attempts;
            let total = *total;

            if self.settings.is_trusted(feature.category(), total) {
                let rate = total.successes as f64 / total.attempts as f64;
                self.rates.insert(feature.clone(), rate);
            }
        }
    }

    /// Apply the update rule to every feature with a trusted rate.
    ///
    /// `functions` lists `(name, arity)` for every catalog function and
    /// `types` the registry names of every supported argument type.
    pub fn update_options(&mut self, functions: &[(String, usize)], types: &[String]) {
        let mut rated: Vec<(&SyntaxFeature, f64)> =
            self.rates.iter().map(|(f, r)| (f, *r)).collect();
        // plain nodes, then composites, then fragments
        rated.sort_by_key(|(f, _)| match f.category() {
            Category::Node => 0,
            Category::Composite => 1,
            Category::Fragment => 2,
        });

        let mut changes = Vec::new();
        for (feature, rate) in rated {
            if self.option_or_false(feature) {
                continue;
            }
            changes.push((feature.clone(), rate > 0.0));
        }
        for (feature, enabled) in changes {
            if !enabled {
                tracing::debug!(feature = %feature, "feature disabled by feedback");
            }
            self.options.insert(feature, enabled);
        }

        self.revalidate_functions(functions, types);

        let untyped = SyntaxFeature::Node(Node::UNTYPE_EXPR);
        if self.option_or_false(&untyped)
            && let Some(rate) = self.rates.get(&untyped).copied()
        {
            self.options.insert(untyped, rate > 0.5);
        }
    }

    /// Disable every function with an argument position that no supported
    /// type is enabled for.
    pub fn revalidate_functions(&mut self, functions: &[(String, usize)], types: &[String]) {
        for (name, arity) in functions {
            let dead_position = (0..*arity).any(|index| {
                !types.iter().any(|ty| {
                    self.option(&SyntaxFeature::Composite(CompositeKey::FunctionArg {
                        function: name.clone(),
                        index,
                        ty: ty.clone(),
                    }))
                })
            });
            if dead_position {
                self.options.insert(
                    SyntaxFeature::Composite(CompositeKey::FunctionName(name.clone())),
                    false,
                );
            }
        }
    }

    /// Every observed feature with its flag, tally and example, sorted.
    pub fn entries(&self) -> Vec<FeatureStat> {
        let mut features: Vec<&SyntaxFeature> =
            self.options.keys().chain(self.totals.keys()).collect();
        features.sort();
        features.dedup();
        features
            .into_iter()
            .map(|feature| FeatureStat {
                feature: feature.clone(),
                enabled: self.option(feature),
                tally: self.tally(feature),
                example: self.examples.get(feature).cloned(),
            })
            .collect()
    }
}

// ── Depth ──────────────────────────────────────────────────────────────────

/// Per-session expression depth, growing after every successful build.
#[derive(Debug, Clone)]
pub struct DepthState {
    depths: HashMap<String, u32>,
    max: u32,
}

impl DepthState {
    pub fn new(max: u32) -> Self {
        Self {
            depths: HashMap::new(),
            max: max.max(1),
        }
    }

    fn key(session: &str) -> &str {
        session.split('_').next().unwrap_or(session)
    }

    pub fn depth(&self, session: &str) -> u32 {
        self.depths.get(Self::key(session)).copied().unwrap_or(1)
    }

    pub fn increment(&mut self, session: &str) -> u32 {
        let max = self.max;
        let depth = self
            .depths
            .entry(Self::key(session).to_string())
            .and_modify(|d| *d = (*d + 1).min(max))
            .or_insert(2.min(max));
        *depth
    }
}

// ── Shared handle ──────────────────────────────────────────────────────────

/// Statistics, bug history and depth shared by all sessions.
#[derive(Debug)]
pub struct SharedFeedback {
    pub stats: Mutex<FeedbackStats>,
    pub bugs: Mutex<BugHistory>,
    pub depth: Mutex<DepthState>,
}

impl SharedFeedback {
    pub fn new(config: &FuzzConfig) -> Self {
        Self {
            stats: Mutex::new(FeedbackStats::new(FeedbackSettings::from_config(config))),
            bugs: Mutex::new(BugHistory::default()),
            depth: Mutex::new(DepthState::new(config.max_expression_depth)),
        }
    }
}

// ── Per-session controller ─────────────────────────────────────────────────

/// A session's view of the feedback machinery.
#[derive(Debug)]
pub struct FeedbackController {
    shared: Arc<SharedFeedback>,
    session: String,
    current: ExecutionRecord,
    history: ExecutionHistory,
}

impl FeedbackController {
    pub fn new(shared: Arc<SharedFeedback>, session: impl Into<String>) -> Self {
        Self {
            shared,
            session: session.into(),
            current: ExecutionRecord::new(),
            history: ExecutionHistory::default(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn shared(&self) -> &Arc<SharedFeedback> {
        &self.shared
    }

    pub fn record(&mut self, feature: impl Into<SyntaxFeature>) {
        self.current.record(feature.into());
    }

    /// Close the in-flight record and start a fresh one.
    pub fn finalize(&mut self, success: bool, is_query: bool, example: Option<&str>) {
        let mut record = std::mem::take(&mut self.current);
        record.success = success;
        record.is_query = is_query;
        record.example = if success {
            example.map(str::to_string)
        } else {
            None
        };
        self.history.push(record);
    }

    /// Throw away the in-flight record without finalizing it.
    pub fn discard(&mut self) {
        self.current = ExecutionRecord::new();
    }

    pub fn current(&self) -> &ExecutionRecord {
        &self.current
    }

    pub fn last_record(&self) -> Option<&ExecutionRecord> {
        self.history.last()
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// Fold records finalized since the previous call into shared statistics.
    pub fn compute_averages(&mut self) {
        let records = self.history.take_unfolded();
        if records.is_empty() {
            return;
        }
        lock(&self.shared.stats).fold(records);
    }

    pub fn update_options(&self, functions: &[(String, usize)], types: &[String]) {
        lock(&self.shared.stats).update_options(functions, types);
    }

    pub fn option(&self, feature: &SyntaxFeature) -> bool {
        lock(&self.shared.stats).option(feature)
    }

    pub fn node_option(&self, node: Node) -> bool {
        self.option(&SyntaxFeature::Node(node))
    }

    pub fn composite_option(&self, key: &CompositeKey) -> bool {
        lock(&self.shared.stats).option(&SyntaxFeature::Composite(key.clone()))
    }

    pub fn option_or_false(&self, feature: &SyntaxFeature) -> bool {
        lock(&self.shared.stats).option_or_false(feature)
    }

    /// Composite entries of the in-flight record.
    pub fn snapshot_composites(&self) -> Vec<(SyntaxFeature, u64)> {
        self.current
            .features
            .iter()
            .filter(|(f, _)| f.category() == Category::Composite)
            .map(|(f, n)| (f.clone(), *n))
            .collect()
    }

    /// Replace the in-flight record's composites with a snapshot.
    pub fn restore_composites(&mut self, snapshot: Vec<(SyntaxFeature, u64)>) {
        self.current
            .features
            .retain(|f, _| f.category() != Category::Composite);
        self.current.features.extend(snapshot);
    }

    pub fn depth(&self) -> u32 {
        lock(&self.shared.depth).depth(&self.session)
    }

    pub fn increment_depth(&self) -> u32 {
        lock(&self.shared.depth).increment(&self.session)
    }

    pub fn execution_count(&self) -> u64 {
        lock(&self.shared.stats).executions()
    }

    pub fn mark_execution(&self) {
        lock(&self.shared.stats).mark_execution();
    }

    /// Run the last finalized record through the deduplicator.
    ///
    /// Returns `Skipped(Duplicate)` when a recorded entry with the same status
    /// matches, and `Done(())` for a novel record, which is then stored under
    /// this session's id.
    pub fn check_duplicate(&self) -> Outcome<()> {
        let Some(record) = self.history.last() else {
            return Outcome::Done(());
        };
        let mut bugs = lock(&self.shared.bugs);
        match bugs.find_duplicate_with_rule(record) {
            Some((_, rule)) => {
                tracing::debug!(session = %self.session, ?rule, "duplicate of a known record");
                Outcome::Skipped(Skip::Duplicate)
            }
            None => {
                bugs.insert(&self.session, record.clone());
                Outcome::Done(())
            }
        }
    }

    /// Store the terminal record of this session, replacing any prior one.
    pub fn save_terminal_record(&self) {
        if let Some(record) = self.history.last() {
            lock(&self.shared.bugs).insert(&self.session, record.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: Node) -> SyntaxFeature {
        SyntaxFeature::Node(n)
    }

    fn record(features: &[(SyntaxFeature, u64)], success: bool) -> ExecutionRecord {
        ExecutionRecord {
            features: features.iter().cloned().collect(),
            success,
            is_query: false,
            example: success.then(|| "SELECT 1".to_string()),
        }
    }

    fn controller() -> FeedbackController {
        FeedbackController::new(
            Arc::new(SharedFeedback::new(&FuzzConfig::default())),
            "database0",
        )
    }

    #[test]
    fn test_absent_option_is_enabled() {
        let stats = FeedbackStats::new(FeedbackSettings::default());
        assert!(stats.option(&node(Node::JOIN)));
        assert!(!stats.option_or_false(&node(Node::JOIN)));
    }

    #[test]
    fn test_untyped_starts_disabled() {
        let stats = FeedbackStats::new(FeedbackSettings::default());
        assert!(!stats.option(&node(Node::UNTYPE_EXPR)));
    }

    #[test]
    fn test_successes_weighted_by_uses_attempts_by_records() {
        let mut stats = FeedbackStats::new(FeedbackSettings::default());
        stats.fold(&[
            record(&[(node(Node::CASE), 3)], true),
            record(&[(node(Node::CASE), 2)], false),
        ]);
        let tally = stats.tally(&node(Node::CASE));
        assert_eq!(tally.successes, 3);
        assert_eq!(tally.attempts, 2);
        // quick-start applies to nodes
        assert_eq!(stats.rate(&node(Node::CASE)), Some(1.5));
    }

    #[test]
    fn test_composite_warmup_without_quick_start() {
        let mut stats = FeedbackStats::new(FeedbackSettings::default());
        let col = SyntaxFeature::Composite(CompositeKey::Column("INT".into()));
        let records: Vec<_> = (0..200).map(|_| record(&[(col.clone(), 1)], true)).collect();
        stats.fold(&records);
        assert_eq!(stats.rate(&col), None);
        stats.fold(&[record(&[(col.clone(), 1)], true)]);
        assert_eq!(stats.rate(&col), Some(1.0));
    }

    #[test]
    fn test_join_disabled_after_150_failures() {
        let mut stats = FeedbackStats::new(FeedbackSettings::default());
        let join = node(Node::JOIN);
        let failures: Vec<_> = (0..150).map(|_| record(&[(join.clone(), 1)], false)).collect();
        stats.fold(&failures);
        stats.update_options(&[], &[]);
        assert!(!stats.option(&join));

        // One success makes the rate positive; the flag only changes on update.
        stats.fold(&[record(&[(join.clone(), 1)], true)]);
        assert!(!stats.option(&join));
        stats.update_options(&[], &[]);
        assert!(stats.option(&join));
    }

    #[test]
    fn test_enabled_features_stay_enabled() {
        let mut stats = FeedbackStats::new(FeedbackSettings::default());
        let case = node(Node::CASE);
        stats.fold(&[record(&[(case.clone(), 1)], true)]);
        stats.update_options(&[], &[]);
        assert!(stats.option(&case));

        let failures: Vec<_> = (0..1000).map(|_| record(&[(case.clone(), 1)], false)).collect();
        stats.fold(&failures);
        stats.update_options(&[], &[]);
        assert!(stats.option(&case));
    }

    #[test]
    fn test_untyped_threshold() {
        let mut stats = FeedbackStats::new(FeedbackSettings::default());
        let untyped = node(Node::UNTYPE_EXPR);
        stats.fold(&[
            record(&[(untyped.clone(), 1)], true),
            record(&[(untyped.clone(), 1)], false),
            record(&[(untyped.clone(), 1)], false),
        ]);
        // rate 1/3: turned on by the plain rule, then off by the 0.5 threshold
        stats.update_options(&[], &[]);
        assert!(!stats.option(&untyped));

        stats.set_option(untyped.clone(), true);
        stats.fold(&[
            record(&[(untyped.clone(), 2)], true),
            record(&[(untyped.clone(), 2)], true),
        ]);
        stats.update_options(&[], &[]);
        assert!(stats.option(&untyped));
    }

    #[test]
    fn test_function_revalidation() {
        let mut stats = FeedbackStats::new(FeedbackSettings::default());
        let types = vec!["INT".to_string(), "STRING".to_string()];
        for ty in &types {
            stats.set_option(
                SyntaxFeature::Composite(CompositeKey::FunctionArg {
                    function: "ABS".into(),
                    index: 0,
                    ty: ty.clone(),
                }),
                false,
            );
        }
        stats.revalidate_functions(
            &[("ABS".to_string(), 1), ("LENGTH".to_string(), 1)],
            &types,
        );
        assert!(!stats.option(&SyntaxFeature::Composite(CompositeKey::FunctionName(
            "ABS".into()
        ))));
        assert!(stats.option(&SyntaxFeature::Composite(CompositeKey::FunctionName(
            "LENGTH".into()
        ))));
    }

    #[test]
    fn test_first_example_kept() {
        let mut stats = FeedbackStats::new(FeedbackSettings::default());
        let mut first = record(&[(node(Node::INSERT), 1)], true);
        first.example = Some("INSERT INTO t0 VALUES (1)".into());
        let mut second = first.clone();
        second.example = Some("INSERT INTO t0 VALUES (2)".into());
        stats.fold(&[first, second]);
        assert_eq!(
            stats.example(&node(Node::INSERT)),
            Some("INSERT INTO t0 VALUES (1)")
        );
    }

    #[test]
    fn test_depth_monotonic_and_capped() {
        let mut depth = DepthState::new(3);
        assert_eq!(depth.depth("database1"), 1);
        assert_eq!(depth.increment("database1"), 2);
        assert_eq!(depth.increment("database1_retry"), 3);
        assert_eq!(depth.increment("database1"), 3);
        assert_eq!(depth.depth("database1_x"), 3);
        assert_eq!(depth.depth("database2"), 1);
    }

    #[test]
    fn test_controller_finalize_and_fold_once() {
        let mut fb = controller();
        fb.record(Node::SELECT);
        fb.record(Node::SELECT);
        fb.finalize(true, true, Some("SELECT 1"));
        assert!(fb.current().features.is_empty());
        assert_eq!(fb.last_record().unwrap().features[&node(Node::SELECT)], 2);

        fb.compute_averages();
        fb.compute_averages();
        let tally = lock(&fb.shared().stats).tally(&node(Node::SELECT));
        assert_eq!(tally.attempts, 1);
    }

    #[test]
    fn test_failed_record_has_no_example() {
        let mut fb = controller();
        fb.record(Node::DELETE);
        fb.finalize(false, false, Some("DELETE FROM t0"));
        assert_eq!(fb.last_record().unwrap().example, None);
    }

    #[test]
    fn test_composite_snapshot_restore() {
        let mut fb = controller();
        let col = CompositeKey::Column("INT".into());
        fb.record(col.clone());
        let snapshot = fb.snapshot_composites();
        fb.record(CompositeKey::FunctionName("ABS".into()));
        fb.record(Node::CASE);
        fb.restore_composites(snapshot);
        let keys: Vec<String> = fb.current().features.keys().map(|f| f.to_string()).collect();
        assert_eq!(keys, vec!["CASE".to_string(), "COLUMN-INT".to_string()]);
    }

    #[test]
    fn test_duplicate_failure_skips() {
        let mut fb = controller();
        fb.record(Node::CASE);
        fb.finalize(false, true, None);
        assert_eq!(fb.check_duplicate(), Outcome::Done(()));

        fb.record(Node::CASE);
        fb.record(Node::IN);
        fb.finalize(false, true, None);
        assert_eq!(fb.check_duplicate(), Outcome::Skipped(Skip::Duplicate));
    }

    #[test]
    fn test_duplicate_requires_same_status() {
        let mut fb = controller();
        fb.record(Node::CASE);
        fb.finalize(true, true, Some("SELECT 1"));
        assert_eq!(fb.check_duplicate(), Outcome::Done(()));

        fb.record(Node::CASE);
        fb.record(Node::IN);
        fb.finalize(false, true, None);
        assert_eq!(fb.check_duplicate(), Outcome::Done(()));
    }
}
