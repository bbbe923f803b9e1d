//! Bug deduplication.
//!
//! [`BugHistory`] keeps the terminal record of every session that has been
//! reported. Only entries with the same status as the new record are
//! considered. The record is a duplicate when, checking each rule against
//! those entries before moving to the next:
//!
//! 1. both records have no non-meta features,
//! 2. the new feature set contains a non-empty past feature set,
//! 3. they share a fragment choice, or
//! 4. they share a function.

use std::collections::{BTreeMap, BTreeSet};

use crate::feature::SyntaxFeature;
use crate::feedback::ExecutionRecord;

/// Which rule matched a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupRule {
    TrivialConstant,
    Superset,
    SharedFragment,
    SharedFunction,
}

/// Session id → terminal record.
#[derive(Debug, Clone, Default)]
pub struct BugHistory {
    entries: BTreeMap<String, ExecutionRecord>,
}

impl BugHistory {
    pub fn insert(&mut self, session: &str, record: ExecutionRecord) {
        self.entries.insert(session.to_string(), record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, session: &str) -> Option<&ExecutionRecord> {
        self.entries.get(session)
    }

    /// First history entry the record duplicates.
    pub fn find_duplicate(&self, record: &ExecutionRecord) -> Option<&ExecutionRecord> {
        self.find_duplicate_with_rule(record).map(|(entry, _)| entry)
    }

    pub fn find_duplicate_with_rule(
        &self,
        record: &ExecutionRecord,
    ) -> Option<(&ExecutionRecord, DedupRule)> {
        let current: BTreeSet<&SyntaxFeature> = record.feature_set().collect();
        let past: Vec<(&ExecutionRecord, BTreeSet<&SyntaxFeature>)> = self
            .entries
            .values()
            .filter(|entry| entry.success == record.success)
            .map(|entry| (entry, entry.feature_set().collect()))
            .collect();

        if current.is_empty()
            && let Some((entry, _)) = past.iter().find(|(_, set)| set.is_empty())
        {
            return Some((*entry, DedupRule::TrivialConstant));
        }

        if let Some((entry, _)) = past
            .iter()
            .find(|(_, set)| !set.is_empty() && set.is_subset(&current))
        {
            return Some((*entry, DedupRule::Superset));
        }

        let shares = |pred: fn(&SyntaxFeature) -> bool| {
            past.iter().find(|(_, set)| {
                current
                    .iter()
                    .filter(|f| pred(f))
                    .any(|f| set.contains(f))
            })
        };

        if let Some((entry, _)) = shares(SyntaxFeature::is_fragment) {
            return Some((*entry, DedupRule::SharedFragment));
        }
        if let Some((entry, _)) = shares(SyntaxFeature::is_function_name) {
            return Some((*entry, DedupRule::SharedFunction));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{CompositeKey, FragmentKey, HoleKind, Node};

    fn rec(features: &[SyntaxFeature], success: bool) -> ExecutionRecord {
        let mut r = ExecutionRecord::new();
        for f in features {
            r.record(f.clone());
        }
        r.success = success;
        r
    }

    fn func(name: &str) -> SyntaxFeature {
        CompositeKey::FunctionName(name.into()).into()
    }

    #[test]
    fn test_empty_history_is_novel() {
        let history = BugHistory::default();
        assert!(history.find_duplicate(&rec(&[Node::CASE.into()], false)).is_none());
    }

    #[test]
    fn test_rule_trivial_constant() {
        let mut history = BugHistory::default();
        history.insert("database0", rec(&[Node::UNTYPE_EXPR.into()], false));

        let (_, rule) = history
            .find_duplicate_with_rule(&rec(&[], false))
            .unwrap();
        assert_eq!(rule, DedupRule::TrivialConstant);
        // different status does not match rule 1
        assert!(history.find_duplicate(&rec(&[], true)).is_none());
    }

    #[test]
    fn test_empty_entry_does_not_swallow_everything() {
        let mut history = BugHistory::default();
        history.insert("database0", rec(&[], false));
        assert!(history.find_duplicate(&rec(&[Node::CASE.into()], false)).is_none());
    }

    #[test]
    fn test_rule_superset() {
        let mut history = BugHistory::default();
        history.insert("database0", rec(&[Node::CASE.into(), Node::IN.into()], false));

        let candidate = rec(&[Node::CASE.into(), Node::IN.into(), Node::LIKE.into()], false);
        let (_, rule) = history.find_duplicate_with_rule(&candidate).unwrap();
        assert_eq!(rule, DedupRule::Superset);

        assert!(history.find_duplicate(&rec(&[Node::CASE.into()], false)).is_none());
    }

    #[test]
    fn test_rule_shared_fragment() {
        let frag: SyntaxFeature =
            FragmentKey::new(HoleKind::Table, "0", "UNLOGGED").into();
        let mut history = BugHistory::default();
        history.insert("database0", rec(&[frag.clone(), Node::JOIN.into()], false));

        let (_, rule) = history
            .find_duplicate_with_rule(&rec(&[frag, Node::CASE.into()], false))
            .unwrap();
        assert_eq!(rule, DedupRule::SharedFragment);
    }

    #[test]
    fn test_rule_shared_function() {
        let mut history = BugHistory::default();
        history.insert("database0", rec(&[func("ABS"), Node::JOIN.into()], false));

        let (_, rule) = history
            .find_duplicate_with_rule(&rec(&[func("ABS"), Node::CASE.into()], false))
            .unwrap();
        assert_eq!(rule, DedupRule::SharedFunction);
        assert!(history
            .find_duplicate(&rec(&[func("LOWER"), Node::CASE.into()], false))
            .is_none());
    }

    #[test]
    fn test_status_mismatch_never_matches() {
        let frag: SyntaxFeature = FragmentKey::new(HoleKind::Index, "1", "USING HASH").into();
        let mut history = BugHistory::default();
        history.insert("database0", rec(&[Node::CASE.into()], true));
        history.insert("database1", rec(&[frag.clone(), func("ABS")], true));

        let failing = rec(&[Node::CASE.into(), Node::IN.into(), frag.clone(), func("ABS")], false);
        assert!(history.find_duplicate(&failing).is_none());

        history.insert("database2", rec(&[Node::CASE.into()], false));
        let (entry, rule) = history.find_duplicate_with_rule(&failing).unwrap();
        assert_eq!(rule, DedupRule::Superset);
        assert!(!entry.success);
    }

    #[test]
    fn test_same_record_twice_is_duplicate() {
        let record = rec(&[Node::BETWEEN.into(), func("ABS")], false);
        let mut history = BugHistory::default();
        history.insert("database0", record.clone());
        assert!(history.find_duplicate(&record).is_some());
        assert!(history.find_duplicate(&record).is_some());
    }

    #[test]
    fn test_insert_replaces_per_session() {
        let mut history = BugHistory::default();
        history.insert("database0", rec(&[Node::CASE.into()], false));
        history.insert("database0", rec(&[Node::IN.into()], true));
        assert_eq!(history.len(), 1);
        assert!(history.get("database0").unwrap().success);
    }
}
