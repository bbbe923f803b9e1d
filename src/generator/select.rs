//! FROM clauses for oracle queries.

use crate::ast::{FromItem, JoinKind};
use crate::error::{Outcome, Skip};
use crate::feature::Node;
use crate::schema::{ColumnRef, Table};

use super::Generator;

const JOIN_KINDS: [JoinKind; 6] = [
    JoinKind::Inner,
    JoinKind::Left,
    JoinKind::Right,
    JoinKind::NaturalFull,
    JoinKind::NaturalLeft,
    JoinKind::NaturalRight,
];

/// Tables and joins an oracle query ranges over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryShape {
    pub from: Vec<FromItem>,
    pub columns: Vec<ColumnRef>,
}

impl QueryShape {
    /// Qualified projection of every column in scope.
    pub fn projection(&self) -> Vec<String> {
        self.columns.iter().map(ColumnRef::qualified).collect()
    }
}

fn column_refs(table: &Table) -> impl Iterator<Item = ColumnRef> + '_ {
    table.columns.iter().map(|c| ColumnRef {
        table: table.name.clone(),
        column: c.clone(),
    })
}

impl Generator<'_> {
    /// Pick a non-empty subset of tables and views, joining pairs while
    /// joins stay enabled. Columns of every chosen table are in scope
    /// afterwards.
    pub fn generate_query_shape(&mut self) -> Outcome<QueryShape> {
        let schema = self.schema;
        if schema.is_empty() {
            return Outcome::Skipped(Skip::EmptySchema);
        }
        let mut tables = self.rng.non_empty_subset(&schema.tables);
        self.rng.shuffle(&mut tables);
        let columns: Vec<ColumnRef> = tables.iter().flat_map(column_refs).collect();

        let mut from = Vec::new();
        while tables.len() >= 2 && self.node_enabled(Node::JOIN) && self.rng.rather_low() {
            let Some(kind) = self.pick_join_kind() else {
                break;
            };
            let (Some(left), Some(right)) = (tables.pop(), tables.pop()) else {
                break;
            };
            self.record(Node::JOIN);
            self.record(kind.node());
            let on = if kind.is_natural() {
                self.record(Node::NATURAL_JOIN);
                None
            } else {
                self.set_columns(column_refs(&left).chain(column_refs(&right)).collect());
                Some(self.generate_predicate())
            };
            from.push(FromItem::Join {
                left: left.name,
                right: right.name,
                kind,
                on,
            });
        }
        from.extend(tables.into_iter().map(|t| FromItem::Table(t.name)));

        self.set_columns(columns.clone());
        Outcome::Done(QueryShape { from, columns })
    }

    fn pick_join_kind(&mut self) -> Option<JoinKind> {
        let natural = self.node_enabled(Node::NATURAL_JOIN);
        let enabled: Vec<JoinKind> = JOIN_KINDS
            .iter()
            .copied()
            .filter(|k| natural || !k.is_natural())
            .filter(|k| self.node_enabled(k.node()))
            .collect();
        self.rng.pick(&enabled).copied()
    }
}
