//! Expressions built without type targeting.
//!
//! Operands are drawn from any supported type and combined through any
//! operator or function, so many of these fail. The session only turns the
//! mode on once most untyped statements succeed.

use crate::ast::{ArithmeticOp, ComparisonOp, Expr};
use crate::feature::Node;
use crate::state::lock;

use super::Generator;

#[derive(Debug, Clone, Copy)]
enum UntypedShape {
    DialectOperator,
    Function,
    Comparison,
    Arithmetic,
}

impl Generator<'_> {
    /// Whether this expression should be generated untyped.
    pub(crate) fn untyped_roll(&mut self) -> bool {
        self.engine.config.untyped_expressions
            && self.node_enabled(Node::UNTYPE_EXPR)
            && self.rng.small()
    }

    pub(crate) fn generate_untyped(&mut self, depth: u32) -> Expr {
        self.record(Node::UNTYPE_EXPR);
        self.untyped(depth)
    }

    fn untyped(&mut self, depth: u32) -> Expr {
        if depth >= self.depth_limit() || self.rng.rather_low() {
            let ty = self.random_type();
            return self.generate_leaf(&ty).0;
        }
        let shapes = [
            (UntypedShape::DialectOperator, 1),
            (UntypedShape::Function, 1),
            (UntypedShape::Comparison, 1),
            (UntypedShape::Arithmetic, 1),
        ];
        match self.rng.weighted(&shapes) {
            Some(UntypedShape::DialectOperator) => {
                let ops = lock(&self.engine.catalog).operator_names();
                match self.rng.pick(&ops).cloned() {
                    Some(op) => Expr::BinaryOperator {
                        op,
                        left: Box::new(self.untyped(depth + 1)),
                        right: Box::new(self.untyped(depth + 1)),
                    },
                    None => self.untyped_leaf(),
                }
            }
            Some(UntypedShape::Function) => {
                let functions = {
                    let catalog = lock(&self.engine.catalog);
                    catalog
                        .function_names()
                        .into_iter()
                        .filter_map(|name| catalog.arity(&name).map(|a| (name, a)))
                        .collect::<Vec<_>>()
                };
                match self.rng.pick(&functions).cloned() {
                    Some((name, arity)) => {
                        self.record(Node::UNTYPE_FUNC);
                        let count = arity.unsigned_abs() as usize;
                        let args = (0..count).map(|_| self.untyped(depth + 1)).collect();
                        Expr::Function { name, args }
                    }
                    None => self.untyped_leaf(),
                }
            }
            Some(UntypedShape::Comparison) => {
                let i = self.rng.below(ComparisonOp::ALL.len());
                Expr::Comparison {
                    op: ComparisonOp::ALL[i],
                    left: Box::new(self.untyped(depth + 1)),
                    right: Box::new(self.untyped(depth + 1)),
                }
            }
            Some(UntypedShape::Arithmetic) => {
                let i = self.rng.below(ArithmeticOp::ALL.len());
                Expr::Arithmetic {
                    op: ArithmeticOp::ALL[i],
                    left: Box::new(self.untyped(depth + 1)),
                    right: Box::new(self.untyped(depth + 1)),
                }
            }
            None => self.untyped_leaf(),
        }
    }

    fn untyped_leaf(&mut self) -> Expr {
        let ty = self.random_type();
        self.generate_leaf(&ty).0
    }
}
