//! Typed expression generation.
//!
//! Expressions grow until the session's depth limit or a low-probability
//! terminal roll. Each production is gated by the feedback controller and
//! records its node (and composite keys for functions and dialect
//! operators) only when it is actually emitted. Operands that turned out to
//! be NULL constants do not record argument or return composites: a NULL
//! argument says nothing about which types a function accepts.

use crate::ast::{ArithmeticOp, ComparisonOp, Constant, Expr, LogicalOp, PostfixOp, PrefixOp};
use crate::feature::{CompositeKey, HoleKind, Node, SyntaxFeature};
use crate::schema::DataType;
use crate::state::lock;

use super::Generator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BooleanShape {
    UnaryPrefix,
    Comparison,
    Logical,
    DialectOperator,
    UnaryPostfix,
    In,
    Between,
}

impl Generator<'_> {
    /// Top-level expression of type `ty`.
    pub fn generate_expression(&mut self, ty: &DataType) -> Expr {
        self.generate(ty, 0)
    }

    pub fn generate_predicate(&mut self) -> Expr {
        self.generate_expression(&DataType::Boolean)
    }

    pub(crate) fn generate(&mut self, ty: &DataType, depth: u32) -> Expr {
        self.generate_tracked(ty, depth).0
    }

    /// Expression plus whether it is a NULL-valued leaf.
    pub(crate) fn generate_tracked(&mut self, ty: &DataType, depth: u32) -> (Expr, bool) {
        if self.untyped_roll() {
            return (self.generate_untyped(depth), false);
        }
        if depth >= self.depth_limit() || self.rng.rather_low() {
            return self.generate_leaf(ty);
        }

        if self.rng.rather_low()
            && self.node_enabled(Node::FUNC)
            && let Some(expr) = self.generate_function(ty, depth)
        {
            return (expr, false);
        }
        if self.rng.rather_low() && self.node_enabled(Node::CAST) {
            return (self.generate_cast(ty, depth), false);
        }
        if self.rng.rather_low() && self.node_enabled(Node::CASE) {
            return (self.generate_case(ty, depth), false);
        }
        if self.engine.config.enable_extra_features
            && self.rng.rather_low()
            && self.node_enabled(Node::BINARY_OPERATOR)
            && let Some(expr) = self.generate_dialect_operator(ty, depth)
        {
            return (expr, false);
        }

        match ty {
            DataType::Boolean => self.generate_boolean(depth),
            DataType::Int => self.generate_int(depth),
            DataType::Varchar(_) => self.generate_string(depth),
            DataType::Dialect(_) => self.generate_leaf(ty),
        }
    }

    // ── Leaves ─────────────────────────────────────────────────────────────

    /// A compatible column on a coin flip, else a constant.
    pub(crate) fn generate_leaf(&mut self, ty: &DataType) -> (Expr, bool) {
        let compatible: Vec<(String, String)> = self
            .columns()
            .iter()
            .filter(|c| c.column.ty.is_compatible(ty))
            .map(|c| (c.table.clone(), c.column.name.clone()))
            .collect();
        if !compatible.is_empty() && self.rng.coin() {
            let index = self.rng.below(compatible.len());
            let (table, column) = compatible[index].clone();
            return (Expr::column(table, column), false);
        }
        self.generate_constant(ty)
    }

    pub(crate) fn generate_constant(&mut self, ty: &DataType) -> (Expr, bool) {
        if self.rng.rather_low() {
            if self.rng.small()
                && self.node_enabled(Node::FUNC)
                && let Some(call) = self.null_function_call()
            {
                return (call, true);
            }
            return (Expr::null(), true);
        }
        let constant = match ty {
            DataType::Int => Constant::Int(self.rng.int()),
            DataType::Boolean => Constant::Bool(self.rng.coin()),
            DataType::Varchar(_) => Constant::Str(self.rng.string()),
            DataType::Dialect(name) => {
                let literal = self.dialect_literal(name);
                let trimmed = literal.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("NULL") {
                    return (Expr::null(), true);
                }
                Constant::Raw(trimmed.to_string())
            }
        };
        (Expr::Constant(constant), false)
    }

    /// Literal for a dialect type from the type store.
    fn dialect_literal(&mut self, name: &str) -> String {
        let engine = self.engine;
        if !lock(&engine.catalog).types.is_available(name) {
            return "NULL".to_string();
        }
        let record = self.options.record_type_fragments;
        engine
            .stores
            .get(HoleKind::Type)
            .choose_with(name, self, record)
    }

    /// An enabled function applied to NULLs only.
    fn null_function_call(&mut self) -> Option<Expr> {
        let functions = self.enabled_functions(None);
        let (name, arity) = self.rng.pick(&functions)?.clone();
        self.record(CompositeKey::FunctionName(name.clone()));
        let args = (0..arity.unsigned_abs()).map(|_| Expr::null()).collect();
        Some(Expr::Function { name, args })
    }

    // ── Functions, casts, CASE ─────────────────────────────────────────────

    /// Functions whose name is enabled and, when `returning` is set, whose
    /// return composite for that type is enabled.
    fn enabled_functions(&self, returning: Option<&DataType>) -> Vec<(String, i32)> {
        let catalog = lock(&self.engine.catalog);
        catalog
            .function_names()
            .into_iter()
            .filter_map(|name| catalog.arity(&name).map(|arity| (name, arity)))
            .filter(|(name, _)| {
                self.feedback
                    .composite_option(&CompositeKey::FunctionName(name.clone()))
            })
            .filter(|(name, _)| match returning {
                Some(ty) => self.feedback.composite_option(&CompositeKey::FunctionReturn {
                    ty: ty.key_name().to_string(),
                    function: name.clone(),
                }),
                None => true,
            })
            .collect()
    }

    fn generate_function(&mut self, ty: &DataType, depth: u32) -> Option<Expr> {
        let functions = self.enabled_functions(Some(ty));
        let (name, arity) = self.rng.pick(&functions)?.clone();
        let count = if arity < 0 {
            arity.unsigned_abs() as usize + self.rng.small_number()
        } else {
            arity as usize
        };

        self.record(Node::FUNC);
        let mut args = Vec::with_capacity(count);
        let mut any_null = false;
        for index in 0..count {
            let preferred: Vec<DataType> = self
                .supported_types()
                .iter()
                .filter(|t| {
                    self.feedback
                        .option_or_false(&SyntaxFeature::Composite(CompositeKey::FunctionArg {
                            function: name.clone(),
                            index,
                            ty: t.key_name().to_string(),
                        }))
                })
                .cloned()
                .collect();
            let arg_ty = if preferred.is_empty() || self.rng.rather_low() {
                self.random_type()
            } else {
                let i = self.rng.below(preferred.len());
                preferred[i].clone()
            };
            let (arg, is_null) = self.generate_tracked(&arg_ty, depth + 1);
            if is_null {
                any_null = true;
            } else {
                self.record(CompositeKey::FunctionArg {
                    function: name.clone(),
                    index,
                    ty: arg_ty.key_name().to_string(),
                });
            }
            args.push(arg);
        }

        self.record(CompositeKey::FunctionName(name.clone()));
        if !any_null {
            self.record(CompositeKey::FunctionReturn {
                ty: ty.key_name().to_string(),
                function: name.clone(),
            });
        }
        Some(Expr::Function { name, args })
    }

    fn generate_cast(&mut self, ty: &DataType, depth: u32) -> Expr {
        self.record(Node::CAST);
        let from = self.random_type();
        let expr = self.generate(&from, depth + 1);
        Expr::Cast {
            expr: Box::new(expr),
            ty: ty.clone(),
        }
    }

    fn generate_case(&mut self, ty: &DataType, depth: u32) -> Expr {
        self.record(Node::CASE);
        let branches = 1 + self.rng.small_number();
        let whens = (0..branches)
            .map(|_| {
                let condition = self.generate(&DataType::Boolean, depth + 1);
                let value = self.generate(ty, depth + 1);
                (condition, value)
            })
            .collect();
        let otherwise = if self.rng.coin() {
            Some(Box::new(self.generate(ty, depth + 1)))
        } else {
            None
        };
        Expr::Case { whens, otherwise }
    }

    // ── Dialect operators ──────────────────────────────────────────────────

    fn generate_dialect_operator(&mut self, ty: &DataType, depth: u32) -> Option<Expr> {
        let candidates: Vec<String> = lock(&self.engine.catalog)
            .operators_returning(ty)
            .into_iter()
            .filter(|op| {
                self.feedback
                    .composite_option(&CompositeKey::BinOpName(op.clone()))
            })
            .collect();
        let op = self.rng.pick(&candidates)?.clone();

        let preferred: Vec<DataType> = self
            .supported_types()
            .iter()
            .filter(|t| {
                self.feedback
                    .option_or_false(&SyntaxFeature::Composite(CompositeKey::BinOp {
                        op: op.clone(),
                        ty: t.key_name().to_string(),
                    }))
            })
            .cloned()
            .collect();
        let operand_ty = if preferred.is_empty() || self.rng.rather_low() {
            self.random_type()
        } else {
            let i = self.rng.below(preferred.len());
            preferred[i].clone()
        };

        self.record(Node::BINARY_OPERATOR);
        self.record(CompositeKey::BinOpName(op.clone()));
        let (left, left_null) = self.generate_tracked(&operand_ty, depth + 1);
        let (right, right_null) = self.generate_tracked(&operand_ty, depth + 1);
        if !left_null && !right_null {
            self.record(CompositeKey::BinOp {
                op: op.clone(),
                ty: operand_ty.key_name().to_string(),
            });
        }
        Some(Expr::BinaryOperator {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    // ── Per-type productions ───────────────────────────────────────────────

    fn generate_boolean(&mut self, depth: u32) -> (Expr, bool) {
        let dialect_weight = if self.engine.config.enable_extra_features {
            lock(&self.engine.catalog).operator_count() as u32
        } else {
            0
        };
        let choices = [
            (BooleanShape::UnaryPrefix, Node::UNARY_PREFIX, 7),
            (
                BooleanShape::Comparison,
                Node::BINARY_COMPARISON,
                ComparisonOp::ALL.len() as u32,
            ),
            (BooleanShape::Logical, Node::BINARY_LOGICAL, 2),
            (BooleanShape::DialectOperator, Node::BINARY_OPERATOR, dialect_weight),
            (BooleanShape::UnaryPostfix, Node::UNARY_POSTFIX, PostfixOp::ALL.len() as u32),
            (BooleanShape::In, Node::IN, 1),
            (BooleanShape::Between, Node::BETWEEN, 1),
        ];
        let Some(shape) = self.pick_enabled(&choices) else {
            return self.generate_leaf(&DataType::Boolean);
        };

        let expr = match shape {
            BooleanShape::UnaryPrefix => {
                if !self.node_enabled(Node::UNOT) {
                    return self.generate_leaf(&DataType::Boolean);
                }
                self.record(Node::UNARY_PREFIX);
                self.record(Node::UNOT);
                Expr::not(self.generate(&DataType::Boolean, depth + 1))
            }
            BooleanShape::Comparison => {
                let Some(op) = self.pick_operator(ComparisonOp::ALL, ComparisonOp::node) else {
                    return self.generate_leaf(&DataType::Boolean);
                };
                self.record(Node::BINARY_COMPARISON);
                self.record(op.node());
                let ty = self.random_type();
                let left = self.generate(&ty, depth + 1);
                let right = self.generate(&ty, depth + 1);
                Expr::Comparison {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            BooleanShape::Logical => {
                let Some(op) = self.pick_operator(LogicalOp::ALL, LogicalOp::node) else {
                    return self.generate_leaf(&DataType::Boolean);
                };
                self.record(Node::BINARY_LOGICAL);
                self.record(op.node());
                let count = self.rng.small_number() + 2;
                let operands = (0..count)
                    .map(|_| self.generate(&DataType::Boolean, depth + 1))
                    .collect();
                Expr::Logical { op, operands }
            }
            BooleanShape::DialectOperator => {
                match self.generate_dialect_operator(&DataType::Boolean, depth) {
                    Some(expr) => expr,
                    None => return self.generate_leaf(&DataType::Boolean),
                }
            }
            BooleanShape::UnaryPostfix => {
                let Some(op) = self.pick_operator(PostfixOp::ALL, PostfixOp::node) else {
                    return self.generate_leaf(&DataType::Boolean);
                };
                self.record(Node::UNARY_POSTFIX);
                self.record(op.node());
                let ty = self.random_type();
                Expr::postfix(self.generate(&ty, depth + 1), op)
            }
            BooleanShape::In => {
                self.record(Node::IN);
                let ty = self.random_type();
                let expr = self.generate(&ty, depth + 1);
                let count = 1 + self.rng.small_number();
                let list = (0..count).map(|_| self.generate(&ty, depth + 1)).collect();
                Expr::In {
                    expr: Box::new(expr),
                    list,
                    negated: self.rng.coin(),
                }
            }
            BooleanShape::Between => {
                self.record(Node::BETWEEN);
                let ty = self.random_type();
                let expr = self.generate(&ty, depth + 1);
                let low = self.generate(&ty, depth + 1);
                let high = self.generate(&ty, depth + 1);
                Expr::Between {
                    expr: Box::new(expr),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated: self.rng.coin(),
                }
            }
        };
        (expr, false)
    }

    fn generate_int(&mut self, depth: u32) -> (Expr, bool) {
        let arithmetic = ArithmeticOp::ALL.len() as f64
            / (ArithmeticOp::ALL.len() + ComparisonOp::ALL.len()) as f64;
        if self.rng.probability(arithmetic) {
            if self.node_enabled(Node::BINARY_ARITHMETIC)
                && let Some(op) = self.pick_operator(ArithmeticOp::ALL, ArithmeticOp::node)
            {
                self.record(Node::BINARY_ARITHMETIC);
                self.record(op.node());
                let left = self.generate(&DataType::Int, depth + 1);
                let right = self.generate(&DataType::Int, depth + 1);
                return (
                    Expr::Arithmetic {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    false,
                );
            }
        } else {
            let numeric: Vec<PrefixOp> = PrefixOp::ALL
                .iter()
                .copied()
                .filter(|op| *op != PrefixOp::Not)
                .collect();
            if self.node_enabled(Node::UNARY_PREFIX)
                && let Some(op) = self.pick_operator(&numeric, PrefixOp::node)
            {
                self.record(Node::UNARY_PREFIX);
                self.record(op.node());
                let expr = self.generate(&DataType::Int, depth + 1);
                return (
                    Expr::Prefix {
                        op,
                        expr: Box::new(expr),
                    },
                    false,
                );
            }
        }
        self.generate_leaf(&DataType::Int)
    }

    fn generate_string(&mut self, depth: u32) -> (Expr, bool) {
        if self.rng.coin() && self.node_enabled(Node::OPCONCAT) {
            self.record(Node::BINARY_ARITHMETIC);
            self.record(Node::OPCONCAT);
            let ty = DataType::Varchar(None);
            let left = self.generate(&ty, depth + 1);
            let right = self.generate(&ty, depth + 1);
            return (
                Expr::Arithmetic {
                    op: ArithmeticOp::Concat,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                false,
            );
        }
        self.generate_leaf(&DataType::Varchar(None))
    }
}
