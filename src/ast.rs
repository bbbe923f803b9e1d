//! Expression and query trees.
//!
//! Generated expressions are fully parenthesised when rendered so that
//! operator precedence differences between dialects never change meaning.

use std::fmt;

use crate::feature::Node;
use crate::schema::DataType;

// ── Operators ──────────────────────────────────────────────────────────────

macro_rules! operator_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => ($node:ident, $sql:literal)),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            pub fn node(&self) -> Node {
                match self {
                    $($name::$variant => Node::$node),*
                }
            }

            pub fn as_sql(&self) -> &'static str {
                match self {
                    $($name::$variant => $sql),*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_sql())
            }
        }
    };
}

operator_enum! {
    /// Unary prefix operators.
    PrefixOp {
        Not => (UNOT, "NOT"),
        Plus => (UPLUS, "+"),
        Minus => (UMINUS, "-"),
        SquareRoot => (USQT_ROOT, "|/"),
        AbsVal => (UABS_VAL, "@"),
        BitNot => (UBIT_NOT, "~"),
        CubeRoot => (UCUBE_ROOT, "||/"),
    }
}

operator_enum! {
    /// Postfix truth and null checks.
    PostfixOp {
        IsNull => (IS_NULL, "IS NULL"),
        IsNotNull => (IS_NOT_NULL, "IS NOT NULL"),
        IsTrue => (IS_TRUE, "IS TRUE"),
        IsFalse => (IS_FALSE, "IS FALSE"),
        IsNotUnknown => (IS_NOT_UNKNOWN, "IS NOT UNKNOWN"),
    }
}

operator_enum! {
    /// Binary comparisons returning BOOLEAN.
    ComparisonOp {
        Equals => (EQUALS, "="),
        Greater => (GREATER, ">"),
        GreaterEquals => (GREATER_EQUALS, ">="),
        Smaller => (SMALLER, "<"),
        SmallerEquals => (SMALLER_EQUALS, "<="),
        NotEquals => (NOT_EQUALS, "!="),
        NotEquals2 => (NOT_EQUALS2, "<>"),
        Like => (LIKE, "LIKE"),
        NotLike => (NOT_LIKE, "NOT LIKE"),
        Distinct => (DISTINCT, "IS DISTINCT FROM"),
        NotDistinct => (NOT_DISTINCT, "IS NOT DISTINCT FROM"),
        Is => (IS, "IS"),
        IsNot => (IS_NOT, "IS NOT"),
        Equals2 => (EQUALS2, "=="),
    }
}

operator_enum! {
    /// Binary arithmetic and bitwise operators.
    ArithmeticOp {
        Add => (OPADD, "+"),
        Sub => (OPSUB, "-"),
        Mult => (OPMULT, "*"),
        Div => (OPDIV, "/"),
        Mod => (OPMOD, "%"),
        Concat => (OPCONCAT, "||"),
        BitAnd => (OPAND, "&"),
        BitOr => (OPOR, "|"),
        LeftShift => (OPLSHIFT, "<<"),
        RightShift => (OPRSHIFT, ">>"),
        DivKeyword => (OPDIV_STR, "DIV"),
        ModKeyword => (OPMOD_STR, "MOD"),
        BitXor => (OPBITWISE_XOR, "^"),
    }
}

operator_enum! {
    LogicalOp {
        And => (LOPAND, "AND"),
        Or => (LOPOR, "OR"),
    }
}

// ── Expressions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Null,
    Int(i64),
    Bool(bool),
    Str(String),
    /// Dialect literal rendered by the type store.
    Raw(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => f.write_str("NULL"),
            Constant::Int(v) => write!(f, "{v}"),
            Constant::Bool(true) => f.write_str("TRUE"),
            Constant::Bool(false) => f.write_str("FALSE"),
            Constant::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Constant::Raw(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Constant(Constant),
    /// Qualified column reference.
    Column { table: String, column: String },
    Function { name: String, args: Vec<Expr> },
    Cast { expr: Box<Expr>, ty: DataType },
    Case {
        whens: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    /// Dialect binary operator from the operator catalog.
    BinaryOperator {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Prefix { op: PrefixOp, expr: Box<Expr> },
    Postfix { op: PostfixOp, expr: Box<Expr> },
    Comparison {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `a op b op c ...`, at least two operands.
    Logical { op: LogicalOp, operands: Vec<Expr> },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
}

impl Expr {
    pub fn null() -> Self {
        Expr::Constant(Constant::Null)
    }

    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Prefix {
            op: PrefixOp::Not,
            expr: Box::new(expr),
        }
    }

    pub fn postfix(expr: Expr, op: PostfixOp) -> Self {
        Expr::Postfix {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, Expr::Constant(Constant::Null))
    }

    /// Nesting depth; leaves are 0.
    pub fn depth(&self) -> usize {
        let children: Vec<&Expr> = match self {
            Expr::Constant(_) | Expr::Column { .. } => Vec::new(),
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::Cast { expr, .. } | Expr::Prefix { expr, .. } | Expr::Postfix { expr, .. } => {
                vec![&**expr]
            }
            Expr::Case { whens, otherwise } => whens
                .iter()
                .flat_map(|(c, v)| [c, v])
                .chain(otherwise.as_deref())
                .collect(),
            Expr::BinaryOperator { left, right, .. }
            | Expr::Comparison { left, right, .. }
            | Expr::Arithmetic { left, right, .. } => vec![&**left, &**right],
            Expr::Logical { operands, .. } => operands.iter().collect(),
            Expr::In { expr, list, .. } => std::iter::once(&**expr).chain(list).collect(),
            Expr::Between {
                expr, low, high, ..
            } => vec![&**expr, &**low, &**high],
        };
        children
            .into_iter()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(c) => c.fmt(f),
            Expr::Column { table, column } => write!(f, "{table}.{column}"),
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Cast { expr, ty } => write!(f, "CAST({expr} AS {ty})"),
            Expr::Case { whens, otherwise } => {
                f.write_str("(CASE")?;
                for (cond, value) in whens {
                    write!(f, " WHEN {cond} THEN {value}")?;
                }
                if let Some(e) = otherwise {
                    write!(f, " ELSE {e}")?;
                }
                f.write_str(" END)")
            }
            Expr::BinaryOperator { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::Prefix { op, expr } => write!(f, "({op} {expr})"),
            Expr::Postfix { op, expr } => write!(f, "({expr} {op})"),
            Expr::Comparison { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::Arithmetic { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::Logical { op, operands } => {
                f.write_str("(")?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {op} ")?;
                    }
                    write!(f, "{operand}")?;
                }
                f.write_str(")")
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "({expr}{not} IN (")?;
                write_list(f, list)?;
                f.write_str("))")
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "({expr}{not} BETWEEN {low} AND {high})")
            }
        }
    }
}

// ── Queries ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    NaturalFull,
    NaturalLeft,
    NaturalRight,
}

impl JoinKind {
    pub fn node(&self) -> Node {
        match self {
            JoinKind::Inner => Node::INNER_JOIN,
            JoinKind::Left => Node::LEFT_JOIN,
            JoinKind::Right => Node::RIGHT_JOIN,
            JoinKind::NaturalFull => Node::FULL_NATURAL_JOIN,
            JoinKind::NaturalLeft => Node::LEFT_NATURAL_JOIN,
            JoinKind::NaturalRight => Node::RIGHT_NATURAL_JOIN,
        }
    }

    pub fn is_natural(&self) -> bool {
        matches!(
            self,
            JoinKind::NaturalFull | JoinKind::NaturalLeft | JoinKind::NaturalRight
        )
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::NaturalFull => "NATURAL FULL JOIN",
            JoinKind::NaturalLeft => "NATURAL LEFT JOIN",
            JoinKind::NaturalRight => "NATURAL RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromItem {
    Table(String),
    Join {
        left: String,
        right: String,
        kind: JoinKind,
        on: Option<Expr>,
    },
}

impl fmt::Display for FromItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FromItem::Table(name) => f.write_str(name),
            FromItem::Join {
                left,
                right,
                kind,
                on,
            } => {
                write!(f, "{left} {} {right}", kind.as_sql())?;
                if let Some(on) = on {
                    write!(f, " ON {on}")?;
                }
                Ok(())
            }
        }
    }
}

/// `SELECT <projection> FROM <from> [WHERE ..] [ORDER BY ..]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    /// Rendered projection items.
    pub projection: Vec<String>,
    pub from: Vec<FromItem>,
    pub filter: Option<Expr>,
    pub order_by: Vec<Expr>,
}

impl Select {
    pub fn new(projection: Vec<String>, from: Vec<FromItem>) -> Self {
        Self {
            projection,
            from,
            filter: None,
            order_by: Vec::new(),
        }
    }

    pub fn with_filter(&self, filter: Expr) -> Self {
        Self {
            filter: Some(filter),
            ..self.clone()
        }
    }

    pub fn without_order(&self) -> Self {
        Self {
            order_by: Vec::new(),
            ..self.clone()
        }
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {} FROM ", self.projection.join(", "))?;
        for (i, item) in self.from.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{item}")?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" ORDER BY ")?;
            write_list(f, &self.order_by)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Expr {
        Expr::Constant(Constant::Int(v))
    }

    #[test]
    fn test_operator_tables() {
        assert_eq!(PrefixOp::ALL.len(), 7);
        assert_eq!(PostfixOp::ALL.len(), 5);
        assert_eq!(ComparisonOp::ALL.len(), 14);
        assert_eq!(ArithmeticOp::ALL.len(), 13);
        assert_eq!(LogicalOp::ALL.len(), 2);
        assert_eq!(ComparisonOp::NotEquals2.node(), Node::NOT_EQUALS2);
    }

    #[test]
    fn test_string_constant_escaping() {
        assert_eq!(Constant::Str("it's".into()).to_string(), "'it''s'");
    }

    #[test]
    fn test_expression_rendering() {
        let e = Expr::Logical {
            op: LogicalOp::And,
            operands: vec![
                Expr::Comparison {
                    op: ComparisonOp::Greater,
                    left: Box::new(Expr::column("t0", "c0")),
                    right: Box::new(int(0)),
                },
                Expr::postfix(Expr::column("t0", "c1"), PostfixOp::IsNull),
            ],
        };
        assert_eq!(e.to_string(), "((t0.c0 > 0) AND (t0.c1 IS NULL))");
    }

    #[test]
    fn test_in_between_case_rendering() {
        let in_list = Expr::In {
            expr: Box::new(int(1)),
            list: vec![int(2), Expr::null()],
            negated: true,
        };
        assert_eq!(in_list.to_string(), "(1 NOT IN (2, NULL))");

        let between = Expr::Between {
            expr: Box::new(int(1)),
            low: Box::new(int(0)),
            high: Box::new(int(2)),
            negated: false,
        };
        assert_eq!(between.to_string(), "(1 BETWEEN 0 AND 2)");

        let case = Expr::Case {
            whens: vec![(Expr::Constant(Constant::Bool(true)), int(1))],
            otherwise: Some(Box::new(int(2))),
        };
        assert_eq!(case.to_string(), "(CASE WHEN TRUE THEN 1 ELSE 2 END)");
    }

    #[test]
    fn test_depth() {
        assert_eq!(int(1).depth(), 0);
        let nested = Expr::not(Expr::not(int(1)));
        assert_eq!(nested.depth(), 2);
    }

    #[test]
    fn test_select_rendering() {
        let select = Select::new(
            vec!["t0.c0".into()],
            vec![
                FromItem::Table("t0".into()),
                FromItem::Join {
                    left: "t1".into(),
                    right: "t2".into(),
                    kind: JoinKind::NaturalLeft,
                    on: None,
                },
            ],
        )
        .with_filter(Expr::Constant(Constant::Bool(true)));
        assert_eq!(
            select.to_string(),
            "SELECT t0.c0 FROM t0, t1 NATURAL LEFT JOIN t2 WHERE TRUE"
        );
    }
}
