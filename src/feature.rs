//! Syntax feature keys.
//!
//! Every decision the generator makes is identified by a [`SyntaxFeature`]:
//! a static [`Node`] tag, a structured [`CompositeKey`], or a
//! [`FragmentKey`] naming one learned template. Keys are plain data with
//! derived `Eq`/`Hash`/`Ord`, so the same logical choice always lands on the
//! same statistics entry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FuzzError;

// ── Static tags ────────────────────────────────────────────────────────────

macro_rules! nodes {
    ($($variant:ident),* $(,)?) => {
        /// Closed set of statement, clause, expression, operator and oracle tags.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[allow(non_camel_case_types)]
        pub enum Node {
            $($variant),*
        }

        impl Node {
            /// Every tag, in declaration order.
            pub const ALL: &'static [Node] = &[$(Node::$variant),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Node::$variant => stringify!($variant)),*
                }
            }

            /// Look a tag up by its registry name.
            #[allow(clippy::should_implement_trait)]
            pub fn from_str(s: &str) -> Result<Self, FuzzError> {
                match s.trim() {
                    $(stringify!($variant) => Ok(Node::$variant),)*
                    other => Err(FuzzError::UnknownFeature(other.to_string())),
                }
            }
        }
    };
}

nodes! {
    // meta
    UNTYPE_EXPR,
    // statements
    CREATE_TABLE, CREATE_INDEX, INSERT, SELECT, UPDATE, DELETE, CREATE_VIEW,
    EXPLAIN, ANALYZE, VACUUM, ALTER_TABLE, CREATE_DATABASE, GENERAL_COMMAND,
    // clauses
    UNIQUE_INDEX, UPDATE_WHERE, PRIMARY_KEY, COLUMN_NUM, COLUMN_INT,
    COLUMN_BOOLEAN, COLUMN_STRING, JOIN, INNER_JOIN, LEFT_JOIN, RIGHT_JOIN,
    NATURAL_JOIN, LEFT_NATURAL_JOIN, RIGHT_NATURAL_JOIN, FULL_NATURAL_JOIN,
    SUBQUERY,
    // expressions
    UNARY_POSTFIX, UNARY_PREFIX, BINARY_COMPARISON, BINARY_LOGICAL,
    BINARY_ARITHMETIC, CAST, FUNC, BETWEEN, CASE, IN, COLLATE, LIKE_ESCAPE,
    UNTYPE_FUNC, CAST_FUNC, CAST_COLON, IS_NULL, IS_NOT_NULL, IS_TRUE,
    IS_FALSE, IS_NOT_UNKNOWN, BINARY_OPERATOR,
    // unary prefix operators
    UNOT, UPLUS, UMINUS, USQT_ROOT, UABS_VAL, UBIT_NOT, UCUBE_ROOT,
    // comparison operators
    EQUALS, GREATER, GREATER_EQUALS, SMALLER, SMALLER_EQUALS, NOT_EQUALS,
    NOT_EQUALS2, LIKE, NOT_LIKE, DISTINCT, NOT_DISTINCT, IS, IS_NOT, EQUALS2,
    // arithmetic operators
    OPADD, OPSUB, OPMULT, OPDIV, OPMOD, OPCONCAT, OPAND, OPOR, OPLSHIFT,
    OPRSHIFT, OPDIV_STR, OPMOD_STR, OPBITWISE_XOR,
    // logical operators
    LOPAND, LOPOR,
    // oracles
    WHERE, NOREC, HAVING,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Fragment holes ─────────────────────────────────────────────────────────

/// Category of grammar hole served by one fragment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HoleKind {
    Table,
    Index,
    Statement,
    Type,
    Function,
    Operator,
}

impl HoleKind {
    pub const ALL: [HoleKind; 6] = [
        HoleKind::Table,
        HoleKind::Index,
        HoleKind::Statement,
        HoleKind::Type,
        HoleKind::Function,
        HoleKind::Operator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HoleKind::Table => "TABLE",
            HoleKind::Index => "INDEX",
            HoleKind::Statement => "STATEMENT",
            HoleKind::Type => "TYPE",
            HoleKind::Function => "FUNCTION",
            HoleKind::Operator => "OPERATOR",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, FuzzError> {
        match s.trim().to_uppercase().as_str() {
            "TABLE" => Ok(HoleKind::Table),
            "INDEX" => Ok(HoleKind::Index),
            "STATEMENT" => Ok(HoleKind::Statement),
            "TYPE" => Ok(HoleKind::Type),
            "FUNCTION" => Ok(HoleKind::Function),
            "OPERATOR" => Ok(HoleKind::Operator),
            other => Err(FuzzError::UnknownFeature(format!("hole kind {other}"))),
        }
    }

    /// Name of the override file for this hole under the dialect directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            HoleKind::Table => "tablegenerator.txt",
            HoleKind::Index => "indexgenerator.txt",
            HoleKind::Statement => "dmlgenerator.txt",
            HoleKind::Type => "typegenerator.txt",
            HoleKind::Function => "functions.txt",
            HoleKind::Operator => "operators.txt",
        }
    }
}

impl fmt::Display for HoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Composite keys ─────────────────────────────────────────────────────────

/// Dynamically named feature built from dialect vocabulary.
///
/// Type components hold the type's registry name (`INT`, `BOOLEAN`,
/// `STRING` or a dialect type such as `DATE`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompositeKey {
    /// The function is usable at all.
    FunctionName(String),
    /// Argument `index` of `function` accepts values of type `ty`.
    FunctionArg {
        function: String,
        index: usize,
        ty: String,
    },
    /// `function` returns type `ty`.
    FunctionReturn { ty: String, function: String },
    /// The binary operator is usable at all.
    BinOpName(String),
    /// `op` accepts operands of type `ty`.
    BinOp { op: String, ty: String },
    /// Columns of type `ty` can be created.
    Column(String),
}

impl CompositeKey {
    /// Variant tag, used as the `Key` column of the statistics export.
    pub fn tag(&self) -> &'static str {
        match self {
            CompositeKey::FunctionName(_) => "FunctionName",
            CompositeKey::FunctionArg { .. } => "FunctionArg",
            CompositeKey::FunctionReturn { .. } => "FunctionReturn",
            CompositeKey::BinOpName(_) => "BinOpName",
            CompositeKey::BinOp { .. } => "BinOp",
            CompositeKey::Column(_) => "Column",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }

    pub fn from_json(text: &str) -> Result<Self, FuzzError> {
        serde_json::from_str(text)
            .map_err(|e| FuzzError::MalformedConfigRow(format!("composite '{text}': {e}")))
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeKey::FunctionName(name) => write!(f, "FUNCTION-{name}"),
            CompositeKey::FunctionArg {
                function,
                index,
                ty,
            } => write!(f, "{function}-{index}-{ty}"),
            CompositeKey::FunctionReturn { ty, function } => write!(f, "{ty}-{function}"),
            CompositeKey::BinOpName(op) => write!(f, "BINOP-{op}"),
            CompositeKey::BinOp { op, ty } => write!(f, "BINOP-{op}-{ty}"),
            CompositeKey::Column(ty) => write!(f, "COLUMN-{ty}"),
        }
    }
}

// ── Fragment choices ───────────────────────────────────────────────────────

/// One template within one hole of one store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentKey {
    pub hole: HoleKind,
    pub key: String,
    /// Template source with `<VAR>` markers.
    pub template: String,
}

impl FragmentKey {
    pub fn new(hole: HoleKind, key: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            hole,
            key: key.into(),
            template: template.into(),
        }
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.hole, self.key, self.template)
    }
}

// ── Unified key ────────────────────────────────────────────────────────────

/// Which warm-up threshold and quick-start flag apply to a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Node,
    Composite,
    Fragment,
}

/// Key identifying one generator decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyntaxFeature {
    Node(Node),
    Composite(CompositeKey),
    Fragment(FragmentKey),
}

impl SyntaxFeature {
    pub fn category(&self) -> Category {
        match self {
            SyntaxFeature::Node(_) => Category::Node,
            SyntaxFeature::Composite(_) => Category::Composite,
            SyntaxFeature::Fragment(_) => Category::Fragment,
        }
    }

    /// Meta features steer the generator but say nothing about the statement.
    pub fn is_meta(&self) -> bool {
        matches!(self, SyntaxFeature::Node(Node::UNTYPE_EXPR))
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self, SyntaxFeature::Fragment(_))
    }

    pub fn is_function_name(&self) -> bool {
        matches!(
            self,
            SyntaxFeature::Composite(CompositeKey::FunctionName(_))
        )
    }
}

impl From<Node> for SyntaxFeature {
    fn from(node: Node) -> Self {
        SyntaxFeature::Node(node)
    }
}

impl From<CompositeKey> for SyntaxFeature {
    fn from(key: CompositeKey) -> Self {
        SyntaxFeature::Composite(key)
    }
}

impl From<FragmentKey> for SyntaxFeature {
    fn from(key: FragmentKey) -> Self {
        SyntaxFeature::Fragment(key)
    }
}

impl fmt::Display for SyntaxFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxFeature::Node(n) => n.fmt(f),
            SyntaxFeature::Composite(c) => c.fmt(f),
            SyntaxFeature::Fragment(k) => k.fmt(f),
        }
    }
}
