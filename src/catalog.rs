//! Dialect vocabulary: functions, binary operators and dialect types.
//!
//! The catalog starts from a small built-in seed that most SQL engines accept
//! and grows as the function, operator and type stores learn new entries.
//! Feedback decides which entries the generator may still use.

use std::collections::BTreeMap;

use crate::schema::{DataType, TypeRegistry};

/// Functions most engines ship, with their arity. Negative arity means
/// variadic with at least `|arity|` arguments.
const BUILTIN_FUNCTIONS: &[(&str, i32)] = &[
    ("ABS", 1),
    ("LENGTH", 1),
    ("LOWER", 1),
    ("UPPER", 1),
    ("TRIM", 1),
    ("ROUND", 1),
    ("SIGN", 1),
    ("NULLIF", 2),
    ("MOD", 2),
    ("REPLACE", 3),
    ("SUBSTR", 3),
    ("COALESCE", -1),
    ("CONCAT", -1),
    ("GREATEST", -1),
    ("LEAST", -1),
];

/// Operators assumed before anything is learned; all return BOOLEAN.
const BUILTIN_OPERATORS: &[&str] = &["<>", "!=", "<", ">", "<=", ">=", "AND", "OR"];

#[derive(Debug, Clone)]
pub struct Catalog {
    functions: BTreeMap<String, i32>,
    operators: BTreeMap<String, DataType>,
    pub types: TypeRegistry,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        let functions = BUILTIN_FUNCTIONS
            .iter()
            .map(|(name, arity)| (name.to_string(), *arity))
            .collect();
        let operators = BUILTIN_OPERATORS
            .iter()
            .map(|op| (op.to_string(), DataType::Boolean))
            .collect();
        Self {
            functions,
            operators,
            types: TypeRegistry::default(),
        }
    }

    /// Catalog without any seed entries.
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
            operators: BTreeMap::new(),
            types: TypeRegistry::default(),
        }
    }

    // ── Functions ──────────────────────────────────────────────────────

    pub fn add_function(&mut self, name: &str, arity: i32) {
        let name = name.trim().to_uppercase();
        if name.is_empty() {
            return;
        }
        self.functions.insert(name, arity);
    }

    pub fn arity(&self, name: &str) -> Option<i32> {
        self.functions.get(name).copied()
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    /// `(name, fixed argument count)` for feedback re-validation.
    pub fn function_signatures(&self) -> Vec<(String, usize)> {
        self.functions
            .iter()
            .map(|(name, arity)| (name.clone(), arity.unsigned_abs() as usize))
            .collect()
    }

    // ── Operators ──────────────────────────────────────────────────────

    pub fn add_operator(&mut self, op: &str, returns: DataType) {
        let op = op.trim();
        if op.is_empty() {
            return;
        }
        self.operators.insert(op.to_string(), returns);
    }

    /// Operators whose result is compatible with `ty`.
    pub fn operators_returning(&self, ty: &DataType) -> Vec<String> {
        self.operators
            .iter()
            .filter(|(_, ret)| ret.is_compatible(ty))
            .map(|(op, _)| op.clone())
            .collect()
    }

    pub fn operator_names(&self) -> Vec<String> {
        self.operators.keys().cloned().collect()
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    // ── Types ──────────────────────────────────────────────────────────

    /// Primitive types plus every available dialect type.
    pub fn supported_types(&self, with_dialect: bool) -> Vec<DataType> {
        let mut types = DataType::PRIMITIVES.to_vec();
        if with_dialect {
            types.extend(self.types.available_types());
        }
        types
    }

    /// Registry names of [`Catalog::supported_types`].
    pub fn supported_type_names(&self, with_dialect: bool) -> Vec<String> {
        self.supported_types(with_dialect)
            .iter()
            .map(|t| t.key_name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_seed() {
        let catalog = Catalog::new();
        assert_eq!(catalog.arity("ABS"), Some(1));
        assert_eq!(catalog.arity("COALESCE"), Some(-1));
        assert_eq!(catalog.operators_returning(&DataType::Boolean).len(), 8);
        assert!(catalog.operators_returning(&DataType::Int).is_empty());
    }

    #[test]
    fn test_function_names_upper_cased() {
        let mut catalog = Catalog::empty();
        catalog.add_function(" sqrt ", 1);
        catalog.add_function("", 1);
        assert_eq!(catalog.function_names(), vec!["SQRT".to_string()]);
    }

    #[test]
    fn test_signatures_use_absolute_arity() {
        let mut catalog = Catalog::empty();
        catalog.add_function("CONCAT", -2);
        assert_eq!(catalog.function_signatures(), vec![("CONCAT".to_string(), 2)]);
    }

    #[test]
    fn test_learned_operator() {
        let mut catalog = Catalog::empty();
        catalog.add_operator("||", DataType::Varchar(None));
        catalog.add_operator("+", DataType::Int);
        assert_eq!(
            catalog.operators_returning(&DataType::Varchar(Some(500))),
            vec!["||".to_string()]
        );
    }

    #[test]
    fn test_supported_types_include_available_dialect_types() {
        let mut catalog = Catalog::new();
        catalog.types.register("DATE");
        catalog.types.register("UUID");
        catalog.types.set_available("UUID", false);
        assert_eq!(
            catalog.supported_type_names(true),
            vec!["INT", "BOOLEAN", "STRING", "DATE"]
        );
        assert_eq!(catalog.supported_type_names(false).len(), 3);
    }
}
