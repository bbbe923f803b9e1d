//! Data types and the session's view of the database schema.
//!
//! The schema is tracked locally rather than read back from the target:
//! every DDL statement publishes a [`SchemaDelta`] that the session applies
//! only once the statement has executed successfully.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;

// ── Types ──────────────────────────────────────────────────────────────────

/// Column and expression type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Int,
    Boolean,
    /// `VARCHAR`, or `VARCHAR(n)` with a length.
    Varchar(Option<u32>),
    /// Dialect type learned from the type store, by upper-cased name.
    Dialect(String),
}

impl DataType {
    /// Stable name used in feature keys and store keys.
    pub fn key_name(&self) -> &str {
        match self {
            DataType::Int => "INT",
            DataType::Boolean => "BOOLEAN",
            DataType::Varchar(_) => "STRING",
            DataType::Dialect(name) => name,
        }
    }

    /// Resolve a name as written in configuration or learned fragments.
    pub fn from_name(name: &str) -> DataType {
        let upper = name.trim().to_uppercase();
        match upper.as_str() {
            "INT" | "INTEGER" => DataType::Int,
            "BOOLEAN" | "BOOL" => DataType::Boolean,
            "VARCHAR" | "STRING" | "TEXT" => DataType::Varchar(None),
            _ => {
                if let Some(len) = upper
                    .strip_prefix("VARCHAR(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|n| n.trim().parse().ok())
                {
                    DataType::Varchar(Some(len))
                } else {
                    DataType::Dialect(upper)
                }
            }
        }
    }

    pub fn is_dialect(&self) -> bool {
        matches!(self, DataType::Dialect(_))
    }

    /// All strings are compatible with each other; every other type only
    /// with itself.
    pub fn is_compatible(&self, other: &DataType) -> bool {
        match (self, other) {
            (DataType::Varchar(_), DataType::Varchar(_)) => true,
            (a, b) => a == b,
        }
    }

    /// Column type for a new primitive column.
    pub fn random_column_type<R: Rng>(primitive: &DataType, rng: &mut R) -> DataType {
        match primitive {
            DataType::Varchar(_) => {
                if rng.gen_bool(0.5) {
                    DataType::Varchar(None)
                } else {
                    DataType::Varchar(Some(500))
                }
            }
            other => other.clone(),
        }
    }

    pub const PRIMITIVES: [DataType; 3] = [DataType::Int, DataType::Boolean, DataType::Varchar(None)];
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int => f.write_str("INT"),
            DataType::Boolean => f.write_str("BOOLEAN"),
            DataType::Varchar(None) => f.write_str("VARCHAR"),
            DataType::Varchar(Some(n)) => write!(f, "VARCHAR({n})"),
            DataType::Dialect(name) => f.write_str(name),
        }
    }
}

/// Dialect types known to the type store.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    entries: BTreeMap<String, TypeEntry>,
    next_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeEntry {
    pub id: u32,
    pub available: bool,
}

impl TypeRegistry {
    /// Register a dialect type, returning its id. New types start available.
    pub fn register(&mut self, name: &str) -> u32 {
        let name = name.trim().to_uppercase();
        let next_id = &mut self.next_id;
        self.entries
            .entry(name)
            .or_insert_with(|| {
                let id = *next_id;
                *next_id += 1;
                TypeEntry {
                    id,
                    available: true,
                }
            })
            .id
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.trim().to_uppercase())
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.entries
            .get(&name.trim().to_uppercase())
            .is_some_and(|e| e.available)
    }

    pub fn set_available(&mut self, name: &str, available: bool) {
        if let Some(entry) = self.entries.get_mut(&name.trim().to_uppercase()) {
            entry.available = available;
        }
    }

    pub fn id(&self, name: &str) -> Option<u32> {
        self.entries.get(&name.trim().to_uppercase()).map(|e| e.id)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Available dialect types that are not spellings of a primitive.
    pub fn available_types(&self) -> Vec<DataType> {
        self.entries
            .iter()
            .filter(|(_, e)| e.available)
            .map(|(name, _)| DataType::from_name(name))
            .filter(DataType::is_dialect)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Schema ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: DataType,
    pub is_primary: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self {
            name: name.into(),
            ty,
            is_primary: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<String>,
    pub is_view: bool,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
            is_view: false,
        }
    }

    pub fn view(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            is_view: true,
            ..Self::new(name, columns)
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Qualified column list, `t0.c0, t0.c1`.
    pub fn qualified_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| format!("{}.{}", self.name, c.name))
            .collect()
    }

    /// First unused `c<i>` column name.
    pub fn free_column_name(&self) -> String {
        (0..)
            .map(|i| format!("c{i}"))
            .find(|name| self.column(name).is_none())
            .unwrap_or_else(|| format!("c{}", self.columns.len()))
    }

    /// First unused `<table>i<n>` index name.
    pub fn free_index_name(&self) -> String {
        (0..)
            .map(|i| format!("{}i{i}", self.name))
            .find(|name| !self.indexes.contains(name))
            .unwrap_or_else(|| format!("{}i{}", self.name, self.indexes.len()))
    }
}

/// Column reference with its owning table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: String,
    pub column: Column,
}

impl ColumnRef {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table, self.column.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub tables: Vec<Table>,
}

impl Schema {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn base_tables(&self) -> Vec<&Table> {
        self.tables.iter().filter(|t| !t.is_view).collect()
    }

    pub fn views(&self) -> Vec<&Table> {
        self.tables.iter().filter(|t| t.is_view).collect()
    }

    pub fn remove(&mut self, name: &str) {
        self.tables.retain(|t| t.name != name);
    }

    /// First name `<prefix><i>` not in use, starting at `start`.
    pub fn free_name(&self, prefix: &str, start: usize) -> String {
        (start..)
            .map(|i| format!("{prefix}{i}"))
            .find(|name| self.table(name).is_none())
            .unwrap_or_else(|| format!("{prefix}{}", self.tables.len() + start))
    }

    pub fn random_base_table<R: Rng>(&self, rng: &mut R) -> Option<&Table> {
        let tables = self.base_tables();
        if tables.is_empty() {
            None
        } else {
            Some(tables[rng.gen_range(0..tables.len())])
        }
    }
}

/// Schema change published by a DDL statement, applied after it succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDelta {
    AddTable(Table),
    AddColumn { table: String, column: Column },
    AlterColumn { table: String, column: String, ty: DataType },
    DropColumn { table: String, column: String },
    AddIndex { table: String, index: String },
}

impl SchemaDelta {
    pub fn apply(self, schema: &mut Schema) {
        match self {
            SchemaDelta::AddTable(table) => {
                schema.remove(&table.name);
                schema.tables.push(table);
            }
            SchemaDelta::AddColumn { table, column } => {
                if let Some(t) = schema.table_mut(&table) {
                    t.columns.push(column);
                }
            }
            SchemaDelta::AlterColumn { table, column, ty } => {
                if let Some(c) = schema
                    .table_mut(&table)
                    .and_then(|t| t.columns.iter_mut().find(|c| c.name == column))
                {
                    c.ty = ty;
                }
            }
            SchemaDelta::DropColumn { table, column } => {
                if let Some(t) = schema.table_mut(&table) {
                    t.columns.retain(|c| c.name != column);
                }
            }
            SchemaDelta::AddIndex { table, index } => {
                if let Some(t) = schema.table_mut(&table) {
                    t.indexes.push(index);
                }
            }
        }
    }
}
