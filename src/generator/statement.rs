//! Schema-building statements.
//!
//! Every generator returns a [`Statement`] carrying the SQL and, for DDL,
//! the [`SchemaDelta`] the session applies once the statement succeeded.
//! Grammar holes are filled from the table, index and statement stores; in
//! sketch mode they render as `{n}` instead and table and column names
//! become `TEST_TABLE`/`TEST_COLUMNi` so learned fragments can refer to
//! them.

use crate::config::FuzzConfig;
use crate::error::{Outcome, Skip};
use crate::feature::{CompositeKey, HoleKind, Node};
use crate::schema::{Column, ColumnRef, DataType, SchemaDelta, Table};

use super::{Generator, Randomly};

pub const SKETCH_TABLE: &str = "TEST_TABLE";
pub const SKETCH_COLUMN: &str = "TEST_COLUMN";

/// One generated statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub node: Node,
    pub delta: Option<SchemaDelta>,
}

impl Statement {
    fn new(sql: String, node: Node) -> Self {
        Self {
            sql,
            node,
            delta: None,
        }
    }

    fn with_delta(mut self, delta: SchemaDelta) -> Self {
        self.delta = Some(delta);
        self
    }
}

/// Statement kinds scheduled after the tables exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Insert,
    CreateIndex,
    Vacuum,
    Analyze,
    Update,
    Delete,
    AlterTable,
    CreateView,
    GeneralCommand,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::Insert,
        Action::CreateIndex,
        Action::Vacuum,
        Action::Analyze,
        Action::Update,
        Action::Delete,
        Action::AlterTable,
        Action::CreateView,
        Action::GeneralCommand,
    ];

    pub fn node(&self) -> Node {
        match self {
            Action::Insert => Node::INSERT,
            Action::CreateIndex => Node::CREATE_INDEX,
            Action::Vacuum => Node::VACUUM,
            Action::Analyze => Node::ANALYZE,
            Action::Update => Node::UPDATE,
            Action::Delete => Node::DELETE,
            Action::AlterTable => Node::ALTER_TABLE,
            Action::CreateView => Node::CREATE_VIEW,
            Action::GeneralCommand => Node::GENERAL_COMMAND,
        }
    }

    /// How many of this action one database gets.
    pub fn count(&self, rng: &mut Randomly, config: &FuzzConfig) -> u32 {
        match self {
            Action::Insert => rng.range(0, config.max_inserts),
            Action::CreateIndex if config.test_indexes => rng.range(1, config.max_updates + 1),
            Action::CreateIndex => 0,
            Action::Vacuum | Action::Analyze => rng.range(0, 2),
            Action::Update => rng.range(0, config.max_updates + 1),
            Action::Delete | Action::AlterTable | Action::CreateView => {
                rng.range(0, config.max_views + 1)
            }
            Action::GeneralCommand
                if config.test_random_commands && config.enable_extra_features =>
            {
                rng.range(5, 10)
            }
            Action::GeneralCommand => 0,
        }
    }

    /// Actions that modify rows or schema of an existing base table.
    pub fn needs_table(&self) -> bool {
        !matches!(
            self,
            Action::Vacuum | Action::Analyze | Action::CreateView | Action::GeneralCommand
        )
    }
}

fn spaced(fragment: String) -> String {
    if fragment.trim().is_empty() {
        String::new()
    } else {
        format!("{} ", fragment.trim())
    }
}

fn leading(fragment: String) -> String {
    if fragment.trim().is_empty() {
        String::new()
    } else {
        format!(" {}", fragment.trim())
    }
}

impl Generator<'_> {
    /// Rendered fragment for hole `index`, or empty when the hole is skipped.
    pub(crate) fn fill_hole(&mut self, hole: HoleKind, index: usize) -> String {
        if !self.options.sketch && (!self.engine.config.enable_extra_features || !self.rng.coin()) {
            return String::new();
        }
        let engine = self.engine;
        engine.stores.get(hole).choose(&index.to_string(), self)
    }

    /// Scope expressions, fragment variables and test-object names to `table`.
    pub(crate) fn bind_table(&mut self, table: &Table) {
        self.focus_table(&table.name);
        let mut objects = vec![(SKETCH_TABLE.to_string(), table.name.clone())];
        objects.extend(
            table
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| (format!("{SKETCH_COLUMN}{i}"), c.name.clone())),
        );
        self.set_test_objects(objects);
    }

    /// Column type allowed by feedback, preferring the type being learned.
    pub(crate) fn column_type(&mut self) -> DataType {
        for _ in 0..self.max_rounds() {
            let candidate = match self.options.preferred_type.clone() {
                Some(preferred) if self.rng.rather_low() => preferred,
                _ => {
                    let index = self.rng.below(self.types.len());
                    self.types.get(index).cloned().unwrap_or(DataType::Int)
                }
            };
            if self
                .feedback
                .composite_option(&CompositeKey::Column(candidate.key_name().to_string()))
            {
                return DataType::random_column_type(&candidate, self.rng.rng_mut());
            }
        }
        DataType::Int
    }

    fn record_column(&mut self, ty: &DataType) {
        self.record(Node::COLUMN_NUM);
        self.record(CompositeKey::Column(ty.key_name().to_string()));
        match ty {
            DataType::Int => self.record(Node::COLUMN_INT),
            DataType::Boolean => self.record(Node::COLUMN_BOOLEAN),
            DataType::Varchar(_) => self.record(Node::COLUMN_STRING),
            DataType::Dialect(_) => {}
        }
    }

    // ── CREATE TABLE ───────────────────────────────────────────────────────

    pub fn generate_create_table(&mut self, name: &str) -> Statement {
        self.record(Node::CREATE_TABLE);
        let sketch = self.options.sketch;
        let table_name = if sketch { SKETCH_TABLE.to_string() } else { name.to_string() };

        let count = 1 + self.rng.range(1, 4) as usize;
        let mut columns: Vec<Column> = (0..count)
            .map(|i| {
                let ty = self.column_type();
                self.record_column(&ty);
                let col_name = if sketch { format!("{SKETCH_COLUMN}{i}") } else { format!("c{i}") };
                Column::new(col_name, ty)
            })
            .collect();

        let primary = if sketch {
            1
        } else if self.node_enabled(Node::PRIMARY_KEY) && self.rng.coin() {
            1 + self.rng.below(columns.len())
        } else {
            0
        };
        for column in columns.iter_mut().take(primary) {
            column.is_primary = true;
        }
        if primary > 0 {
            self.record(Node::PRIMARY_KEY);
        }

        let table = Table::new(table_name.clone(), columns.clone());
        self.bind_table(&table);

        let mut sql = format!(
            "CREATE {}TABLE {table_name}(",
            spaced(self.fill_hole(HoleKind::Table, 0))
        );
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("{} {}", column.name, column.ty));
            sql.push_str(&leading(self.fill_hole(HoleKind::Table, 1)));
        }
        if primary > 0 {
            let keys: Vec<&str> = columns[..primary].iter().map(|c| c.name.as_str()).collect();
            sql.push_str(&format!(", PRIMARY KEY({})", keys.join(", ")));
            sql.push_str(&leading(self.fill_hole(HoleKind::Table, 2)));
        }
        sql.push(')');
        sql.push_str(&leading(self.fill_hole(HoleKind::Table, 3)));

        Statement::new(sql, Node::CREATE_TABLE).with_delta(SchemaDelta::AddTable(Table::new(
            name.to_string(),
            columns,
        )))
    }

    // ── Scheduled actions ──────────────────────────────────────────────────

    pub fn generate_action(&mut self, action: Action) -> Outcome<Statement> {
        if action.needs_table() {
            let tables = self.schema.base_tables();
            let Some(table) = self.rng.pick(&tables).copied() else {
                return Outcome::Skipped(Skip::EmptySchema);
            };
            let table = table.clone();
            return Outcome::Done(match action {
                Action::Insert => self.generate_insert(&table),
                Action::CreateIndex => self.generate_create_index(&table),
                Action::Update => self.generate_update(&table),
                Action::Delete => self.generate_delete(&table),
                _ => self.generate_alter_table(&table),
            });
        }
        match action {
            Action::Vacuum => Outcome::Done(self.generate_maintenance(Node::VACUUM, "VACUUM")),
            Action::Analyze => Outcome::Done(self.generate_maintenance(Node::ANALYZE, "ANALYZE")),
            Action::CreateView => {
                let name = self.schema.free_name("v", 0);
                self.generate_create_view(&name)
            }
            _ => self.generate_general_command(),
        }
    }

    fn insert_value(&mut self, ty: &DataType) -> String {
        if self.rng.rather_low() {
            self.generate_expression(ty).to_string()
        } else {
            self.generate_constant(ty).0.to_string()
        }
    }

    pub fn generate_insert(&mut self, table: &Table) -> Statement {
        self.record(Node::INSERT);
        self.bind_table(table);
        self.set_columns(Vec::new());
        let columns = self.rng.non_empty_subset(&table.columns);
        let rows = 1 + self.rng.small_number();
        let values: Vec<String> = (0..rows)
            .map(|_| {
                let row: Vec<String> = columns.iter().map(|c| self.insert_value(&c.ty)).collect();
                format!("({})", row.join(", "))
            })
            .collect();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        Statement::new(
            format!(
                "INSERT INTO {}({}) VALUES {}",
                table.name,
                names.join(", "),
                values.join(", ")
            ),
            Node::INSERT,
        )
    }

    pub fn generate_update(&mut self, table: &Table) -> Statement {
        self.record(Node::UPDATE);
        self.bind_table(table);
        let columns = self.rng.non_empty_subset(&table.columns);
        let assignments: Vec<String> = columns
            .iter()
            .map(|c| {
                let value = if self.rng.coin() {
                    self.generate_expression(&c.ty).to_string()
                } else {
                    self.generate_constant(&c.ty).0.to_string()
                };
                format!("{} = {value}", c.name)
            })
            .collect();
        let mut sql = format!("UPDATE {} SET {}", table.name, assignments.join(", "));
        if self.node_enabled(Node::UPDATE_WHERE) && self.rng.coin() {
            self.record(Node::UPDATE_WHERE);
            sql.push_str(&format!(" WHERE {}", self.generate_predicate()));
        }
        Statement::new(sql, Node::UPDATE)
    }

    pub fn generate_delete(&mut self, table: &Table) -> Statement {
        self.record(Node::DELETE);
        self.bind_table(table);
        let mut sql = format!("DELETE FROM {}", table.name);
        if self.rng.coin() {
            sql.push_str(&format!(" WHERE {}", self.generate_predicate()));
        }
        Statement::new(sql, Node::DELETE)
    }

    pub fn generate_create_index(&mut self, table: &Table) -> Statement {
        self.record(Node::CREATE_INDEX);
        self.bind_table(table);
        let unique = self.node_enabled(Node::UNIQUE_INDEX) && self.rng.coin();
        if unique {
            self.record(Node::UNIQUE_INDEX);
        }
        let index = table.free_index_name();
        let columns = if self.options.sketch {
            table.columns.clone()
        } else {
            self.rng.non_empty_subset(&table.columns)
        };

        let mut sql = format!(
            "CREATE {}INDEX {index} ON {} {}(",
            if unique { "UNIQUE " } else { "" },
            table.name,
            spaced(self.fill_hole(HoleKind::Index, 0)),
        );
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&column.name);
            sql.push_str(&leading(self.fill_hole(HoleKind::Index, 1)));
        }
        sql.push(')');
        sql.push_str(&leading(self.fill_hole(HoleKind::Index, 2)));
        if !self.options.sketch && self.rng.rather_low() {
            sql.push_str(&format!(" WHERE {}", self.generate_predicate()));
        }

        Statement::new(sql, Node::CREATE_INDEX).with_delta(SchemaDelta::AddIndex {
            table: table.name.clone(),
            index,
        })
    }

    /// `CREATE [MATERIALIZED] VIEW` over a subset of the schema. Composite
    /// features of the view body are not kept.
    pub fn generate_create_view(&mut self, name: &str) -> Outcome<Statement> {
        let schema = self.schema;
        if schema.is_empty() {
            return Outcome::Skipped(Skip::EmptySchema);
        }
        self.record(Node::CREATE_VIEW);
        let tables = self.rng.non_empty_subset(&schema.tables);
        let scope = tables
            .iter()
            .flat_map(|t| {
                t.columns.iter().map(|c| ColumnRef {
                    table: t.name.clone(),
                    column: c.clone(),
                })
            })
            .collect();
        self.set_columns(scope);
        self.set_test_objects(Vec::new());

        let snapshot = self.feedback.snapshot_composites();
        let count = 1 + self.rng.small_number();
        let mut columns = Vec::with_capacity(count);
        let mut items = Vec::with_capacity(count);
        for i in 0..count {
            let ty = self.random_type();
            items.push(self.generate_expression(&ty).to_string());
            columns.push(Column::new(format!("c{i}"), ty));
        }
        let filter = if self.rng.coin() {
            Some(self.generate_predicate())
        } else {
            None
        };
        self.feedback.restore_composites(snapshot);

        let materialized = self.engine.config.enable_extra_features && self.rng.rather_low();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let from: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        let mut sql = format!(
            "CREATE {}VIEW {name}({}) AS SELECT {} FROM {}",
            if materialized { "MATERIALIZED " } else { "" },
            names.join(", "),
            items.join(", "),
            from.join(", "),
        );
        if let Some(filter) = filter {
            sql.push_str(&format!(" WHERE {filter}"));
        }
        Outcome::Done(
            Statement::new(sql, Node::CREATE_VIEW)
                .with_delta(SchemaDelta::AddTable(Table::view(name, columns))),
        )
    }

    pub fn generate_alter_table(&mut self, table: &Table) -> Statement {
        self.record(Node::ALTER_TABLE);
        self.bind_table(table);
        let choice = if table.columns.len() > 1 {
            self.rng.below(3)
        } else {
            self.rng.below(2)
        };
        match choice {
            0 => {
                let column = Column::new(table.free_column_name(), self.column_type());
                self.record_column(&column.ty);
                Statement::new(
                    format!("ALTER TABLE {} ADD COLUMN {} {}", table.name, column.name, column.ty),
                    Node::ALTER_TABLE,
                )
                .with_delta(SchemaDelta::AddColumn {
                    table: table.name.clone(),
                    column,
                })
            }
            1 => {
                let index = self.rng.below(table.columns.len());
                let column = table.columns[index].name.clone();
                let ty = self.column_type();
                let mut sql = format!("ALTER TABLE {} ALTER COLUMN {column} TYPE {ty}", table.name);
                if self.rng.coin() {
                    sql.push_str(&format!(" USING CAST({column} AS {ty})"));
                }
                Statement::new(sql, Node::ALTER_TABLE).with_delta(SchemaDelta::AlterColumn {
                    table: table.name.clone(),
                    column,
                    ty,
                })
            }
            _ => {
                let index = self.rng.below(table.columns.len());
                let column = table.columns[index].name.clone();
                Statement::new(
                    format!("ALTER TABLE {} DROP COLUMN {column}", table.name),
                    Node::ALTER_TABLE,
                )
                .with_delta(SchemaDelta::DropColumn {
                    table: table.name.clone(),
                    column,
                })
            }
        }
    }

    fn generate_maintenance(&mut self, node: Node, keyword: &str) -> Statement {
        self.record(node);
        let tables = self.schema.base_tables();
        let sql = match self.rng.pick(&tables) {
            Some(table) if self.rng.coin() => format!("{keyword} {}", table.name),
            _ => keyword.to_string(),
        };
        Statement::new(sql, node)
    }

    /// Free-form statement from the statement store.
    pub fn generate_general_command(&mut self) -> Outcome<Statement> {
        self.record(Node::GENERAL_COMMAND);
        let tables = self.schema.base_tables();
        if let Some(table) = self.rng.pick(&tables).copied() {
            let table = table.clone();
            self.bind_table(&table);
        }
        let key = self.rng.below(3).to_string();
        let engine = self.engine;
        let sql = engine.stores.get(HoleKind::Statement).choose(&key, self);
        let trimmed = sql.trim();
        if trimmed.is_empty() || trimmed == ";" {
            return Outcome::Skipped(Skip::EmptyStatement);
        }
        Outcome::Done(Statement::new(
            trimmed.trim_end_matches(';').to_string(),
            Node::GENERAL_COMMAND,
        ))
    }
}
