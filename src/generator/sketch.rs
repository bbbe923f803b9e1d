//! Sketches: generated statements with numbered holes left open.
//!
//! The learner receives these alongside the variable catalog and answers
//! with `hole;fragment` rows. Generation runs with the sketch flag set, so
//! every hole is rendered regardless of feedback or coin flips.

use crate::feature::HoleKind;
use crate::schema::{Column, DataType, Table};

use super::Generator;
use super::statement::{SKETCH_COLUMN, SKETCH_TABLE};

const STATEMENT_SKETCH: &str = "CREATE TABLE TEST_TABLE (TEST_COLUMN INT);\n\
INSERT INTO TEST_TABLE VALUES (1);\n\
{0}; -- Hint: a statement that changes data or settings of TEST_TABLE\n\
SELECT * FROM TEST_TABLE;\n\
{1}; -- Hint: a maintenance or session statement\n\
{2}; -- Hint: any other statement the DBMS accepts\n";

impl Generator<'_> {
    /// Sketch for `hole`, or `None` for stores learned without a sketch.
    pub fn sketch(&mut self, hole: HoleKind) -> Option<String> {
        let previous = self.options.sketch;
        self.options.sketch = true;
        let sketch = match hole {
            HoleKind::Table => Some(self.table_sketch()),
            HoleKind::Index => Some(self.index_sketch()),
            HoleKind::Statement => Some(STATEMENT_SKETCH.to_string()),
            HoleKind::Type | HoleKind::Function | HoleKind::Operator => None,
        };
        self.options.sketch = previous;
        sketch
    }

    fn table_sketch(&mut self) -> String {
        let statement = self.generate_create_table(SKETCH_TABLE);
        format!("{};\n", statement.sql)
    }

    fn index_sketch(&mut self) -> String {
        let table = Table::new(
            SKETCH_TABLE,
            vec![
                Column::new(format!("{SKETCH_COLUMN}0"), DataType::Int),
                Column::new(format!("{SKETCH_COLUMN}1"), DataType::Varchar(None)),
            ],
        );
        let index = self.generate_create_index(&table);
        format!(
            "CREATE TABLE {SKETCH_TABLE} ({SKETCH_COLUMN}0 INT, {SKETCH_COLUMN}1 VARCHAR);\n{};\n",
            index.sql
        )
    }
}
