//! NoREC: the number of rows a filtered query returns must equal the number
//! of rows for which the filter, evaluated as a projection over the
//! unfiltered query, is true.

use crate::ast::Select;
use crate::error::Outcome;

use super::Comparison;
use crate::generator::Generator;

pub(crate) fn generate(generator: &mut Generator<'_>) -> Outcome<(Comparison, usize)> {
    let shape = match generator.generate_query_shape() {
        Outcome::Done(shape) => shape,
        Outcome::Skipped(skip) => return Outcome::Skipped(skip),
    };
    let predicate = generator.generate_predicate();
    let projection = shape.projection();
    let width = projection.len();

    let optimized = Select::new(projection, shape.from.clone())
        .with_filter(predicate.clone())
        .to_string();
    let unoptimized = Select::new(vec![format!("({predicate}) IS TRUE")], shape.from).to_string();

    Outcome::Done((
        Comparison::RowCount {
            optimized,
            unoptimized,
        },
        width,
    ))
}
