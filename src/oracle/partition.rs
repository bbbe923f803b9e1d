//! Ternary logic partitioning of WHERE.
//!
//! For any predicate `p`, the rows of a query are exactly the rows where `p`
//! is true, plus those where `NOT p` is true, plus those where `p IS NULL`.

use crate::ast::{Expr, PostfixOp, Select};
use crate::error::Outcome;
use crate::schema::DataType;

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

    let mut base = Select::new(projection, shape.from);
    if generator.rng.rather_low() {
        // ORDER BY terms must not count towards composite feedback.
        let snapshot = generator.feedback.snapshot_composites();
        let terms = 1 + generator.rng.small_number();
        base.order_by = (0..terms)
            .map(|_| {
                let ty: DataType = generator.random_type();
                generator.generate_expression(&ty)
            })
            .collect();
        generator.feedback.restore_composites(snapshot);
    }

    let parts = [
        predicate.clone(),
        Expr::not(predicate.clone()),
        Expr::postfix(predicate, PostfixOp::IsNull),
    ];
    let queries: Vec<String> = parts
        .into_iter()
        .map(|p| base.with_filter(p).to_string())
        .collect();
    let partitions = if base.order_by.is_empty() && generator.rng.coin() {
        vec![queries.join(" UNION ALL ")]
    } else {
        queries
    };

    Outcome::Done((
        Comparison::Partition {
            baseline: base.to_string(),
            partitions,
        },
        width,
    ))
}
