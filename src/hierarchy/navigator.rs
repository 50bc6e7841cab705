//! Lookups over an assembled forest

use super::walk::{walk, HierarchyVisitor, SubBatchPosition};
use crate::model::{Batch, SubBatch, UnitBatch};

/// Unit batches of batches matching `batch_id` whose product matches `product`
///
/// `None` filters match anything.
pub fn find_unit_batches<'a>(
    batches: &'a [Batch],
    batch_id: Option<&str>,
    product: Option<&str>,
) -> Vec<&'a UnitBatch> {
    batches
        .iter()
        .filter(|b| batch_id.map_or(true, |id| b.batch_id == id))
        .flat_map(|b| b.unit_batches.iter())
        .filter(|u| product.map_or(true, |p| u.product == p))
        .collect()
}

/// All sub-batches named `name`, at any depth, in walk order
pub fn find_sub_batches_named<'a>(batches: &'a [Batch], name: &str) -> Vec<&'a SubBatch> {
    struct ByName<'a, 'n> {
        name: &'n str,
        found: Vec<&'a SubBatch>,
    }

    impl<'a, 'n> HierarchyVisitor<'a> for ByName<'a, 'n> {
        fn visit_sub_batch(
            &mut self,
            _unit: &'a UnitBatch,
            sub: &'a SubBatch,
            _position: SubBatchPosition<'_>,
        ) {
            if sub.name == self.name {
                self.found.push(sub);
            }
        }
    }

    let mut visitor = ByName {
        name,
        found: Vec::new(),
    };
    walk(batches, &mut visitor);
    visitor.found
}
