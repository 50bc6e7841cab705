//! Depth-first traversal of the batch forest
//!
//! Visits batches, unit batches and sub-batches in forest order. Sub-batch
//! visits carry the accumulated path of ancestor names and the depth level,
//! both computed during the walk.

use crate::model::{Batch, SubBatch, UnitBatch};

/// Where a sub-batch sits in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubBatchPosition<'p> {
    /// `/` for root-level sub-batches, `/A/B/` below `A` → `B`
    pub path: &'p str,
    /// 0 directly under the unit batch
    pub level: u32,
    /// Enclosing sub-batch, if any
    pub parent_uid: Option<&'p str>,
}

/// Callbacks invoked by [`walk`]
pub trait HierarchyVisitor<'a> {
    fn visit_batch(&mut self, _batch: &'a Batch) {}

    fn visit_unit_batch(&mut self, _batch: &'a Batch, _unit: &'a UnitBatch) {}

    fn visit_sub_batch(
        &mut self,
        _unit: &'a UnitBatch,
        _sub: &'a SubBatch,
        _position: SubBatchPosition<'_>,
    ) {
    }
}

/// Walk the forest depth-first, parents before children
pub fn walk<'a, V: HierarchyVisitor<'a> + ?Sized>(batches: &'a [Batch], visitor: &mut V) {
    let mut path = String::from("/");
    for batch in batches {
        visitor.visit_batch(batch);
        for unit in &batch.unit_batches {
            visitor.visit_unit_batch(batch, unit);
            walk_sub_batches(unit, &unit.sub_batches, &mut path, 0, None, visitor);
        }
    }
}

fn walk_sub_batches<'a, V: HierarchyVisitor<'a> + ?Sized>(
    unit: &'a UnitBatch,
    subs: &'a [SubBatch],
    path: &mut String,
    level: u32,
    parent_uid: Option<&'a str>,
    visitor: &mut V,
) {
    for sub in subs {
        visitor.visit_sub_batch(
            unit,
            sub,
            SubBatchPosition {
                path: path.as_str(),
                level,
                parent_uid,
            },
        );

        if !sub.children.is_empty() {
            let len = path.len();
            path.push_str(&sub.name);
            path.push('/');
            walk_sub_batches(
                unit,
                &sub.children,
                path,
                level + 1,
                Some(sub.uid.as_str()),
                visitor,
            );
            path.truncate(len);
        }
    }
}

/// Entity totals of a forest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub batches: usize,
    pub synthetic_batches: usize,
    pub unit_batches: usize,
    pub sub_batches: usize,
    /// Deepest sub-batch level seen plus one; 0 without sub-batches
    pub depth: u32,
}

impl EntityCounts {
    pub fn total(&self) -> usize {
        self.batches + self.unit_batches + self.sub_batches
    }
}

impl<'a> HierarchyVisitor<'a> for EntityCounts {
    fn visit_batch(&mut self, batch: &'a Batch) {
        self.batches += 1;
        if batch.is_synthetic() {
            self.synthetic_batches += 1;
        }
    }

    fn visit_unit_batch(&mut self, _batch: &'a Batch, _unit: &'a UnitBatch) {
        self.unit_batches += 1;
    }

    fn visit_sub_batch(
        &mut self,
        _unit: &'a UnitBatch,
        _sub: &'a SubBatch,
        position: SubBatchPosition<'_>,
    ) {
        self.sub_batches += 1;
        self.depth = self.depth.max(position.level + 1);
    }
}

/// Count the entities of a forest
pub fn count_entities(batches: &[Batch]) -> EntityCounts {
    let mut counts = EntityCounts::default();
    walk(batches, &mut counts);
    counts
}
