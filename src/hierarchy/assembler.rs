//! Forest assembly from flat records
//!
//! Records are collected into insertion-ordered keyed collections, then linked
//! in two passes: sub-batches to their parents, then unit batches to their
//! batches. Children are owned by their parents; uids are only used as lookup
//! keys while linking.

use super::{HierarchyError, HierarchyResult, RecordKind};
use crate::model::{Batch, SubBatch, UnitBatch};
use std::collections::HashMap;

/// Insertion-ordered collection of one record type, keyed by uid
#[derive(Debug, Clone)]
struct Keyed<T> {
    records: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for Keyed<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Keyed<T> {
    fn insert(&mut self, uid: &str, record: T) -> bool {
        if self.index.contains_key(uid) {
            return false;
        }
        self.index.insert(uid.to_string(), self.records.len());
        self.records.push(record);
        true
    }

    fn position(&self, uid: &str) -> Option<usize> {
        self.index.get(uid).copied()
    }
}

/// Flat batch, unit-batch and sub-batch records of one read
///
/// Iteration order is insertion order; the first record wins on duplicate uids.
#[derive(Debug, Clone, Default)]
pub struct FlatHierarchy {
    batches: Keyed<Batch>,
    unit_batches: Keyed<UnitBatch>,
    sub_batches: Keyed<SubBatch>,
}

impl FlatHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch; returns false if the uid was already present
    pub fn insert_batch(&mut self, batch: Batch) -> bool {
        let uid = batch.uid.clone();
        let inserted = self.batches.insert(&uid, batch);
        if !inserted {
            tracing::warn!(uid = %uid, "Duplicate batch ignored");
        }
        inserted
    }

    /// Add a unit batch; returns false if the uid was already present
    pub fn insert_unit_batch(&mut self, unit_batch: UnitBatch) -> bool {
        let uid = unit_batch.uid.clone();
        let inserted = self.unit_batches.insert(&uid, unit_batch);
        if !inserted {
            tracing::warn!(uid = %uid, "Duplicate unit batch ignored");
        }
        inserted
    }

    /// Add a sub-batch; returns false if the uid was already present
    pub fn insert_sub_batch(&mut self, sub_batch: SubBatch) -> bool {
        let uid = sub_batch.uid.clone();
        let inserted = self.sub_batches.insert(&uid, sub_batch);
        if !inserted {
            tracing::warn!(uid = %uid, "Duplicate sub-batch ignored");
        }
        inserted
    }

    pub fn contains_batch(&self, uid: &str) -> bool {
        self.batches.index.contains_key(uid)
    }

    pub fn contains_unit_batch(&self, uid: &str) -> bool {
        self.unit_batches.index.contains_key(uid)
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.batches.records.len()
            + self.unit_batches.records.len()
            + self.sub_batches.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output of [`assemble`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    /// Synthetic batches first, then real batches in input order
    pub batches: Vec<Batch>,
    /// Placeholder batches created for unit batches without a batch
    pub synthetic_batches: usize,
    /// Sub-batches whose parent or unit batch was not supplied
    pub dropped_sub_batches: usize,
}

impl Assembly {
    pub fn into_batches(self) -> Vec<Batch> {
        self.batches
    }
}

/// Assemble the forest
///
/// A unit batch referencing a batch that is not in the input aborts the whole
/// assembly. Sub-batches with a missing parent are dropped.
pub fn assemble(flat: FlatHierarchy) -> HierarchyResult<Assembly> {
    let FlatHierarchy {
        batches,
        unit_batches,
        sub_batches,
    } = flat;

    // Pass 1: link sub-batches by index
    let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); sub_batches.records.len()];
    let mut roots_of: Vec<Vec<usize>> = vec![Vec::new(); unit_batches.records.len()];

    for (idx, sb) in sub_batches.records.iter().enumerate() {
        match sb.parent_uid() {
            Some(parent) => match sub_batches.position(parent) {
                Some(p) if p != idx => children_of[p].push(idx),
                _ => tracing::warn!(
                    uid = %sb.uid,
                    parent = %parent,
                    "Dropping sub-batch with missing parent"
                ),
            },
            None => match unit_batches.position(&sb.unit_batch_uid) {
                Some(u) => roots_of[u].push(idx),
                None => tracing::warn!(
                    uid = %sb.uid,
                    unit_batch = %sb.unit_batch_uid,
                    "Dropping sub-batch with missing unit batch"
                ),
            },
        }
    }

    let mut slots: Vec<Option<SubBatch>> = sub_batches.records.into_iter().map(Some).collect();

    // Pass 2: attach subtrees to unit batches and unit batches to batches
    let mut real = batches.records;
    let mut synthetic = Vec::new();

    for (u, mut ub) in unit_batches.records.into_iter().enumerate() {
        let roots: Vec<SubBatch> = roots_of[u]
            .iter()
            .filter_map(|&idx| take_subtree(idx, 0, &mut slots, &children_of))
            .collect();
        ub.sub_batches.extend(roots);

        let target = match ub.batch_uid() {
            None => None,
            Some(batch_uid) => match batches.index.get(batch_uid) {
                Some(&b) => Some(b),
                None => {
                    return Err(HierarchyError::MissingReference {
                        kind: RecordKind::UnitBatch,
                        owner_uid: ub.uid.clone(),
                        ref_uid: batch_uid.to_string(),
                    })
                }
            },
        };

        match target {
            Some(b) => real[b].unit_batches.push(ub),
            None => synthetic.push(Batch::synthetic_for(ub)),
        }
    }

    // Anything left was unreachable from a unit batch
    let dropped_sub_batches = slots.iter().flatten().count();
    if dropped_sub_batches > 0 {
        tracing::warn!(count = dropped_sub_batches, "Sub-batches dropped during assembly");
    }

    let synthetic_batches = synthetic.len();
    let mut batches = synthetic;
    batches.extend(real);

    tracing::debug!(
        batches = batches.len(),
        synthetic = synthetic_batches,
        "Assembled batch hierarchy"
    );

    Ok(Assembly {
        batches,
        synthetic_batches,
        dropped_sub_batches,
    })
}

/// Move a sub-batch and its descendants out of `slots`, setting each level
/// to its depth below the unit batch
///
/// Each slot is taken at most once, so parent cycles terminate.
fn take_subtree(
    idx: usize,
    level: u32,
    slots: &mut [Option<SubBatch>],
    children_of: &[Vec<usize>],
) -> Option<SubBatch> {
    let mut sb = slots[idx].take()?;
    sb.level = level;
    for &child in &children_of[idx] {
        if let Some(child) = take_subtree(child, level + 1, slots, children_of) {
            sb.children.push(child);
        }
    }
    Some(sb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(batches: Vec<Batch>, units: Vec<UnitBatch>, subs: Vec<SubBatch>) -> FlatHierarchy {
        let mut flat = FlatHierarchy::new();
        for b in batches {
            flat.insert_batch(b);
        }
        for u in units {
            flat.insert_unit_batch(u);
        }
        for s in subs {
            flat.insert_sub_batch(s);
        }
        flat
    }

    #[test]
    fn test_synthetic_batches_come_first() {
        let input = flat(
            vec![Batch::new("B1", "LOT-1")],
            vec![
                UnitBatch::new("U1", "LOT-0"),
                UnitBatch::new("U2", "LOT-1").batch("B1"),
            ],
            vec![],
        );

        let assembly = assemble(input).unwrap();
        let batches = &assembly.batches;

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].uid, "dummy-for-unitbatch-U1");
        assert_eq!(batches[0].unit_batches.len(), 1);
        assert_eq!(batches[0].unit_batches[0].uid, "U1");
        assert_eq!(batches[1].uid, "B1");
        assert_eq!(batches[1].unit_batches[0].uid, "U2");
        assert_eq!(assembly.synthetic_batches, 1);
    }

    #[test]
    fn test_each_orphan_gets_its_own_synthetic_batch() {
        let input = flat(
            vec![],
            vec![UnitBatch::new("U1", "A"), UnitBatch::new("U2", "B")],
            vec![],
        );

        let batches = assemble(input).unwrap().into_batches();
        assert_eq!(batches.len(), 2);
        for (batch, uid) in batches.iter().zip(["U1", "U2"]) {
            assert!(batch.is_synthetic());
            assert_eq!(batch.unit_batches.len(), 1);
            assert_eq!(batch.unit_batches[0].uid, uid);
        }
    }

    #[test]
    fn test_missing_batch_is_fatal() {
        let input = flat(vec![], vec![UnitBatch::new("U1", "A").batch("B9")], vec![]);

        let err = assemble(input).unwrap_err();
        assert_eq!(
            err,
            HierarchyError::MissingReference {
                kind: RecordKind::UnitBatch,
                owner_uid: "U1".into(),
                ref_uid: "B9".into(),
            }
        );
    }

    #[test]
    fn test_nested_sub_batches() {
        // Children listed before their parents
        let input = flat(
            vec![Batch::new("B1", "LOT")],
            vec![UnitBatch::new("U1", "LOT").batch("B1")],
            vec![
                SubBatch::new("S3", "U1", "Dose").parent("S2").level(2),
                SubBatch::new("S2", "U1", "Ramp").parent("S1").level(1),
                SubBatch::new("S1", "U1", "Heat"),
                SubBatch::new("S4", "U1", "Cool"),
            ],
        );

        let batches = assemble(input).unwrap().into_batches();
        let ub = &batches[0].unit_batches[0];

        let roots: Vec<&str> = ub.sub_batches.iter().map(|s| s.uid.as_str()).collect();
        assert_eq!(roots, vec!["S1", "S4"]);
        assert_eq!(ub.sub_batches[0].children[0].uid, "S2");
        assert_eq!(ub.sub_batches[0].children[0].children[0].uid, "S3");
        assert!(ub.sub_batches[1].children.is_empty());
    }

    #[test]
    fn test_levels_follow_depth() {
        let input = flat(
            vec![],
            vec![UnitBatch::new("U1", "LOT")],
            vec![
                SubBatch::new("S1", "U1", "Heat").level(3),
                SubBatch::new("S2", "U1", "Ramp").parent("S1").level(7),
            ],
        );

        let batches = assemble(input).unwrap().into_batches();
        let root = &batches[0].unit_batches[0].sub_batches[0];
        assert_eq!(root.level, 0);
        assert_eq!(root.children[0].level, 1);
    }

    #[test]
    fn test_sub_batch_placement() {
        let input = flat(
            vec![],
            vec![UnitBatch::new("U1", "LOT")],
            vec![
                SubBatch::new("S1", "U1", "Heat"),
                // Names a unit batch but has a parent: must not become a root
                SubBatch::new("S2", "U1", "Ramp").parent("S1"),
            ],
        );

        let batches = assemble(input).unwrap().into_batches();
        let ub = &batches[0].unit_batches[0];
        assert_eq!(ub.sub_batches.len(), 1);
        assert!(ub.sub_batches.iter().all(|s| s.parent_uid().is_none()));
        assert_eq!(ub.sub_batches[0].children[0].uid, "S2");
    }

    #[test]
    fn test_dangling_sub_batches_are_dropped() {
        let input = flat(
            vec![],
            vec![UnitBatch::new("U1", "LOT")],
            vec![
                SubBatch::new("S1", "U1", "Heat"),
                SubBatch::new("S2", "U1", "Lost").parent("S9"),
                SubBatch::new("S3", "U7", "Elsewhere"),
                SubBatch::new("S4", "U1", "Under lost").parent("S2"),
            ],
        );

        let assembly = assemble(input).unwrap();
        let ub = &assembly.batches[0].unit_batches[0];
        assert_eq!(ub.sub_batches.len(), 1);
        assert!(ub.sub_batches[0].children.is_empty());
        assert_eq!(assembly.dropped_sub_batches, 3);
    }

    #[test]
    fn test_parent_cycles_terminate() {
        let input = flat(
            vec![],
            vec![UnitBatch::new("U1", "LOT")],
            vec![
                SubBatch::new("S1", "U1", "A").parent("S2"),
                SubBatch::new("S2", "U1", "B").parent("S1"),
                SubBatch::new("S3", "U1", "Self").parent("S3"),
            ],
        );

        let assembly = assemble(input).unwrap();
        assert!(assembly.batches[0].unit_batches[0].sub_batches.is_empty());
        assert_eq!(assembly.dropped_sub_batches, 3);
    }

    #[test]
    fn test_duplicate_uids_keep_first() {
        let mut input = FlatHierarchy::new();
        assert!(input.insert_unit_batch(UnitBatch::new("U1", "first")));
        assert!(!input.insert_unit_batch(UnitBatch::new("U1", "second")));
        assert_eq!(input.len(), 1);

        let batches = assemble(input).unwrap().into_batches();
        assert_eq!(batches[0].unit_batches[0].batch_id, "first");
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let build = || {
            flat(
                vec![Batch::new("B2", "L2"), Batch::new("B1", "L1")],
                vec![
                    UnitBatch::new("U3", "L1").batch("B1"),
                    UnitBatch::new("U1", "X"),
                    UnitBatch::new("U2", "L2").batch("B2"),
                    UnitBatch::new("U4", "L1").batch("B1"),
                ],
                vec![
                    SubBatch::new("S1", "U3", "Heat"),
                    SubBatch::new("S2", "U3", "Ramp").parent("S1"),
                    SubBatch::new("S3", "U4", "Cool"),
                ],
            )
        };

        let first = assemble(build()).unwrap();
        let second = assemble(build()).unwrap();
        assert_eq!(first, second);

        let order: Vec<&str> = first.batches.iter().map(|b| b.uid.as_str()).collect();
        assert_eq!(order, vec!["dummy-for-unitbatch-U1", "B2", "B1"]);

        let b1_units: Vec<&str> = first.batches[2]
            .unit_batches
            .iter()
            .map(|u| u.uid.as_str())
            .collect();
        assert_eq!(b1_units, vec!["U3", "U4"]);
    }

    #[test]
    fn test_empty_input() {
        let assembly = assemble(FlatHierarchy::new()).unwrap();
        assert!(assembly.batches.is_empty());
    }
}
