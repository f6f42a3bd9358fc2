//! Replicate-aware experiment storage.
//!
//! Each slot holds one primary experiment followed by its replicates, in insertion
//! order. `replicates(i)[0]` is always `primary(i)`, and no slot is ever empty.

use crate::domain::Experiment;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct DataHolder {
    slots: Vec<Vec<Experiment>>,
}

impl DataHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Start a new slot; returns its index.
    pub fn add_primary(&mut self, experiment: Experiment) -> usize {
        self.slots.push(vec![experiment]);
        self.slots.len() - 1
    }

    /// Append a replicate to slot `i`.
    pub fn add_replicate(&mut self, i: usize, experiment: Experiment) -> Result<()> {
        let slot = self.slot_mut(i)?;
        slot.push(experiment);
        Ok(())
    }

    pub fn primary(&self, i: usize) -> Option<&Experiment> {
        self.slots.get(i).and_then(|s| s.first())
    }

    /// Primary followed by its replicates.
    pub fn replicates(&self, i: usize) -> Option<&[Experiment]> {
        self.slots.get(i).map(Vec::as_slice)
    }

    pub fn primaries(&self) -> impl Iterator<Item = &Experiment> {
        self.slots.iter().filter_map(|s| s.first())
    }

    /// Every experiment of every slot.
    pub fn iter_all(&self) -> impl Iterator<Item = &Experiment> {
        self.slots.iter().flatten()
    }

    /// Remove slot `i` with all its replicates.
    pub fn delete(&mut self, i: usize) -> Result<Vec<Experiment>> {
        self.slot_mut(i)?;
        Ok(self.slots.remove(i))
    }

    /// Remove replicate `j` of slot `i`.
    ///
    /// Removing the primary (`j == 0`) promotes the next replicate. Removing the only
    /// experiment of a slot removes the slot.
    pub fn delete_replicate(&mut self, i: usize, j: usize) -> Result<Experiment> {
        let slot = self.slot_mut(i)?;
        if j >= slot.len() {
            return Err(Error::invalid_argument(format!(
                "Slot {i} has no replicate {j} (it holds {}).",
                slot.len()
            )));
        }
        let removed = slot.remove(j);
        if slot.is_empty() {
            self.slots.remove(i);
        }
        Ok(removed)
    }

    fn slot_mut(&mut self, i: usize) -> Result<&mut Vec<Experiment>> {
        let n = self.slots.len();
        self.slots
            .get_mut(i)
            .ok_or_else(|| Error::invalid_argument(format!("No experiment at index {i} (have {n}).")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeAxis;

    fn exp(label: &str) -> Experiment {
        Experiment::new(label, TimeAxis::seconds("Time", Vec::new()))
    }

    fn holder() -> DataHolder {
        let mut h = DataHolder::new();
        let a = h.add_primary(exp("a"));
        h.add_replicate(a, exp("a2")).unwrap();
        h.add_replicate(a, exp("a3")).unwrap();
        h.add_primary(exp("b"));
        h
    }

    fn labels(h: &DataHolder, i: usize) -> Vec<String> {
        h.replicates(i).unwrap().iter().map(|e| e.label.clone()).collect()
    }

    #[test]
    fn primary_heads_its_replicates() {
        let h = holder();
        assert_eq!(h.len(), 2);
        for i in 0..h.len() {
            assert_eq!(h.primary(i), h.replicates(i).unwrap().first());
        }
        assert_eq!(labels(&h, 0), vec!["a", "a2", "a3"]);
        assert_eq!(h.iter_all().count(), 4);
    }

    #[test]
    fn deleting_primary_promotes_next() {
        let mut h = holder();
        let removed = h.delete_replicate(0, 0).unwrap();
        assert_eq!(removed.label, "a");
        assert_eq!(h.primary(0).unwrap().label, "a2");
        assert_eq!(labels(&h, 0), vec!["a2", "a3"]);
    }

    #[test]
    fn deleting_last_member_removes_slot() {
        let mut h = holder();
        h.delete_replicate(1, 0).unwrap();
        assert_eq!(h.len(), 1);
        assert!(h.delete_replicate(0, 5).is_err());
    }

    #[test]
    fn delete_slot() {
        let mut h = holder();
        assert_eq!(h.delete(0).unwrap().len(), 3);
        assert_eq!(h.primary(0).unwrap().label, "b");
        assert!(h.delete(3).is_err());
        assert!(h.add_replicate(7, exp("x")).is_err());
    }
}
