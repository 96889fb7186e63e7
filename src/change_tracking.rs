use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;

use crate::mapping::Entity;
use crate::query::{Params, SqlParam};

/// Snapshot of an entity's field values used to find what changed.
///
/// ```ignore
/// let mut entry = EntityEntry::new(&product);
/// product.price = dec!(2.0);
/// entry.detect_changes(&product);
/// repo.update_tracked(&product, &entry).await?;
/// ```
#[derive(Debug, Clone)]
pub struct EntityEntry<T: Entity> {
    original: HashMap<String, SqlParam>,
    order: Vec<String>,
    modified: BTreeSet<usize>,
    extra: Vec<String>,
    _t: PhantomData<fn() -> T>,
}

impl<T: Entity> EntityEntry<T> {
    pub fn new(entity: &T) -> Self {
        let params = entity.to_params();
        Self {
            order: params.iter().map(|p| p.name.clone()).collect(),
            original: params
                .iter()
                .map(|p| (p.name.clone(), p.value.clone()))
                .collect(),
            modified: BTreeSet::new(),
            extra: Vec::new(),
            _t: PhantomData,
        }
    }

    /// Flags `field` as modified regardless of its value.
    pub fn mark(&mut self, field: &str) {
        match self.order.iter().position(|f| f == field) {
            Some(i) => {
                self.modified.insert(i);
            }
            None if !self.extra.iter().any(|f| f == field) => self.extra.push(field.to_string()),
            None => {}
        }
    }

    /// Adds every field whose current value differs from the snapshot and
    /// returns the full modified list.
    pub fn detect_changes(&mut self, current: &T) -> Vec<String> {
        let params: Params = current.to_params();
        for (i, name) in self.order.iter().enumerate() {
            if params.value(name) != self.original.get(name) {
                self.modified.insert(i);
            }
        }
        self.modified()
    }

    /// Modified fields in declaration order; manually marked names the
    /// entity does not expose come last.
    pub fn modified(&self) -> Vec<String> {
        self.modified
            .iter()
            .map(|&i| self.order[i].clone())
            .chain(self.extra.iter().cloned())
            .collect()
    }

    pub fn is_modified(&self) -> bool {
        !self.modified.is_empty() || !self.extra.is_empty()
    }

    pub fn original_value(&self, field: &str) -> Option<&SqlParam> {
        self.original.get(field)
    }
}
