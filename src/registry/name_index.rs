//! Striped index of named tables

use crate::infrastructure::hash::bucket_index;
use crate::types::{TableId, NAME_INDEX_STRIPES};
use parking_lot::RwLock;

/// Name -> table map split into hashed stripes, each under its own lock
pub struct NameIndex {
    stripes: Box<[RwLock<Vec<(String, TableId)>>]>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::with_stripes(NAME_INDEX_STRIPES)
    }

    pub fn with_stripes(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| RwLock::new(Vec::new())).collect();
        Self { stripes }
    }

    fn stripe(&self, name: &str) -> &RwLock<Vec<(String, TableId)>> {
        &self.stripes[bucket_index(name, self.stripes.len())]
    }

    /// Registers `name`; false if it is already taken
    pub fn insert(&self, name: &str, id: TableId) -> bool {
        let mut stripe = self.stripe(name).write();
        if stripe.iter().any(|(n, _)| n == name) {
            return false;
        }
        stripe.push((name.to_string(), id));
        true
    }

    /// Removes `name` if it still maps to `id`
    pub fn remove(&self, name: &str, id: TableId) -> bool {
        let mut stripe = self.stripe(name).write();
        let before = stripe.len();
        stripe.retain(|(n, t)| !(n == name && *t == id));
        stripe.len() != before
    }

    pub fn lookup(&self, name: &str) -> Option<TableId> {
        self.stripe(name)
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    /// Other registered names that hash into the same stripe as `name`
    pub fn colliding(&self, name: &str) -> Vec<String> {
        self.stripe(name)
            .read()
            .iter()
            .filter(|(n, _)| n != name)
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stripes.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NameIndex {
    fn default() -> Self {
        Self::new()
    }
}
