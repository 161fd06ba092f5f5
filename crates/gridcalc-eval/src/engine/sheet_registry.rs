use rustc_hash::{FxHashMap, FxHashSet};

use gridcalc_common::SheetId;

/// Sheet names interned to compact ids. Lookup is case-insensitive; the
/// first spelling registered is the one reported back.
#[derive(Default, Debug, Clone)]
pub struct SheetRegistry {
    id_by_name: FxHashMap<String, SheetId>,
    name_by_id: Vec<String>,
}

impl SheetRegistry {
    pub fn new() -> Self {
        SheetRegistry::default()
    }

    pub fn id_for(&mut self, name: &str) -> SheetId {
        let key = name.to_lowercase();
        if let Some(&id) = self.id_by_name.get(&key) {
            return id;
        }

        let id = self.name_by_id.len() as SheetId;
        self.name_by_id.push(name.to_string());
        self.id_by_name.insert(key, id);
        id
    }

    pub fn name(&self, id: SheetId) -> &str {
        &self.name_by_id[id as usize]
    }

    pub fn get_id(&self, name: &str) -> Option<SheetId> {
        self.id_by_name.get(&name.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.name_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_by_id.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = SheetId> + '_ {
        (0..self.name_by_id.len()).map(|i| i as SheetId)
    }

    /// Every registered sheet is still among `names`. False after a sheet
    /// was removed or renamed, since ids are never reused.
    pub fn is_subset_of(&self, names: &[String]) -> bool {
        let current: FxHashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
        self.id_by_name.keys().all(|k| current.contains(k))
    }

    /// `names` is exactly the registered set of sheets.
    pub fn matches(&self, names: &[String]) -> bool {
        self.is_subset_of(names) && names.iter().all(|n| self.get_id(n).is_some())
    }
}
