use crate::table::FieldTable;
use std::collections::{BTreeMap, BTreeSet};

// Load state of one field in the series store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Indexed,
    PartiallyLoaded,
    FullyLoaded,
}

// Timestep slots of one field: what the stream offers and what is in memory
#[derive(Debug, Clone, Default)]
pub struct SeriesSlots {
    available: BTreeSet<usize>,
    tables: BTreeMap<usize, FieldTable>,
}

impl SeriesSlots {
    pub fn new(available: impl IntoIterator<Item = usize>) -> Self {
        SeriesSlots {
            available: available.into_iter().collect(),
            tables: BTreeMap::new(),
        }
    }

    pub fn available(&self) -> &BTreeSet<usize> {
        &self.available
    }

    pub fn is_available(&self, istep: usize) -> bool {
        self.available.contains(&istep)
    }

    /// Stores a fully built table for `istep`.
    pub fn insert(&mut self, istep: usize, table: FieldTable) {
        self.tables.insert(istep, table);
    }

    pub fn get(&self, istep: usize) -> Option<&FieldTable> {
        self.tables.get(&istep)
    }

    /// Loaded timesteps, ascending.
    pub fn loaded(&self) -> impl Iterator<Item = (usize, &FieldTable)> {
        self.tables.iter().map(|(i, t)| (*i, t))
    }

    pub fn loaded_count(&self) -> usize {
        self.tables.len()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn state(&self) -> LoadState {
        if self.tables.is_empty() {
            LoadState::Indexed
        } else if self.available.iter().all(|i| self.tables.contains_key(i)) {
            LoadState::FullyLoaded
        } else {
            LoadState::PartiallyLoaded
        }
    }
}
