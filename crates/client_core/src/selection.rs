//! Curated subset of ingested photos, keyed by filename.
//!
//! A [`SelectionSet`] is a cheap-to-clone snapshot: mutation copies the
//! underlying set only when another snapshot still shares it, so a renderer
//! holding an older snapshot never observes a change.

use std::{collections::BTreeSet, sync::Arc};

use shared::domain::Photo;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    members: Arc<BTreeSet<String>>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_photos(photos: &[Photo]) -> Self {
        Self::from_universe(photos.iter().map(|photo| photo.filename.clone()))
    }

    pub fn from_universe<I, S>(universe: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: Arc::new(universe.into_iter().map(Into::into).collect()),
        }
    }

    /// Flips membership of `id`. Returns whether it is selected afterwards.
    pub fn toggle(&mut self, id: &str) -> bool {
        let members = Arc::make_mut(&mut self.members);
        if members.remove(id) {
            false
        } else {
            members.insert(id.to_string());
            true
        }
    }

    pub fn select_all<I, S>(&mut self, universe: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self = Self::from_universe(universe);
    }

    pub fn deselect_all(&mut self) {
        if !self.members.is_empty() {
            self.members = Arc::new(BTreeSet::new());
        }
    }

    /// Drops every member not present in `photos`.
    pub fn retain_existing(&mut self, photos: &[Photo]) {
        let universe: BTreeSet<&str> = photos.iter().map(|p| p.filename.as_str()).collect();
        if self.members.iter().all(|id| universe.contains(id.as_str())) {
            return;
        }
        Arc::make_mut(&mut self.members).retain(|id| universe.contains(id.as_str()));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }
}
