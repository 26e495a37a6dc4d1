use crate::material::{FormattedMaterial, MaterialId, Preset, RawMaterial};
use crate::store::StorageLocal;

/// The saved materials, one entry per material.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    presets: Vec<Preset>,
}

impl Catalog {
    /// Read the two persisted lists into one entity per material.
    ///
    /// Raw materials written by this crate carry their id. Older documents
    /// only relate the lists by title, so the id is looked up there once and
    /// otherwise derived from the title.
    pub fn from_lists(materials: &[FormattedMaterial], raw_materials: &[RawMaterial]) -> Self {
        let presets = raw_materials
            .iter()
            .map(|raw| {
                let id = raw.id.clone().unwrap_or_else(|| {
                    let title = raw.title();
                    materials
                        .iter()
                        .find(|m| m.title == title)
                        .map(|m| m.id.clone())
                        .unwrap_or_else(|| MaterialId::from_title(&title))
                });
                Preset::new(id, raw.clone())
            })
            .collect();
        Catalog { presets }
    }

    pub fn from_document(doc: &StorageLocal) -> Self {
        Catalog::from_lists(&doc.materials, &doc.raw_materials)
    }

    pub fn formatted(&self) -> Vec<FormattedMaterial> {
        self.presets.iter().map(Preset::formatted).collect()
    }

    pub fn raw(&self) -> Vec<RawMaterial> {
        self.presets.iter().map(|p| p.raw.clone()).collect()
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn find_by_title(&self, title: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.title() == title)
    }

    pub fn find_by_id(&self, id: &MaterialId) -> Option<&Preset> {
        self.presets.iter().find(|p| &p.id == id)
    }

    pub fn count_title(&self, title: &str) -> usize {
        self.presets.iter().filter(|p| p.title() == title).count()
    }

    /// Some existing entry has this id or this title.
    pub fn conflicts_with(&self, id: &MaterialId, title: &str) -> bool {
        self.presets
            .iter()
            .any(|p| &p.id == id || p.title() == title)
    }

    pub fn push(&mut self, preset: Preset) {
        self.presets.push(preset);
    }

    /// Drop every entry with `title`, returning how many were removed.
    pub fn remove_title(&mut self, title: &str) -> usize {
        let before = self.presets.len();
        self.presets.retain(|p| p.title() != title);
        before - self.presets.len()
    }

    /// Replace the entry with the same id, or append when there is none.
    pub fn upsert(&mut self, preset: Preset) {
        match self.presets.iter_mut().find(|p| p.id == preset.id) {
            Some(existing) => *existing = preset,
            None => self.presets.push(preset),
        }
    }
}
