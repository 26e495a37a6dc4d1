//! The extension-local persisted document and the operations over it.
//!
//! Every write is a read-modify-write of the whole document. There is no
//! locking between processes; the last writer wins.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{PresetError, Result};
use crate::material::{FormattedMaterial, RawMaterial};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSettings {
    pub loaded_design_id: Option<String>,
    pub serial: Option<String>,
}

/// Everything the extension keeps in local storage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageLocal {
    /// Snapshots of this document keyed by capture time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BTreeMap<String, StorageLocal>>,
    /// Host-formatted materials.
    pub materials: Vec<FormattedMaterial>,
    /// User-entered materials the formatted ones are generated from.
    pub raw_materials: Vec<RawMaterial>,
    /// Should the host application re-read the material list.
    pub should_update: bool,
    /// A material left unsaved when the editor was closed.
    pub temp_material: Option<RawMaterial>,
    pub ui: Option<UiSettings>,
    /// Sync-area keys present at the last cloud merge.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub cloud_keys: BTreeSet<String>,
}

impl StorageLocal {
    /// Copy without the nested backups, so snapshots never contain snapshots.
    pub fn without_backups(&self) -> StorageLocal {
        StorageLocal {
            backup: None,
            ..self.clone()
        }
    }
}

/// Raw persistence of the document.
pub trait LocalArea: Send + Sync {
    fn load(&self) -> Result<StorageLocal>;
    fn save(&self, doc: &StorageLocal) -> Result<()>;
}

/// Document kept as a single JSON file.
pub struct JsonFileArea {
    path: PathBuf,
}

impl JsonFileArea {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileArea { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LocalArea for JsonFileArea {
    fn load(&self) -> Result<StorageLocal> {
        if !self.path.exists() {
            return Ok(StorageLocal::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(StorageLocal::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, doc: &StorageLocal) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryArea {
    doc: Mutex<StorageLocal>,
}

impl MemoryArea {
    pub fn new() -> Self {
        MemoryArea::default()
    }
}

impl LocalArea for MemoryArea {
    fn load(&self) -> Result<StorageLocal> {
        let doc = self
            .doc
            .lock()
            .map_err(|_| PresetError::Protocol("local area lock poisoned".to_string()))?;
        Ok(doc.clone())
    }

    fn save(&self, doc: &StorageLocal) -> Result<()> {
        let mut current = self
            .doc
            .lock()
            .map_err(|_| PresetError::Protocol("local area lock poisoned".to_string()))?;
        *current = doc.clone();
        Ok(())
    }
}

#[derive(Clone)]
pub struct LocalStore {
    area: Arc<dyn LocalArea>,
}

impl LocalStore {
    pub fn new(area: impl LocalArea + 'static) -> Self {
        LocalStore {
            area: Arc::new(area),
        }
    }

    pub fn in_memory() -> Self {
        LocalStore::new(MemoryArea::new())
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        LocalStore::new(JsonFileArea::new(path))
    }

    fn update<T>(&self, f: impl FnOnce(&mut StorageLocal) -> T) -> Result<T> {
        let mut doc = self.area.load()?;
        let out = f(&mut doc);
        self.area.save(&doc)?;
        Ok(out)
    }

    /// The whole document. Absent lists read as empty.
    pub fn get_local_storage(&self) -> Result<StorageLocal> {
        self.area.load()
    }

    pub fn get_materials(&self) -> Result<Vec<FormattedMaterial>> {
        Ok(self.area.load()?.materials)
    }

    pub fn get_raw_materials(&self) -> Result<Vec<RawMaterial>> {
        Ok(self.area.load()?.raw_materials)
    }

    /// Replace the host-formatted list and ask the host to re-read it.
    pub fn store_materials(&self, materials: Vec<FormattedMaterial>) -> Result<()> {
        self.update(|doc| {
            doc.materials = materials;
            doc.should_update = true;
        })
    }

    /// Replace the raw list and ask the host to re-read.
    pub fn store_raw_materials(&self, raw_materials: Vec<RawMaterial>) -> Result<()> {
        self.update(|doc| {
            doc.raw_materials = raw_materials;
            doc.should_update = true;
        })
    }

    /// Both lists in one write.
    pub fn store_catalog(
        &self,
        materials: Vec<FormattedMaterial>,
        raw_materials: Vec<RawMaterial>,
    ) -> Result<()> {
        self.update(|doc| {
            doc.materials = materials;
            doc.raw_materials = raw_materials;
            doc.should_update = true;
        })
    }

    pub fn remove_material_by_title(&self, title: &str) -> Result<Vec<FormattedMaterial>> {
        log::info!("Removing material {}", title);
        let mut materials = self.get_materials()?;
        let before = materials.len();
        materials.retain(|m| m.title != title);
        if materials.len() == before {
            return Ok(materials);
        }
        self.store_materials(materials.clone())?;
        Ok(materials)
    }

    pub fn remove_raw_material_by_title(&self, title: &str) -> Result<Vec<RawMaterial>> {
        log::info!("Removing raw material {}", title);
        let mut raw = self.get_raw_materials()?;
        let before = raw.len();
        raw.retain(|m| m.title() != title);
        if raw.len() == before {
            return Ok(raw);
        }
        self.store_raw_materials(raw.clone())?;
        Ok(raw)
    }

    pub fn get_temp_material(&self) -> Result<Option<RawMaterial>> {
        Ok(self.area.load()?.temp_material)
    }

    pub fn store_temp_material(&self, material: &RawMaterial) -> Result<()> {
        self.update(|doc| doc.temp_material = Some(material.clone()))
    }

    pub fn clear_temp_material(&self) -> Result<()> {
        self.update(|doc| doc.temp_material = None)
    }

    pub fn get_should_update(&self) -> Result<bool> {
        Ok(self.area.load()?.should_update)
    }

    /// Ask the host application to re-read everything.
    pub fn force_sync(&self) -> Result<()> {
        self.update(|doc| doc.should_update = true)
    }

    pub fn clear_should_update(&self) -> Result<()> {
        self.update(|doc| doc.should_update = false)
    }

    pub fn get_ui_settings(&self) -> Result<Option<UiSettings>> {
        Ok(self.area.load()?.ui)
    }

    pub fn store_ui_settings(&self, ui: UiSettings) -> Result<()> {
        self.update(|doc| doc.ui = Some(ui))
    }

    pub fn get_cloud_keys(&self) -> Result<BTreeSet<String>> {
        Ok(self.area.load()?.cloud_keys)
    }

    pub fn store_cloud_keys(&self, keys: BTreeSet<String>) -> Result<()> {
        self.update(|doc| doc.cloud_keys = keys)
    }

    pub fn get_backups(&self) -> Result<BTreeMap<String, StorageLocal>> {
        Ok(self.area.load()?.backup.unwrap_or_default())
    }

    pub fn get_backup(&self, name: &str) -> Result<Option<StorageLocal>> {
        Ok(self.get_backups()?.remove(name))
    }

    /// Merge `backup` into the backup map under `name`.
    pub fn store_backup(&self, name: &str, backup: &StorageLocal) -> Result<()> {
        let snapshot = backup.without_backups();
        self.update(|doc| {
            doc.backup
                .get_or_insert_with(BTreeMap::new)
                .insert(name.to_string(), snapshot);
        })
    }

    /// Snapshot the current document under its ISO-8601 capture time.
    pub fn create_backup(&self, now: DateTime<Utc>) -> Result<String> {
        let name = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let current = self.get_local_storage()?;
        self.store_backup(&name, &current)?;
        log::info!("Created backup {}", name);
        Ok(name)
    }

    /// Put a snapshot back in place. The backup map itself is kept and the
    /// host is asked to re-read.
    pub fn restore_backup(&self, name: &str) -> Result<StorageLocal> {
        let doc = self.area.load()?;
        let backups = doc.backup.unwrap_or_default();
        let snapshot = backups
            .get(name)
            .cloned()
            .ok_or_else(|| PresetError::NotFound(format!("backup {}", name)))?;

        // What the sync area held at the last merge is not part of a snapshot.
        let restored = StorageLocal {
            backup: Some(backups),
            should_update: true,
            cloud_keys: doc.cloud_keys,
            ..snapshot
        };
        self.area.save(&restored)?;
        log::info!("Restored backup {}", name);
        Ok(restored)
    }
}
