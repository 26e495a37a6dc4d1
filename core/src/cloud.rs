//! Mirror of synced materials in the browser's quota-limited sync area.
//!
//! Each material is one entry: the hashed title maps to the material's JSON,
//! deflated and base64 encoded. There is no versioning; the last writer wins.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::catalog::Catalog;
use crate::error::{PresetError, Result};
use crate::material::{title_hash, MaterialId, Preset, RawMaterial};
use crate::store::LocalStore;

/// Key/value store with a fixed byte budget.
pub trait SyncArea: Send + Sync {
    fn get_all(&self) -> Result<BTreeMap<String, String>>;
    /// Fails with `QuotaExceeded` when the write would not fit.
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn quota(&self) -> usize;

    fn bytes_in_use(&self) -> Result<usize> {
        Ok(self
            .get_all()?
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum())
    }
}

/// Bytes an entry is charged: the key plus the JSON encoding of the value.
pub fn entry_size(key: &str, value: &str) -> usize {
    key.len() + serde_json::to_string(value).map(|s| s.len()).unwrap_or(value.len() + 2)
}

fn check_quota(
    entries: &BTreeMap<String, String>,
    key: &str,
    value: &str,
    quota: usize,
) -> Result<()> {
    let used: usize = entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| entry_size(k, v))
        .sum();
    let needed = entry_size(key, value);
    let available = quota.saturating_sub(used);
    if needed > available {
        return Err(PresetError::QuotaExceeded { needed, available });
    }
    Ok(())
}

pub struct MemorySyncArea {
    entries: Mutex<BTreeMap<String, String>>,
    quota: usize,
}

impl MemorySyncArea {
    pub fn new(quota: usize) -> Self {
        MemorySyncArea {
            entries: Mutex::new(BTreeMap::new()),
            quota,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| PresetError::Protocol("sync area lock poisoned".to_string()))
    }
}

impl SyncArea for MemorySyncArea {
    fn get_all(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.lock()?.clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        check_quota(&entries, key, value, self.quota)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn quota(&self) -> usize {
        self.quota
    }
}

/// One file per entry under a directory.
pub struct DirSyncArea {
    dir: PathBuf,
    quota: usize,
}

impl DirSyncArea {
    pub fn new(dir: impl Into<PathBuf>, quota: usize) -> Self {
        DirSyncArea {
            dir: dir.into(),
            quota,
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PresetError::Validation(format!("Invalid sync key: {}", key)));
        }
        Ok(self.dir.join(key))
    }
}

impl SyncArea for DirSyncArea {
    fn get_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.dir.exists() {
            return Ok(BTreeMap::new());
        }
        let mut entries = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(n) if !n.starts_with('.') => n,
                _ => continue,
            };
            entries.insert(name, fs::read_to_string(entry.path())?);
        }
        Ok(entries)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let entries = self.get_all()?;
        check_quota(&entries, key, value, self.quota)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(path, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn quota(&self) -> usize {
        self.quota
    }
}

pub fn compress(material: &RawMaterial) -> Result<String> {
    let mut stripped = material.clone();
    stripped.clear_validation();
    let json = serde_json::to_vec(&stripped)?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json)?;
    Ok(BASE64.encode(encoder.finish()?))
}

pub fn decompress(blob: &str) -> Result<RawMaterial> {
    let bytes = BASE64.decode(blob.trim())?;
    let mut json = Vec::new();
    DeflateDecoder::new(bytes.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| PresetError::Codec(format!("Failed to inflate material: {}", e)))?;
    Ok(serde_json::from_slice(&json)?)
}

/// Key of a material in the sync area.
pub fn sync_id(material: &RawMaterial) -> String {
    title_hash(&material.title())
}

#[derive(Clone)]
pub struct CloudMirror {
    area: Arc<dyn SyncArea>,
}

impl CloudMirror {
    pub fn new(area: impl SyncArea + 'static) -> Self {
        CloudMirror {
            area: Arc::new(area),
        }
    }

    pub fn in_memory(quota: usize) -> Self {
        CloudMirror::new(MemorySyncArea::new(quota))
    }

    pub fn get_all(&self) -> Result<BTreeMap<String, String>> {
        self.area.get_all()
    }

    pub fn set(&self, key: &str, blob: &str) -> Result<()> {
        self.area.set(key, blob)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.area.remove(key)
    }

    pub fn bytes_in_use(&self) -> Result<usize> {
        self.area.bytes_in_use()
    }

    pub fn quota(&self) -> usize {
        self.area.quota()
    }

    /// Push `material` when it is marked for sync. Returns the key written.
    pub fn send_material(&self, material: &RawMaterial) -> Result<Option<String>> {
        if !material.sync {
            return Ok(None);
        }
        let key = sync_id(material);
        self.area.set(&key, &compress(material)?)?;
        log::debug!("cloud bytes in use {}", self.area.bytes_in_use()?);
        Ok(Some(key))
    }

    pub fn remove_material(&self, material: &RawMaterial) -> Result<String> {
        let key = sync_id(material);
        self.area.remove(&key)?;
        Ok(key)
    }

    /// Merge the sync area with the local store.
    ///
    /// Entries only in the cloud are added locally and entries whose content
    /// differs replace the local copy. A synced material missing from the
    /// cloud is pushed if the cloud never had it, and removed locally if its
    /// key was there at the previous merge. Returns whether the local
    /// materials changed.
    pub fn synchronize(&self, store: &LocalStore) -> Result<bool> {
        let doc = store.get_local_storage()?;
        let mut catalog = Catalog::from_document(&doc);
        let remote = self.area.get_all()?;
        let mut changed = false;

        for (key, blob) in &remote {
            let mut incoming = match decompress(blob) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("Skipping unreadable cloud entry {}: {}", key, e);
                    continue;
                }
            };
            incoming.sync = true;
            let title = incoming.title();

            match catalog.find_by_title(&title) {
                Some(local) => {
                    if !same_settings(&local.raw, &incoming) {
                        log::info!("Updating {} from cloud", title);
                        let id = local.id.clone();
                        catalog.upsert(Preset::new(id, incoming));
                        changed = true;
                    }
                }
                None => {
                    let id = incoming
                        .id
                        .clone()
                        .unwrap_or_else(|| MaterialId::from_title(&title));
                    if catalog.find_by_id(&id).is_some() {
                        log::warn!("Cloud material {} collides with id {}", title, id);
                        continue;
                    }
                    log::info!("Adding {} from cloud", title);
                    catalog.push(Preset::new(id, incoming));
                    changed = true;
                }
            }
        }

        let mut present: BTreeSet<String> = remote.keys().cloned().collect();
        let mut deleted = Vec::new();
        for preset in catalog.presets() {
            if !preset.raw.sync {
                continue;
            }
            let key = sync_id(&preset.raw);
            if remote.contains_key(&key) {
                continue;
            }
            if doc.cloud_keys.contains(&key) {
                deleted.push(preset.title());
                continue;
            }
            log::info!("Uploading {} to cloud", preset.title());
            match self.send_material(&preset.raw) {
                Ok(_) => {
                    present.insert(key);
                }
                Err(e) => log::warn!("Could not upload {}: {}", preset.title(), e),
            }
        }

        for title in deleted {
            log::info!("Removing {}, deleted from cloud", title);
            catalog.remove_title(&title);
            changed = true;
        }

        if changed {
            store.store_catalog(catalog.formatted(), catalog.raw())?;
        }
        if present != doc.cloud_keys {
            store.store_cloud_keys(present)?;
        }
        Ok(changed)
    }
}

fn same_settings(a: &RawMaterial, b: &RawMaterial) -> bool {
    let normalize = |m: &RawMaterial| RawMaterial {
        id: None,
        prop_validation: BTreeMap::new(),
        sync: true,
        ..m.clone()
    };
    normalize(a) == normalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CLOUD_QUOTA;
    use crate::material::CutSetting;

    fn synced(name: &str) -> RawMaterial {
        let mut m = RawMaterial::new(
            "1/8in",
            name,
            3.2,
            CutSetting {
                power: 50.0,
                speed: 200.0,
                passes: 1,
                focal_offset: 0.0,
            },
        );
        m.sync = true;
        m
    }

    #[test]
    fn test_compress_round_trip_drops_validation() {
        let mut material = synced("Maple");
        material.set_validation("name", Some(true));
        let blob = compress(&material).unwrap();
        let back = decompress(&blob).unwrap();
        assert!(back.prop_validation.is_empty());
        assert_eq!(back.title(), "1/8in Maple");
        assert_eq!(back.cut, material.cut);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(decompress("not base64!").is_err());
        assert!(decompress(&BASE64.encode(b"plain")).is_err());
    }

    #[test]
    fn test_send_only_synced_materials() {
        let mirror = CloudMirror::in_memory(DEFAULT_CLOUD_QUOTA);
        let mut local_only = synced("Oak");
        local_only.sync = false;
        assert_eq!(mirror.send_material(&local_only).unwrap(), None);

        let key = mirror.send_material(&synced("Maple")).unwrap().unwrap();
        assert_eq!(key, title_hash("1/8in Maple"));
        assert!(mirror.get_all().unwrap().contains_key(&key));
        assert!(mirror.bytes_in_use().unwrap() > 0);

        mirror.remove_material(&synced("Maple")).unwrap();
        assert_eq!(mirror.bytes_in_use().unwrap(), 0);
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let area = MemorySyncArea::new(20);
        area.set("a", "12345").unwrap();
        let err = area.set("b", "1234567890123").unwrap_err();
        assert!(matches!(err, PresetError::QuotaExceeded { .. }));
        // Overwriting an entry only charges the difference.
        area.set("a", "1234567890").unwrap();
        assert_eq!(area.bytes_in_use().unwrap(), 13);
    }

    #[test]
    fn test_dir_area_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let area = DirSyncArea::new(dir.path().join("cloud"), DEFAULT_CLOUD_QUOTA);
        area.set("abc1234", "blob").unwrap();
        assert_eq!(area.get_all().unwrap()["abc1234"], "blob");
        assert!(area.set("../escape", "x").is_err());
        area.remove("abc1234").unwrap();
        assert!(area.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_synchronize_pulls_new_and_pushes_missing() {
        let store = LocalStore::in_memory();
        let mirror = CloudMirror::in_memory(DEFAULT_CLOUD_QUOTA);

        let local = synced("Oak");
        let catalog_entry = Preset::new(MaterialId::from_title(&local.title()), local.clone());
        store
            .store_catalog(vec![catalog_entry.formatted()], vec![catalog_entry.raw.clone()])
            .unwrap();

        let remote = synced("Maple");
        mirror.set(&sync_id(&remote), &compress(&remote).unwrap()).unwrap();

        assert!(mirror.synchronize(&store).unwrap());
        let titles: Vec<String> = store
            .get_raw_materials()
            .unwrap()
            .iter()
            .map(RawMaterial::title)
            .collect();
        assert_eq!(titles, vec!["1/8in Oak", "1/8in Maple"]);
        assert!(mirror.get_all().unwrap().contains_key(&sync_id(&local)));

        // Nothing left to do on the second pass.
        assert!(!mirror.synchronize(&store).unwrap());
    }

    #[test]
    fn test_synchronize_drops_material_deleted_elsewhere() {
        let mirror = CloudMirror::in_memory(DEFAULT_CLOUD_QUOTA);
        let remote = synced("Maple");
        mirror.set(&sync_id(&remote), &compress(&remote).unwrap()).unwrap();

        let store = LocalStore::in_memory();
        assert!(mirror.synchronize(&store).unwrap());
        assert_eq!(store.get_raw_materials().unwrap().len(), 1);

        // Another profile removes it.
        mirror.remove_material(&remote).unwrap();

        assert!(mirror.synchronize(&store).unwrap());
        assert!(store.get_raw_materials().unwrap().is_empty());
        assert!(mirror.get_all().unwrap().is_empty(), "not uploaded again");
        assert!(store.get_cloud_keys().unwrap().is_empty());
        assert!(!mirror.synchronize(&store).unwrap());
    }

    #[test]
    fn test_synchronize_remote_edit_wins_and_keeps_id() {
        let store = LocalStore::in_memory();
        let mirror = CloudMirror::in_memory(DEFAULT_CLOUD_QUOTA);

        let local = synced("Oak");
        let id = MaterialId::from_hash("1234567");
        let preset = Preset::new(id.clone(), local.clone());
        store
            .store_catalog(vec![preset.formatted()], vec![preset.raw.clone()])
            .unwrap();

        let mut remote = local;
        remote.cut.power = 75.0;
        mirror.set(&sync_id(&remote), &compress(&remote).unwrap()).unwrap();

        assert!(mirror.synchronize(&store).unwrap());
        let materials = store.get_materials().unwrap();
        assert_eq!(materials[0].id, id);
        assert_eq!(materials[0].settings[0].cut_setting.power, 75.0);
    }
}
