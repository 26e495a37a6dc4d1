//! The editor: in-memory view state over the store, the cloud mirror and the
//! page bridge.
//!
//! Every mode change discards the persisted unsaved material, sets the new
//! mode and seeds the material being edited. Any mode may follow any other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::bridge::{lock, BridgeMessage, HostEvent, SharedBackground, UnitType};
use crate::catalog::Catalog;
use crate::cloud::CloudMirror;
use crate::error::{PresetError, Result};
use crate::logging::log_runtime_error;
use crate::material::{MaterialField, MaterialId, Preset, RawMaterial, Setting, SettingKind};
use crate::store::LocalStore;

const DESIGN_SVG_URL: &str = "https://storage.googleapis.com/glowforge-files/designs";

pub const MSG_INVALID: &str = "A material property is invalid.";
pub const MSG_DUPLICATE: &str = "A material with the same name already exists.";
pub const MSG_EDIT_CONFLICT: &str = "Could not update. A material with the same name already exists.";
pub const MSG_CLONE_MISSING: &str = "Could not clone the source material was removed.";
pub const MSG_NOT_FOUND: &str = "The selected material could not be found.";
pub const MSG_RESTORED: &str = "Material settings were automatically restored from a previous session.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditorMode {
    Display,
    Add,
    Edit,
    Duplicate,
    Selected,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn info(message: &str) -> Self {
        Notice {
            kind: NoticeKind::Info,
            message: message.to_string(),
        }
    }

    pub fn error(message: &str) -> Self {
        Notice {
            kind: NoticeKind::Error,
            message: message.to_string(),
        }
    }
}

/// Change notifications for whoever renders the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    ModeChanged(EditorMode),
    MaterialsChanged,
    SyncStatusChanged(bool),
    CloudUsageChanged(usize),
    Notice(Option<Notice>),
}

/// Serializable picture of the editor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerView {
    pub mode: EditorMode,
    pub materials: Vec<RawMaterial>,
    pub temp_material: RawMaterial,
    pub synchronized: bool,
    pub notice: Option<Notice>,
    pub previous_title: Option<String>,
    pub backups: Vec<String>,
    pub cloud_bytes_used: usize,
    pub cloud_quota: usize,
    pub last_cloud_sync: Option<DateTime<Utc>>,
    pub serial: Option<String>,
    pub raw_svg: Option<String>,
}

pub struct Controller {
    store: LocalStore,
    cloud: CloudMirror,
    background: SharedBackground,
    dev_mode: bool,

    mode: EditorMode,
    catalog: Catalog,
    temp_material: RawMaterial,
    synchronized: bool,
    notice: Option<Notice>,
    previous_title: Option<String>,
    backups: Vec<String>,
    cloud_bytes_used: usize,
    last_cloud_sync: Option<DateTime<Utc>>,
    serial: Option<String>,
    raw_svg: Option<String>,

    subscribers: Vec<Sender<ControllerEvent>>,
}

impl Controller {
    pub fn new(store: LocalStore, cloud: CloudMirror, background: SharedBackground) -> Self {
        Controller {
            store,
            cloud,
            background,
            dev_mode: false,
            mode: EditorMode::Display,
            catalog: Catalog::default(),
            temp_material: RawMaterial::default(),
            synchronized: true,
            notice: None,
            previous_title: None,
            backups: Vec::new(),
            cloud_bytes_used: 0,
            last_cloud_sync: None,
            serial: None,
            raw_svg: None,
            subscribers: Vec::new(),
        }
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn subscribe(&mut self) -> Receiver<ControllerEvent> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: ControllerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Read the initial state. An unsaved material from a previous session
    /// reopens the add form.
    pub fn load(&mut self) -> Result<()> {
        self.cloud_bytes_used = self.cloud_bytes();
        let doc = self.store.get_local_storage()?;
        self.catalog = Catalog::from_document(&doc);
        self.backups = doc
            .backup
            .as_ref()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        self.synchronized = !doc.should_update;

        if let Some(mut temp) = doc.temp_material {
            temp.clear_validation();
            self.temp_material = temp;
            self.mode = EditorMode::Add;
            self.notice = Some(Notice::info(MSG_RESTORED));
        }
        self.emit(ControllerEvent::MaterialsChanged);
        Ok(())
    }

    fn cloud_bytes(&self) -> usize {
        match self.cloud.bytes_in_use() {
            Ok(bytes) => bytes,
            Err(e) => {
                log_runtime_error(self.dev_mode, "cloud bytes in use", &e);
                self.cloud_bytes_used
            }
        }
    }

    /// One pass of the editor's poll. Returns whether anything visible changed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let mut changed = false;

        let updated = match self.cloud.synchronize(&self.store) {
            Ok(updated) => updated,
            Err(e) => {
                log_runtime_error(self.dev_mode, "cloud synchronize", &e);
                false
            }
        };
        // Read after the merge, which may have written the catalog.
        let cloud_bytes_used = self.cloud_bytes();
        let should_update = self.store.get_should_update()?;
        if updated {
            self.reload_catalog()?;
            let title = self.temp_material.title();
            if let Some(preset) = self.catalog.find_by_title(&title) {
                let mut refreshed = preset.raw.clone();
                refreshed.clear_validation();
                self.temp_material = refreshed;
            }
            self.last_cloud_sync = Some(now);
            self.emit(ControllerEvent::MaterialsChanged);
            changed = true;
        }

        let ui = self.store.get_ui_settings()?.unwrap_or_default();
        let raw_svg = ui
            .loaded_design_id
            .as_ref()
            .map(|id| format!("{}/{}/svgf/svgf_file.gzip.svg", DESIGN_SVG_URL, id));

        if self.synchronized == should_update {
            self.synchronized = !should_update;
            let synchronized = self.synchronized;
            self.emit(ControllerEvent::SyncStatusChanged(synchronized));
            changed = true;
        }
        if cloud_bytes_used != self.cloud_bytes_used {
            self.cloud_bytes_used = cloud_bytes_used;
            self.emit(ControllerEvent::CloudUsageChanged(cloud_bytes_used));
            changed = true;
        }
        if raw_svg != self.raw_svg || ui.serial != self.serial {
            self.raw_svg = raw_svg;
            self.serial = ui.serial;
            changed = true;
        }

        let events = lock(&self.background)?.drain_events();
        for event in events {
            self.handle_event(event)?;
        }

        Ok(changed)
    }

    fn handle_event(&mut self, event: HostEvent) -> Result<()> {
        match event {
            HostEvent::QrDetected { data } => {
                let id = match MaterialId::parse(data.trim()) {
                    Ok(id) => id,
                    Err(_) => {
                        log::debug!("Ignoring QR code {}", data);
                        return Ok(());
                    }
                };
                if self.catalog.find_by_id(&id).is_some() {
                    log::info!("QR code selects {}", id);
                    lock(&self.background)?
                        .send_message(BridgeMessage::SelectMaterial { material_id: id })?;
                }
            }
            HostEvent::Clone { design_id } => {
                log::info!("Clone requested for design {:?}", design_id);
            }
        }
        Ok(())
    }

    fn reload_catalog(&mut self) -> Result<()> {
        self.catalog = Catalog::from_document(&self.store.get_local_storage()?);
        Ok(())
    }

    fn persist_catalog(&self) -> Result<()> {
        self.store
            .store_catalog(self.catalog.formatted(), self.catalog.raw())
    }

    // Unsaved material
    // -----------------------------------------------------------------

    pub fn update_material(&mut self, field: MaterialField) {
        self.temp_material.apply(field);
    }

    pub fn add_setting(&mut self, kind: SettingKind) {
        self.temp_material.add_setting(kind);
    }

    pub fn remove_setting(&mut self, kind: SettingKind, index: usize) -> Result<()> {
        self.temp_material.remove_setting(kind, index)
    }

    pub fn update_setting(&mut self, index: usize, setting: Setting) -> Result<()> {
        self.temp_material.update_setting(index, setting)
    }

    /// Record the outcome of one field check. `None` means not yet checked.
    pub fn validation_handler(&mut self, id: &str, valid: Option<bool>) {
        self.temp_material.set_validation(id, valid);
    }

    pub fn validate_temp_material(&mut self) -> bool {
        self.temp_material.validate()
    }

    /// Keep the material being added so a closed editor can restore it.
    pub fn store_temp_material(&self) -> Result<()> {
        if self.mode == EditorMode::Add {
            self.store.store_temp_material(&self.temp_material)?;
        }
        Ok(())
    }

    fn check_valid(&mut self) -> Result<()> {
        if self.temp_material.is_valid() {
            return Ok(());
        }
        self.display_message(Notice::error(MSG_INVALID));
        self.temp_material.reject_unset();
        Err(PresetError::Validation(MSG_INVALID.to_string()))
    }

    // Materials
    // -----------------------------------------------------------------

    /// Save the unsaved material as a new entry.
    pub fn add_material(&mut self) -> Result<MaterialId> {
        self.check_valid()?;

        let title = self.temp_material.title();
        let id = MaterialId::from_title(&title);
        if self.catalog.conflicts_with(&id, &title) {
            self.display_message(Notice::error(MSG_DUPLICATE));
            return Err(PresetError::Duplicate(title));
        }

        let preset = Preset::new(id.clone(), self.temp_material.clone());
        self.catalog.push(preset.clone());
        self.persist_catalog()?;
        self.store.clear_temp_material()?;

        if let Err(e) = self.cloud.send_material(&preset.raw) {
            log_runtime_error(self.dev_mode, "cloud send", &e);
        }

        self.notice = None;
        self.synchronized = false;
        self.emit(ControllerEvent::MaterialsChanged);
        self.emit(ControllerEvent::SyncStatusChanged(false));
        log::info!("Added material {} ({})", title, id);

        self.set_editor_mode_select(&title)?;
        Ok(id)
    }

    /// Save the unsaved material over the entry titled `title`, keeping its id.
    pub fn edit_material(&mut self, title: &str) -> Result<MaterialId> {
        self.check_valid()?;

        if self.catalog.count_title(title) != 1 {
            self.display_message(Notice::error(MSG_EDIT_CONFLICT));
            return Err(PresetError::Duplicate(title.to_string()));
        }
        let new_title = self.temp_material.title();
        if new_title != title && self.catalog.find_by_title(&new_title).is_some() {
            self.display_message(Notice::error(MSG_EDIT_CONFLICT));
            return Err(PresetError::Duplicate(new_title));
        }

        let previous = match self.catalog.find_by_title(title) {
            Some(p) => p.clone(),
            None => return Err(PresetError::NotFound(title.to_string())),
        };

        self.catalog.remove_title(title);
        let preset = Preset::new(previous.id.clone(), self.temp_material.clone());
        self.catalog.push(preset.clone());
        self.persist_catalog()?;

        if let Err(e) = self.cloud.remove_material(&previous.raw) {
            log_runtime_error(self.dev_mode, "cloud remove", &e);
        }
        if let Err(e) = self.cloud.send_material(&preset.raw) {
            log_runtime_error(self.dev_mode, "cloud send", &e);
        }

        self.notice = None;
        self.synchronized = false;
        self.emit(ControllerEvent::MaterialsChanged);
        self.emit(ControllerEvent::SyncStatusChanged(false));
        log::info!("Updated material {} ({})", new_title, previous.id);

        self.set_editor_mode_select(&new_title)?;
        Ok(previous.id)
    }

    /// Open a copy of `title` named `"<name> (<n>)"` in duplicate mode.
    pub fn copy_material(&mut self, title: &str) -> Result<()> {
        let count = self.catalog.count_title(title);
        let source = match self.catalog.find_by_title(title) {
            Some(p) => p.raw.duplicate_named(count),
            _ => {
                self.display_message(Notice::info(MSG_CLONE_MISSING));
                return Err(PresetError::NotFound(title.to_string()));
            }
        };
        self.set_editor_mode_duplicate(source)
    }

    /// Delete `title` everywhere. Returns false when there was nothing to remove.
    pub fn remove_material(&mut self, title: &str) -> Result<bool> {
        let found = match self.catalog.find_by_title(title) {
            Some(p) => p.raw.clone(),
            None => return Ok(false),
        };

        if let Err(e) = self.cloud.remove_material(&found) {
            log_runtime_error(self.dev_mode, "cloud remove", &e);
        }
        self.store.remove_material_by_title(title)?;
        self.store.remove_raw_material_by_title(title)?;
        self.catalog.remove_title(title);

        self.synchronized = false;
        self.emit(ControllerEvent::MaterialsChanged);
        self.emit(ControllerEvent::SyncStatusChanged(false));
        log::info!("Removed material {}", title);

        self.set_editor_mode_default()?;
        Ok(true)
    }

    /// Select `title` in the host application.
    pub fn set_material(&mut self, title: &str) -> Result<MaterialId> {
        let id = self
            .catalog
            .find_by_title(title)
            .map(|p| p.id.clone())
            .unwrap_or_else(|| MaterialId::from_title(title));
        lock(&self.background)?.send_message(BridgeMessage::SelectMaterial {
            material_id: id.clone(),
        })?;
        Ok(id)
    }

    /// Switch the host application's display units.
    pub fn set_units(&mut self, unit_type: UnitType) -> Result<()> {
        lock(&self.background)?.send_message(BridgeMessage::ToggleUnits { unit_type })?;
        Ok(())
    }

    // Synchronization
    // -----------------------------------------------------------------

    pub fn force_synchronize(&mut self) -> Result<()> {
        self.store.force_sync()?;
        self.synchronized = false;
        self.emit(ControllerEvent::SyncStatusChanged(false));
        Ok(())
    }

    /// Flip cloud sync for the material being viewed.
    pub fn toggle_cloud_sync(&mut self) -> Result<bool> {
        let title = self.temp_material.title();
        let existing = match self.catalog.find_by_title(&title) {
            Some(p) => p.clone(),
            None => {
                self.display_message(Notice::info(MSG_NOT_FOUND));
                return Err(PresetError::NotFound(title));
            }
        };

        let mut updated = self.temp_material.clone();
        updated.sync = !updated.sync;

        if updated.sync {
            if let Err(e) = self.cloud.send_material(&updated) {
                self.display_message(Notice::error(&e.to_string()));
                return Err(e);
            }
        } else if let Err(e) = self.cloud.remove_material(&updated) {
            log_runtime_error(self.dev_mode, "cloud remove", &e);
        }

        let mut raw = existing.raw;
        raw.sync = updated.sync;
        self.catalog.upsert(Preset::new(existing.id, raw));
        self.persist_catalog()?;

        self.temp_material = updated;
        self.notice = None;
        self.synchronized = false;
        self.cloud_bytes_used = self.cloud_bytes();
        self.emit(ControllerEvent::MaterialsChanged);
        self.emit(ControllerEvent::SyncStatusChanged(false));
        Ok(self.temp_material.sync)
    }

    // Messages
    // -----------------------------------------------------------------

    pub fn display_message(&mut self, notice: Notice) {
        self.notice = Some(notice.clone());
        self.emit(ControllerEvent::Notice(Some(notice)));
    }

    pub fn clear_message(&mut self) {
        self.notice = None;
        self.emit(ControllerEvent::Notice(None));
    }

    // Modes
    // -----------------------------------------------------------------

    /// Discard the persisted unsaved material, then switch mode and seed the
    /// material being edited.
    pub fn change_editor_mode(
        &mut self,
        mode: EditorMode,
        material: Option<RawMaterial>,
    ) -> Result<()> {
        self.previous_title = Some(self.temp_material.title());
        self.store.clear_temp_material()?;
        self.mode = mode;
        self.temp_material = material.unwrap_or_default();
        self.emit(ControllerEvent::ModeChanged(mode));
        Ok(())
    }

    pub fn set_editor_mode_add(&mut self, material: Option<RawMaterial>) -> Result<()> {
        self.change_editor_mode(EditorMode::Add, material)
    }

    pub fn set_editor_mode_backup(&mut self) -> Result<()> {
        self.change_editor_mode(EditorMode::Backup, None)
    }

    pub fn set_editor_mode_default(&mut self) -> Result<()> {
        self.change_editor_mode(EditorMode::Display, None)
    }

    pub fn set_editor_mode_duplicate(&mut self, material: RawMaterial) -> Result<()> {
        self.change_editor_mode(EditorMode::Duplicate, Some(material))
    }

    pub fn set_editor_mode_edit(&mut self, title: &str) -> Result<()> {
        self.open_existing(EditorMode::Edit, title)
    }

    pub fn set_editor_mode_select(&mut self, title: &str) -> Result<()> {
        self.open_existing(EditorMode::Selected, title)
    }

    fn open_existing(&mut self, mode: EditorMode, title: &str) -> Result<()> {
        let raw = match self.catalog.find_by_title(title) {
            Some(p) => {
                let mut raw = p.raw.clone();
                raw.clear_validation();
                raw
            }
            None => {
                self.display_message(Notice::info(MSG_NOT_FOUND));
                self.set_editor_mode_default()?;
                return Err(PresetError::NotFound(title.to_string()));
            }
        };
        self.change_editor_mode(mode, Some(raw))
    }

    // Backups
    // -----------------------------------------------------------------

    pub fn create_backup(&mut self, now: DateTime<Utc>) -> Result<String> {
        let name = self.store.create_backup(now)?;
        self.backups = self.store.get_backups()?.into_keys().collect();
        Ok(name)
    }

    pub fn restore_backup(&mut self, name: &str) -> Result<()> {
        self.store.restore_backup(name)?;
        self.reload_catalog()?;
        self.synchronized = false;
        self.emit(ControllerEvent::MaterialsChanged);
        self.emit(ControllerEvent::SyncStatusChanged(false));
        self.set_editor_mode_default()
    }

    // Accessors
    // -----------------------------------------------------------------

    pub fn background(&self) -> &SharedBackground {
        &self.background
    }

    pub fn mode(&self) -> EditorMode {
        self.mode
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn temp_material(&self) -> &RawMaterial {
        &self.temp_material
    }

    pub fn synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn previous_title(&self) -> Option<&str> {
        self.previous_title.as_deref()
    }

    pub fn backups(&self) -> &[String] {
        &self.backups
    }

    pub fn snapshot(&self) -> ControllerView {
        ControllerView {
            mode: self.mode,
            materials: self.catalog.raw(),
            temp_material: self.temp_material.clone(),
            synchronized: self.synchronized,
            notice: self.notice.clone(),
            previous_title: self.previous_title.clone(),
            backups: self.backups.clone(),
            cloud_bytes_used: self.cloud_bytes_used,
            cloud_quota: self.cloud.quota(),
            last_cloud_sync: self.last_cloud_sync,
            serial: self.serial.clone(),
            raw_svg: self.raw_svg.clone(),
        }
    }
}
