//! Requests from the extension and the replies sent back.
//!
//! The page-facing calls (`material_check`, `force_refresh`, `ack`, `event`)
//! are relayed by the extension's background script. Everything else drives
//! the editor.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use laserpresets_core::bridge::{lock, BridgeMessage, Envelope, HostEvent, UnitType};
use laserpresets_core::material::{MaterialField, RawMaterial, Setting, SettingKind};
use laserpresets_core::{Controller, ControllerView, EditorMode};

use crate::HostError;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: Option<u64>,
    pub message: String,
    pub title: Option<String>,
    pub mode: Option<EditorMode>,
    pub material: Option<RawMaterial>,
    pub field: Option<MaterialField>,
    pub kind: Option<SettingKind>,
    pub index: Option<usize>,
    pub setting: Option<Setting>,
    /// Validation key for `validate`. Without one the built-in checks run.
    pub key: Option<String>,
    pub valid: Option<bool>,
    pub seqs: Option<Vec<u64>>,
    #[serde(rename = "unitType")]
    pub unit_type: Option<UnitType>,
    pub event: Option<HostEvent>,
    /// Backup name for `restore`.
    pub name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub id: Option<u64>,
    pub success: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Envelope<BridgeMessage>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ControllerView>,
}

impl OutgoingMessage {
    pub fn failure(id: Option<u64>, error: &HostError) -> Self {
        OutgoingMessage {
            id,
            success: false,
            error: Some(error.to_string()),
            ..OutgoingMessage::default()
        }
    }

    /// Unsolicited state push from the poll thread.
    pub fn state_push(state: ControllerView) -> Self {
        OutgoingMessage {
            id: None,
            success: true,
            message_type: Some("state".to_string()),
            state: Some(state),
            ..OutgoingMessage::default()
        }
    }
}

fn required<'a, T>(value: &'a Option<T>, name: &str) -> Result<&'a T, HostError> {
    value
        .as_ref()
        .ok_or_else(|| HostError::BadRequest(format!("Missing {}", name)))
}

/// Apply one request. Failures become `success: false` replies carrying the
/// error text; the editor state is attached either way so the UI can show
/// notices.
pub fn handle_message(controller: &mut Controller, msg: &IncomingMessage) -> OutgoingMessage {
    log::debug!("Received {} message", msg.message);
    match dispatch(controller, msg) {
        Ok(messages) => OutgoingMessage {
            id: msg.id,
            success: true,
            messages,
            state: Some(controller.snapshot()),
            ..OutgoingMessage::default()
        },
        Err(e) => {
            log::info!("{} failed: {}", msg.message, e);
            OutgoingMessage {
                state: Some(controller.snapshot()),
                ..OutgoingMessage::failure(msg.id, &e)
            }
        }
    }
}

fn dispatch(
    controller: &mut Controller,
    msg: &IncomingMessage,
) -> Result<Option<Vec<Envelope<BridgeMessage>>>, HostError> {
    match msg.message.as_str() {
        "material_check" => {
            let response = lock(controller.background())?.material_check()?;
            return Ok(Some(response.messages));
        }
        "force_refresh" => lock(controller.background())?.force_refresh()?,
        "ack" => {
            lock(controller.background())?.ack(required(&msg.seqs, "seqs")?);
        }
        "event" => {
            let event = required(&msg.event, "event")?.clone();
            lock(controller.background())?.post_event(event)?;
        }
        "state" => {}
        "add" => {
            controller.add_material()?;
        }
        "edit" => {
            controller.edit_material(required(&msg.title, "title")?)?;
        }
        "remove" => {
            controller.remove_material(required(&msg.title, "title")?)?;
        }
        "copy" => controller.copy_material(required(&msg.title, "title")?)?,
        "select" => {
            controller.set_material(required(&msg.title, "title")?)?;
        }
        "set_mode" => set_mode(controller, msg)?,
        "set_units" => controller.set_units(*required(&msg.unit_type, "unitType")?)?,
        "update" => {
            controller.update_material(required(&msg.field, "field")?.clone());
            controller.store_temp_material()?;
        }
        "add_setting" => {
            controller.add_setting(*required(&msg.kind, "kind")?);
            controller.store_temp_material()?;
        }
        "remove_setting" => {
            controller.remove_setting(*required(&msg.kind, "kind")?, *required(&msg.index, "index")?)?;
            controller.store_temp_material()?;
        }
        "update_setting" => {
            controller.update_setting(
                *required(&msg.index, "index")?,
                required(&msg.setting, "setting")?.clone(),
            )?;
            controller.store_temp_material()?;
        }
        "validate" => match &msg.key {
            Some(key) => controller.validation_handler(key, msg.valid),
            None => {
                controller.validate_temp_material();
            }
        },
        "toggle_sync" => {
            controller.toggle_cloud_sync()?;
        }
        "backup" => {
            controller.create_backup(Utc::now())?;
        }
        "restore" => controller.restore_backup(required(&msg.name, "name")?)?,
        "sync" => controller.force_synchronize()?,
        "clear_message" => controller.clear_message(),
        other => {
            return Err(HostError::BadRequest(format!(
                "Unknown message type: {}",
                other
            )))
        }
    }
    Ok(None)
}

fn set_mode(controller: &mut Controller, msg: &IncomingMessage) -> Result<(), HostError> {
    match *required(&msg.mode, "mode")? {
        EditorMode::Display => controller.set_editor_mode_default()?,
        EditorMode::Add => controller.set_editor_mode_add(msg.material.clone())?,
        EditorMode::Backup => controller.set_editor_mode_backup()?,
        EditorMode::Duplicate => {
            controller.set_editor_mode_duplicate(required(&msg.material, "material")?.clone())?
        }
        EditorMode::Edit => controller.set_editor_mode_edit(required(&msg.title, "title")?)?,
        EditorMode::Selected => controller.set_editor_mode_select(required(&msg.title, "title")?)?,
    }
    Ok(())
}
