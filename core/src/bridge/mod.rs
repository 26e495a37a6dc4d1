//! Messaging between the extension and the script injected into the host page.
//!
//! The page script polls for pending messages, turns each into an action on
//! the host application's store, and acknowledges what it handled.

mod background;
mod channel;
mod content;

pub use background::{lock, Background, SharedBackground};
pub use channel::{Envelope, MessageChannel};
pub use content::{
    ContentBridge, HostDispatcher, HttpSource, JsonLinesDispatcher, LocalSource, MessageSource,
    RecordingDispatcher,
};

use serde::{Deserialize, Serialize};

use crate::material::{FormattedMaterial, MaterialId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitType {
    Metric,
    Imperial,
}

/// A request from the page script: `{"materialCheck": true}` or
/// `{"forceRefresh": true}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub material_check: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_refresh: bool,
}

impl BridgeRequest {
    pub fn material_check() -> Self {
        BridgeRequest {
            material_check: true,
            ..BridgeRequest::default()
        }
    }

    pub fn force_refresh() -> Self {
        BridgeRequest {
            force_refresh: true,
            ..BridgeRequest::default()
        }
    }
}

/// Extension to page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeMessage {
    SetMaterials {
        materials: Vec<FormattedMaterial>,
    },
    SetMaterial {
        material: FormattedMaterial,
    },
    Clone,
    ToggleUnits {
        #[serde(rename = "unitType")]
        unit_type: UnitType,
    },
    SelectMaterial {
        #[serde(rename = "materialId")]
        material_id: MaterialId,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialCheckResponse {
    pub messages: Vec<Envelope<BridgeMessage>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AckRequest {
    pub seqs: Vec<u64>,
}

/// Action fed into the host application's reducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostAction {
    SetUnits {
        #[serde(rename = "unitType")]
        unit_type: UnitType,
    },
    SetMaterial {
        id: MaterialId,
    },
    AddMaterial {
        material: FormattedMaterial,
    },
    AddMaterials {
        materials: Vec<FormattedMaterial>,
    },
}

impl HostAction {
    /// `None` for messages the page only logs.
    pub fn from_message(message: BridgeMessage) -> Option<HostAction> {
        match message {
            BridgeMessage::SetMaterials { materials } => Some(HostAction::AddMaterials { materials }),
            BridgeMessage::SetMaterial { material } => Some(HostAction::AddMaterial { material }),
            BridgeMessage::ToggleUnits { unit_type } => Some(HostAction::SetUnits { unit_type }),
            BridgeMessage::SelectMaterial { material_id } => {
                Some(HostAction::SetMaterial { id: material_id })
            }
            BridgeMessage::Clone => None,
        }
    }
}

/// Page to extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    Clone {
        #[serde(default, rename = "designId")]
        design_id: Option<String>,
    },
    QrDetected {
        data: String,
    },
}
