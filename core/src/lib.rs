//! Custom laser material presets: the data model, the extension's local
//! store, the quota-limited cloud mirror, the page bridge and the editor.

pub mod bridge;
pub mod catalog;
pub mod cloud;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod material;
pub mod store;

pub use catalog::Catalog;
pub use cloud::CloudMirror;
pub use config::{Config, Paths};
pub use controller::{Controller, ControllerEvent, ControllerView, EditorMode, Notice};
pub use error::{PresetError, Result};
pub use material::{FormattedMaterial, MaterialId, Preset, RawMaterial};
pub use store::{LocalStore, StorageLocal};
