//! User-entered material presets and the identifiers derived from them.

mod formatted;

pub use formatted::{
    BitmapEngraveOutput, CutOutput, FormattedMaterial, Outcome, ScoreOutput, TubeSettings,
    TubeType, Variety, VectorEngraveOutput,
};

use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PresetError, Result};

const ID_PREFIX: &str = "Custom:";
const ID_HASH_LEN: usize = 7;

/// Identifier of a custom material inside the host application: `Custom:<7 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialId(String);

impl MaterialId {
    pub fn from_title(title: &str) -> Self {
        MaterialId::from_hash(&title_hash(title))
    }

    pub fn from_hash(hash: &str) -> Self {
        MaterialId(format!("{}{}", ID_PREFIX, hash))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.strip_prefix(ID_PREFIX) {
            Some(hash) if !hash.is_empty() => Ok(MaterialId(raw.to_string())),
            _ => Err(PresetError::Validation(format!(
                "Material id must start with {}: {}",
                ID_PREFIX, raw
            ))),
        }
    }

    /// The part after `Custom:`.
    pub fn hash(&self) -> &str {
        self.0.strip_prefix(ID_PREFIX).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First seven lowercase hex characters of the SHA-1 of `title`.
pub fn title_hash(title: &str) -> String {
    let sha = digest(&SHA1_FOR_LEGACY_USE_ONLY, title.as_bytes());
    let mut hex = hex::encode(sha.as_ref());
    hex.truncate(ID_HASH_LEN);
    hex
}

pub fn material_title(thick_name: &str, name: &str) -> String {
    format!("{} {}", thick_name, name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutSetting {
    pub power: f64,
    pub speed: f64,
    pub passes: u32,
    pub focal_offset: f64,
}

impl Default for CutSetting {
    fn default() -> Self {
        CutSetting {
            power: 0.0,
            speed: 0.0,
            passes: 1,
            focal_offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSetting {
    pub name: String,
    pub power: f64,
    pub speed: f64,
    pub passes: u32,
    pub focal_offset: f64,
}

impl Default for ScoreSetting {
    fn default() -> Self {
        ScoreSetting {
            name: String::new(),
            power: 0.0,
            speed: 0.0,
            passes: 1,
            focal_offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorEngraveSetting {
    pub name: String,
    pub power: f64,
    pub speed: f64,
    pub passes: u32,
    pub focal_offset: f64,
    pub lines_per_inch: u32,
}

impl Default for VectorEngraveSetting {
    fn default() -> Self {
        VectorEngraveSetting {
            name: String::new(),
            power: 0.0,
            speed: 0.0,
            passes: 1,
            focal_offset: 0.0,
            lines_per_inch: 225,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitmapEngraveSetting {
    pub name: String,
    pub min_power: f64,
    pub max_power: f64,
    pub speed: f64,
    pub passes: u32,
    pub focal_offset: f64,
    pub lines_per_inch: u32,
}

impl Default for BitmapEngraveSetting {
    fn default() -> Self {
        BitmapEngraveSetting {
            name: String::new(),
            min_power: 0.0,
            max_power: 0.0,
            speed: 0.0,
            passes: 1,
            focal_offset: 0.0,
            lines_per_inch: 225,
        }
    }
}

/// Which of the repeatable setting lists an edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingKind {
    Scores,
    Vectors,
    Bitmaps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "setting", rename_all = "camelCase")]
pub enum Setting {
    Score(ScoreSetting),
    Vector(VectorEngraveSetting),
    Bitmap(BitmapEngraveSetting),
}

impl Setting {
    pub fn kind(&self) -> SettingKind {
        match self {
            Setting::Score(_) => SettingKind::Scores,
            Setting::Vector(_) => SettingKind::Vectors,
            Setting::Bitmap(_) => SettingKind::Bitmaps,
        }
    }
}

/// A single-field edit of the material being built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum MaterialField {
    ThickName(String),
    Name(String),
    Thickness(f64),
    Cut(CutSetting),
    Sync(bool),
}

/// Material settings exactly as the user entered them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMaterial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MaterialId>,
    #[serde(default)]
    pub thick_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub thickness: f64,
    #[serde(default)]
    pub cut: CutSetting,
    #[serde(default)]
    pub scores: Vec<ScoreSetting>,
    #[serde(default)]
    pub vectors: Vec<VectorEngraveSetting>,
    #[serde(default)]
    pub bitmaps: Vec<BitmapEngraveSetting>,
    #[serde(default)]
    pub prop_validation: BTreeMap<String, Option<bool>>,
    #[serde(default)]
    pub sync: bool,
}

impl RawMaterial {
    pub fn new(thick_name: &str, name: &str, thickness: f64, cut: CutSetting) -> Self {
        RawMaterial {
            thick_name: thick_name.to_string(),
            name: name.to_string(),
            thickness,
            cut,
            ..RawMaterial::default()
        }
    }

    pub fn title(&self) -> String {
        material_title(&self.thick_name, &self.name)
    }

    /// True when every recorded field check passed; an unset check fails.
    pub fn is_valid(&self) -> bool {
        self.prop_validation
            .values()
            .fold(true, |acc, v| acc && v.unwrap_or(false))
    }

    /// After a rejected save, unset checks are shown as failures.
    pub fn reject_unset(&mut self) {
        for value in self.prop_validation.values_mut() {
            if value.is_none() {
                *value = Some(false);
            }
        }
    }

    pub fn set_validation(&mut self, key: &str, valid: Option<bool>) {
        self.prop_validation.insert(key.to_string(), valid);
    }

    pub fn clear_validation(&mut self) {
        self.prop_validation.clear();
    }

    /// Run the built-in field checks and record each result.
    pub fn validate(&mut self) -> bool {
        let mut checks: Vec<(String, bool)> = vec![
            ("thickName".to_string(), !self.thick_name.trim().is_empty()),
            ("name".to_string(), !self.name.trim().is_empty()),
            ("thickness".to_string(), self.thickness > 0.0),
            ("cut.power".to_string(), valid_power(self.cut.power)),
            ("cut.speed".to_string(), self.cut.speed > 0.0),
            ("cut.passes".to_string(), self.cut.passes >= 1),
        ];
        for (i, score) in self.scores.iter().enumerate() {
            checks.push((format!("scores.{}.name", i), !score.name.trim().is_empty()));
            checks.push((format!("scores.{}.power", i), valid_power(score.power)));
            checks.push((format!("scores.{}.speed", i), score.speed > 0.0));
        }
        for (i, vector) in self.vectors.iter().enumerate() {
            checks.push((format!("vectors.{}.name", i), !vector.name.trim().is_empty()));
            checks.push((format!("vectors.{}.power", i), valid_power(vector.power)));
            checks.push((format!("vectors.{}.speed", i), vector.speed > 0.0));
        }
        for (i, bitmap) in self.bitmaps.iter().enumerate() {
            checks.push((format!("bitmaps.{}.name", i), !bitmap.name.trim().is_empty()));
            checks.push((
                format!("bitmaps.{}.power", i),
                valid_power(bitmap.min_power)
                    && valid_power(bitmap.max_power)
                    && bitmap.min_power <= bitmap.max_power,
            ));
            checks.push((format!("bitmaps.{}.speed", i), bitmap.speed > 0.0));
        }

        for (key, ok) in checks {
            self.prop_validation.insert(key, Some(ok));
        }
        self.is_valid()
    }

    /// Copy used to seed a clone, named `"<name> (<n>)"`.
    pub fn duplicate_named(&self, count: usize) -> RawMaterial {
        RawMaterial {
            id: None,
            name: format!("{} ({})", self.name, count),
            prop_validation: BTreeMap::new(),
            ..self.clone()
        }
    }

    pub fn apply(&mut self, field: MaterialField) {
        match field {
            MaterialField::ThickName(v) => self.thick_name = v,
            MaterialField::Name(v) => self.name = v,
            MaterialField::Thickness(v) => self.thickness = v,
            MaterialField::Cut(v) => self.cut = v,
            MaterialField::Sync(v) => self.sync = v,
        }
    }

    pub fn add_setting(&mut self, kind: SettingKind) {
        match kind {
            SettingKind::Scores => self.scores.push(ScoreSetting::default()),
            SettingKind::Vectors => self.vectors.push(VectorEngraveSetting::default()),
            SettingKind::Bitmaps => self.bitmaps.push(BitmapEngraveSetting::default()),
        }
    }

    pub fn remove_setting(&mut self, kind: SettingKind, index: usize) -> Result<()> {
        let len = self.setting_count(kind);
        if index >= len {
            return Err(out_of_range(kind, index, len));
        }
        match kind {
            SettingKind::Scores => {
                self.scores.remove(index);
            }
            SettingKind::Vectors => {
                self.vectors.remove(index);
            }
            SettingKind::Bitmaps => {
                self.bitmaps.remove(index);
            }
        }
        Ok(())
    }

    pub fn update_setting(&mut self, index: usize, setting: Setting) -> Result<()> {
        let kind = setting.kind();
        let len = self.setting_count(kind);
        if index >= len {
            return Err(out_of_range(kind, index, len));
        }
        match setting {
            Setting::Score(s) => self.scores[index] = s,
            Setting::Vector(s) => self.vectors[index] = s,
            Setting::Bitmap(s) => self.bitmaps[index] = s,
        }
        Ok(())
    }

    pub fn setting_count(&self, kind: SettingKind) -> usize {
        match kind {
            SettingKind::Scores => self.scores.len(),
            SettingKind::Vectors => self.vectors.len(),
            SettingKind::Bitmaps => self.bitmaps.len(),
        }
    }
}

fn valid_power(power: f64) -> bool {
    (0.0..=100.0).contains(&power)
}

fn out_of_range(kind: SettingKind, index: usize, len: usize) -> PresetError {
    PresetError::NotFound(format!(
        "{:?} setting {} (material has {})",
        kind, index, len
    ))
}

/// One saved material: the stable id plus the user's settings. The host
/// shape is always derived, never stored separately in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub id: MaterialId,
    pub raw: RawMaterial,
}

impl Preset {
    pub fn new(id: MaterialId, mut raw: RawMaterial) -> Self {
        raw.id = Some(id.clone());
        Preset { id, raw }
    }

    pub fn title(&self) -> String {
        self.raw.title()
    }

    pub fn formatted(&self) -> FormattedMaterial {
        FormattedMaterial::from_raw(&self.raw, &self.id)
    }
}
