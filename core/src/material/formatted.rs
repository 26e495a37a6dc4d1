use serde::{Deserialize, Serialize};

use super::{MaterialId, RawMaterial, ScoreSetting};

const THUMBNAIL: &str = "//images.ctfassets.net/ljtyf78xujn2/LPH1C4ibUkQimYKuA6iAq/c5abd83cffd111e8366daa2c137e6f19/Leather-1.png";
const ACTIVE_DATE: &str = "2017-04-06T00:00-07:00";
const SCORE_VARIANTS: [&str; 2] = ["High Quality", "Shallow"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TubeType {
    Basic,
    Pro,
}

impl TubeType {
    pub const ALL: [TubeType; 2] = [TubeType::Basic, TubeType::Pro];
}

/// A material in the shape the host application's store expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedMaterial {
    pub id: MaterialId,
    pub title: String,
    pub sku: String,
    pub nominal_thickness: f64,
    pub thickness_name: String,
    pub variety: Variety,
    pub settings: Vec<TubeSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variety {
    pub name: String,
    pub common_name: String,
    pub type_name: String,
    pub thumbnails: Vec<String>,
    pub display_options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TubeSettings {
    pub description: String,
    pub active_date: String,
    pub environment: Vec<String>,
    pub tube_type: TubeType,
    pub cut_setting: CutOutput,
    pub score_settings: Vec<ScoreOutput>,
    pub vector_engrave_settings: Vec<VectorEngraveOutput>,
    pub bitmap_engrave_settings: Vec<BitmapEngraveOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutOutput {
    pub power: f64,
    pub speed: f64,
    pub passes: u32,
    pub focal_offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    pub dev_id: String,
}

impl Outcome {
    fn named(name: &str) -> Self {
        Outcome {
            name: name.to_string(),
            dev_id: kebab(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutput {
    pub power: f64,
    pub speed: f64,
    pub passes: u32,
    pub focal_offset: f64,
    pub uses: Vec<String>,
    pub display_color_mask: Option<String>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEngraveOutput {
    pub power: f64,
    pub speed: f64,
    pub passes: u32,
    pub focal_offset: f64,
    pub lines_per_inch: u32,
    pub uses: Vec<String>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitmapEngraveOutput {
    pub min_power: f64,
    pub max_power: f64,
    pub speed: f64,
    pub passes: u32,
    pub focal_offset: f64,
    pub lines_per_inch: u32,
    pub uses: Vec<String>,
    pub outcome: Outcome,
}

impl FormattedMaterial {
    /// Build the complete host-side record. Nothing is carried over from a
    /// previous projection.
    pub fn from_raw(raw: &RawMaterial, id: &MaterialId) -> Self {
        let title = raw.title();
        FormattedMaterial {
            id: id.clone(),
            title: title.clone(),
            sku: String::new(),
            nominal_thickness: raw.thickness,
            thickness_name: raw.thick_name.clone(),
            variety: Variety {
                name: format!("{}-{}", kebab(&raw.thick_name), kebab(&raw.name)),
                common_name: title,
                type_name: raw.name.clone(),
                thumbnails: vec![THUMBNAIL.to_string()],
                display_options: None,
            },
            settings: TubeType::ALL
                .iter()
                .map(|tube| tube_settings(raw, *tube))
                .collect(),
        }
    }

    pub fn settings_for(&self, tube: TubeType) -> Option<&TubeSettings> {
        self.settings.iter().find(|s| s.tube_type == tube)
    }
}

fn tube_settings(raw: &RawMaterial, tube_type: TubeType) -> TubeSettings {
    // With no score entered, the score variants fall back to the cut values.
    let base = raw.scores.first().cloned().unwrap_or_else(|| ScoreSetting {
        name: String::new(),
        power: raw.cut.power,
        speed: raw.cut.speed,
        passes: raw.cut.passes,
        focal_offset: raw.cut.focal_offset,
    });

    TubeSettings {
        description: format!("{} Settings", raw.title()),
        active_date: ACTIVE_DATE.to_string(),
        environment: vec!["production".to_string()],
        tube_type,
        cut_setting: CutOutput {
            power: raw.cut.power,
            speed: raw.cut.speed,
            passes: raw.cut.passes,
            focal_offset: raw.cut.focal_offset,
        },
        score_settings: SCORE_VARIANTS
            .iter()
            .map(|name| ScoreOutput {
                power: base.power,
                speed: base.speed,
                passes: base.passes,
                focal_offset: base.focal_offset,
                uses: vec!["default".to_string()],
                display_color_mask: None,
                outcome: Outcome::named(name),
            })
            .collect(),
        vector_engrave_settings: raw
            .vectors
            .iter()
            .map(|v| VectorEngraveOutput {
                power: v.power,
                speed: v.speed,
                passes: v.passes,
                focal_offset: v.focal_offset,
                lines_per_inch: v.lines_per_inch,
                uses: vec!["default".to_string()],
                outcome: Outcome::named(&v.name),
            })
            .collect(),
        bitmap_engrave_settings: raw
            .bitmaps
            .iter()
            .map(|b| BitmapEngraveOutput {
                min_power: b.min_power,
                max_power: b.max_power,
                speed: b.speed,
                passes: b.passes,
                focal_offset: b.focal_offset,
                lines_per_inch: b.lines_per_inch,
                uses: vec!["default".to_string()],
                outcome: Outcome::named(&b.name),
            })
            .collect(),
    }
}

fn kebab(s: &str) -> String {
    s.to_lowercase().replace(' ', "-")
}
