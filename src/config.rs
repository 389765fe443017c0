use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::entities::class_id_by_name;

/// Overlay palette applied on top of the rendered page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColourEffect {
    #[default]
    None,
    Invert,
    Grayscale,
    Amber,
}

/// User-tunable reading settings, persisted as a flat JSON dictionary.
/// Every key is optional in the document; missing keys take the defaults
/// below.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Minimum zoom at which rail navigation activates.
    pub rail_zoom_threshold: f32,
    /// Snap animation length in milliseconds.
    pub snap_duration_ms: f32,
    /// Initial hold-to-scroll speed, page points per second.
    pub scroll_speed_start: f32,
    /// Maximum hold-to-scroll speed, page points per second.
    pub scroll_speed_max: f32,
    /// Seconds of ramp from start speed to max speed.
    pub scroll_ramp_time: f32,
    /// How many future pages to prefetch for analysis.
    pub analysis_lookahead_pages: i32,
    pub colour_effect: ColourEffect,
    pub colour_effect_intensity: f32,
    /// Class names (not ids) whose blocks may be navigated in rail mode.
    pub navigable_classes: BTreeSet<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            rail_zoom_threshold: 3.0,
            snap_duration_ms: 300.0,
            scroll_speed_start: 10.0,
            scroll_speed_max: 50.0,
            scroll_ramp_time: 1.5,
            analysis_lookahead_pages: 2,
            colour_effect: ColourEffect::None,
            colour_effect_intensity: 1.0,
            navigable_classes: [
                "abstract",
                "algorithm",
                "aside_text",
                "document_title",
                "footnote",
                "paragraph_title",
                "references",
                "text",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl ViewerConfig {
    /// Resolve the stored class names to indices in the canonical class
    /// table. Names that no table entry carries are dropped.
    pub fn navigable_class_ids(&self) -> HashSet<usize> {
        self.navigable_classes
            .iter()
            .filter_map(|name| {
                let id = class_id_by_name(name);
                if id.is_none() {
                    tracing::debug!("dropping unknown navigable class {name:?}");
                }
                id
            })
            .collect()
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("railread").join("config.json"))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("can't read config at {}", path.as_ref().display()))?;
        serde_json::from_str(&raw).context("can't parse config document")
    }

    /// Load from the platform config dir, falling back to defaults when
    /// the file is absent or the dir is unknown.
    pub fn load_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).unwrap_or_else(|e| {
                tracing::error!("config load failed, using defaults: {e:?}");
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = serde_json::to_string_pretty(self)?;
        fs::write(&path, doc)
            .with_context(|| format!("can't write config at {}", path.as_ref().display()))
    }
}
