//! The baked point cloud as it's stored on disk.
//!
//! Field names follow the baking tool's JSON output so its files load directly;
//! RON is accepted for hand-written or converted assets.

use deps::*;

use std::path::Path;

use eyre::WrapErr;

use crate::math::*;

/// One target point attached to up to four bones.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(crate = "serde", rename_all = "camelCase")]
pub struct BoneGridCell {
    /// Offset from the weighted bind-time bone position.
    #[serde(with = "crate::math::serde_vec3", alias = "position")]
    pub local_offset: TVec3,
    #[serde(default)]
    pub bone_indices: Vec<i32>,
    #[serde(default, alias = "weights")]
    pub bone_weights: Vec<TReal>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(crate = "serde", rename_all = "camelCase", default)]
pub struct FormationAsset {
    pub is_rigged: bool,
    /// Local space points of an unrigged formation.
    #[serde(with = "crate::math::serde_vec3::vec")]
    pub points: Vec<TVec3>,
    /// Per point bone attachments of a rigged formation.
    pub point_bones: Vec<BoneGridCell>,
    /// Grid spacing the points were baked at. Informational.
    #[serde(with = "crate::math::serde_vec3")]
    pub cell_size: TVec3,
}

impl FormationAsset {
    pub fn from_points(points: Vec<TVec3>, cell_size: TVec3) -> Self {
        Self {
            is_rigged: false,
            points,
            point_bones: Vec::new(),
            cell_size,
        }
    }

    pub fn rigged(point_bones: Vec<BoneGridCell>, cell_size: TVec3) -> Self {
        Self {
            is_rigged: true,
            points: Vec::new(),
            point_bones,
            cell_size,
        }
    }

    /// Number of target points the formation will expose.
    pub fn point_count(&self) -> usize {
        if self.is_rigged {
            self.point_bones.len()
        } else {
            self.points.len()
        }
    }

    pub fn from_ron_str(raw: &str) -> eyre::Result<Self> {
        ron::from_str(raw).wrap_err("unable to parse RON formation asset")
    }

    pub fn from_json_str(raw: &str) -> eyre::Result<Self> {
        serde_json::from_str(raw).wrap_err("unable to parse JSON formation asset")
    }

    pub fn to_ron_string(&self) -> eyre::Result<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .wrap_err("unable to serialize formation asset to RON")
    }

    pub fn to_json_string(&self) -> eyre::Result<String> {
        serde_json::to_string(self).wrap_err("unable to serialize formation asset to JSON")
    }

    /// Loads JSON for `.json` files and RON otherwise.
    pub fn load(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("unable to read formation asset at {path:?}"))?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let asset = if is_json {
            Self::from_json_str(&raw)
        } else {
            Self::from_ron_str(&raw)
        };
        let asset = asset.wrap_err_with(|| format!("bad formation asset at {path:?}"))?;
        tracing::debug!(
            ?path,
            rigged = asset.is_rigged,
            points = asset.point_count(),
            "formation asset loaded"
        );
        Ok(asset)
    }
}
