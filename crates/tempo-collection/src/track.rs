//! Track records pushed by collection plugins.

use serde::{Deserialize, Deserializer, Serialize};

/// A track as reported by a collection plugin.
///
/// Plugins are loose about types: numeric fields may arrive as JSON numbers
/// or as numeric strings, and unparseable values are treated as absent.
/// Fields this host does not know about are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionTrack {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub album_artist: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub link_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub duration: Option<f64>,
    #[serde(default, rename = "albumpos", deserialize_with = "lenient_u32")]
    pub album_pos: Option<u32>,
    #[serde(default, rename = "discnumber", deserialize_with = "lenient_u32")]
    pub disc_number: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub year: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub bitrate: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?
        .filter(|v| v.is_finite() && *v >= 0.0 && *v <= u32::MAX as f64)
        .map(|v| v as u32))
}
