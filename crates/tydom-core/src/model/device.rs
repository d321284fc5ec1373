// ── Device domain types ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical device kind, derived from the gateway's `usage` string.
///
/// The mapping is fixed by the vendor protocol; anything unknown is
/// preserved verbatim in [`Other`](Self::Other) instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Shutter,
    Window,
    Door,
    Garage,
    Gate,
    Light,
    Energy,
    Smoke,
    Boiler,
    Alarm,
    Weather,
    Water,
    Thermo,
    Other(String),
}

impl DeviceKind {
    pub fn from_usage(usage: &str) -> Self {
        match usage {
            "shutter" | "klineShutter" | "awning" | "swingShutter" => Self::Shutter,
            "window" | "windowFrench" | "windowSliding" | "klineWindowFrench"
            | "klineWindowSliding" => Self::Window,
            "belmDoor" | "klineDoor" => Self::Door,
            "garage_door" => Self::Garage,
            "gate" => Self::Gate,
            "light" => Self::Light,
            "conso" => Self::Energy,
            "sensorDFR" => Self::Smoke,
            "boiler" | "sh_hvac" | "electric" | "aeraulic" => Self::Boiler,
            "alarm" => Self::Alarm,
            "weather" => Self::Weather,
            "sensorDF" => Self::Water,
            "sensorThermo" => Self::Thermo,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// A gateway endpoint with its latest data, hydrated from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TydomDevice {
    pub id: i64,
    pub endpoint_id: i64,
    /// `"{endpoint_id}_{id}"` -- the catalog key.
    pub unique_id: String,
    pub name: String,
    pub usage: String,
    pub kind: DeviceKind,
    /// Latest up-to-date values keyed by data name.
    pub data: Map<String, Value>,
    /// Per-data-name attribute objects from `/devices/meta`, if known.
    pub metadata: Option<Map<String, Value>>,
}

impl TydomDevice {
    /// Compose the catalog key for an endpoint/device pair.
    pub fn unique_id(endpoint_id: i64, device_id: i64) -> String {
        format!("{endpoint_id}_{device_id}")
    }
}
