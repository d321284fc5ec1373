// ── Command builder ──
//
// Deterministic constructors for every request the gateway understands.
// Each command encodes to a byte-exact HTTP frame; transaction ids are
// opaque strings chosen by the caller (monotonic numeric strings in
// practice), never allocated here.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Map, Value};

use tydom_api::frame::serialize_command;

/// One gateway request: method, path, optional JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub method: &'static str,
    pub path: String,
    pub body: Option<String>,
}

impl Command {
    fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET",
            path: path.into(),
            body: None,
        }
    }

    fn put(path: impl Into<String>, body: Option<String>) -> Self {
        Self {
            method: "PUT",
            path: path.into(),
            body,
        }
    }

    fn post(path: impl Into<String>) -> Self {
        Self {
            method: "POST",
            path: path.into(),
            body: None,
        }
    }

    /// Serialize to the wire frame carrying the caller's transaction id.
    pub fn encode(&self, transac_id: &str) -> String {
        serialize_command(self.method, &self.path, self.body.as_deref(), transac_id)
    }

    // ── Simple reads ────────────────────────────────────────────────

    pub fn ping() -> Self {
        Self::get("/ping")
    }

    pub fn info() -> Self {
        Self::get("/info")
    }

    pub fn devices_meta() -> Self {
        Self::get("/devices/meta")
    }

    pub fn devices_data() -> Self {
        Self::get("/devices/data")
    }

    pub fn devices_cmeta() -> Self {
        Self::get("/devices/cmeta")
    }

    pub fn configs_file() -> Self {
        Self::get("/configs/file")
    }

    pub fn areas_meta() -> Self {
        Self::get("/areas/meta")
    }

    pub fn areas_cmeta() -> Self {
        Self::get("/areas/cmeta")
    }

    pub fn areas_data() -> Self {
        Self::get("/areas/data")
    }

    pub fn moments_file() -> Self {
        Self::get("/moments/file")
    }

    pub fn scenarios_file() -> Self {
        Self::get("/scenarios/file")
    }

    pub fn groups_file() -> Self {
        Self::get("/groups/file")
    }

    pub fn geoloc() -> Self {
        Self::get("/configs/gateway/geoloc")
    }

    pub fn local_claim() -> Self {
        Self::get("/configs/gateway/local_claim")
    }

    // ── Gateway maintenance ─────────────────────────────────────────

    pub fn refresh_all() -> Self {
        Self::post("/refresh/all")
    }

    pub fn api_mode() -> Self {
        Self::put("/configs/gateway/api_mode", None)
    }

    pub fn update_firmware() -> Self {
        Self::put("/configs/gateway/update_firmware", None)
    }

    // ── Device reads ────────────────────────────────────────────────

    /// Data for one device. The id fills both the `devices/` and
    /// `endpoints/` segments; legacy gateways expect the repetition.
    pub fn device_data(device_id: i64) -> Self {
        Self::get(format!("/devices/{device_id}/endpoints/{device_id}/data"))
    }

    /// Re-fetch an arbitrary URL, as driven by the poll scheduler.
    pub fn poll_device_data(url: impl Into<String>) -> Self {
        Self::get(url)
    }

    // ── Writes ──────────────────────────────────────────────────────

    pub fn activate_scenario(scenario_id: &str) -> Self {
        Self::put(format!("/scenarios/{scenario_id}"), None)
    }

    /// Legacy write: the value is stringified no matter its JSON type
    /// (`true` becomes `"true"`, `42` becomes `"42"`, null becomes
    /// `"null"`). The gateway expects exactly this shape here; see
    /// [`put_devices_data`](Self::put_devices_data) for the typed form.
    pub fn put_data(path: impl Into<String>, name: &str, value: &Value) -> Self {
        let mut body = Map::new();
        body.insert(name.to_owned(), Value::String(stringify_scalar(value)));
        Self::put(path, Some(Value::Object(body).to_string()))
    }

    /// Typed write to one endpoint: the value keeps its raw JSON type.
    pub fn put_devices_data(device_id: i64, endpoint_id: i64, name: &str, value: &Value) -> Self {
        let body = json!([{ "name": name, "value": value }]);
        Self::put(
            format!("/devices/{device_id}/endpoints/{endpoint_id}/data"),
            Some(body.to_string()),
        )
    }

    // ── Alarm (cdata) ───────────────────────────────────────────────

    /// Alarm command.
    ///
    /// Legacy zoned alarms take one `partCmd` frame per zone in the
    /// comma-separated `zone_id`; everything else is a single `alarmCmd`
    /// frame.
    pub fn alarm_cdata(
        device_id: i64,
        endpoint_id: i64,
        pin: &str,
        value: &str,
        zone_id: Option<&str>,
        legacy_zones: bool,
    ) -> Vec<Self> {
        if legacy_zones {
            if let Some(zones) = zone_id {
                return zones
                    .split(',')
                    .map(str::trim)
                    .filter(|z| !z.is_empty())
                    .map(|zone| {
                        Self::put(
                            format!(
                                "/devices/{device_id}/endpoints/{endpoint_id}/cdata?name=partCmd"
                            ),
                            Some(format!(
                                "{{\"part\":\"{zone}\",\"value\":\"{value}\",\"pwd\":\"{pin}\"}}"
                            )),
                        )
                    })
                    .collect();
            }
        }

        vec![Self::put(
            format!("/devices/{device_id}/endpoints/{endpoint_id}/cdata?name=alarmCmd"),
            Some(format!("{{\"value\":\"{value}\",\"pwd\":\"{pin}\"}}")),
        )]
    }

    /// Acknowledge pending alarm events.
    pub fn ack_events_cdata(device_id: i64, endpoint_id: i64, pin: &str) -> Self {
        Self::put(
            format!("/devices/{device_id}/endpoints/{endpoint_id}/cdata?name=ackEventCmd"),
            Some(format!("{{\"pwd\":\"{pin}\"}}")),
        )
    }
}

/// Stringify a scalar the way the legacy `put_data` endpoint expects.
fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Transaction ids ─────────────────────────────────────────────────

/// Monotonic transaction-id allocator for callers that do not bring
/// their own correlation scheme.
#[derive(Debug)]
pub struct TransactionIds(AtomicU64);

impl TransactionIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> String {
        self.0.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

impl Default for TransactionIds {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
