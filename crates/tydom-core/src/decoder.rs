// ── Message decoder ──
//
// Routes parsed frames by `Uri-Origin` into typed messages, feeding the
// device catalog along the way. The decoder never fails: anything it
// cannot classify becomes a `Raw` message, and only a frame-level parse
// failure sets `parse_error`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use tydom_api::{parse_frame, HttpFrame};

use crate::catalog::{CacheEntry, DeviceCatalog};
use crate::config::PollingConfig;
use crate::model::{CDataChunk, Effect, TydomDevice, TydomMessage};

/// URLs re-fetched by the poll scheduler once the gateway is identified.
pub const DEFAULT_POLL_URLS: &[&str] = &["/devices/data", "/devices/cdata"];

/// Endpoints carrying this usage get their catalog name overridden;
/// the gateway reports alarm centrals under generic labels.
const ALARM_USAGE: &str = "alarm";
const ALARM_NAME: &str = "Tyxal Alarm";

/// A decoded message plus the side effects it triggers, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub message: TydomMessage,
    pub effects: Vec<Effect>,
}

impl DecodedMessage {
    fn plain(message: TydomMessage) -> Self {
        Self {
            message,
            effects: Vec::new(),
        }
    }
}

// ── MessageDecoder ──────────────────────────────────────────────────

/// Stateless router from raw payloads to [`DecodedMessage`]s.
///
/// Holds a catalog handle for upserts and lookups; the catalog is the
/// only shared state it touches.
pub struct MessageDecoder {
    catalog: Arc<DeviceCatalog>,
    polling: PollingConfig,
}

impl MessageDecoder {
    pub fn new(catalog: Arc<DeviceCatalog>, polling: PollingConfig) -> Self {
        Self { catalog, polling }
    }

    pub fn catalog(&self) -> &Arc<DeviceCatalog> {
        &self.catalog
    }

    /// Decode one incoming payload.
    pub fn decode(&self, payload: &[u8]) -> DecodedMessage {
        let frame = match parse_frame(payload) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "unparseable frame");
                return DecodedMessage::plain(TydomMessage::Raw {
                    payload: payload.to_vec(),
                    frame: None,
                    uri_origin: None,
                    transac_id: None,
                    parse_error: Some(e.to_string()),
                });
            }
        };

        let uri = frame.uri_origin().map(str::to_owned);
        let transac_id = frame.transac_id().map(str::to_owned);

        match uri.as_deref() {
            Some("/ping") => DecodedMessage {
                message: raw(payload, frame, uri, transac_id),
                effects: vec![Effect::PongReceived],
            },
            Some("/info") => self.decode_info(payload, frame, uri, transac_id),
            Some("/configs/file") => self.decode_configs_file(payload, frame, uri, transac_id),
            Some("/devices/meta") => self.decode_devices_meta(payload, frame, uri, transac_id),
            Some(u) if u.contains("/cdata") => {
                self.decode_cdata(payload, frame, uri.clone(), transac_id)
            }
            Some(u) if is_devices_data_uri(u) => {
                self.decode_devices_data(payload, frame, uri.clone(), transac_id)
            }
            Some("/scenarios/file") => {
                decode_file_list(payload, frame, uri, transac_id, |items, transac_id| {
                    TydomMessage::Scenarios { items, transac_id }
                })
            }
            Some("/groups/file") => {
                decode_file_list(payload, frame, uri, transac_id, |items, transac_id| {
                    TydomMessage::Groups { items, transac_id }
                })
            }
            Some("/moments/file") => {
                decode_file_list(payload, frame, uri, transac_id, |items, transac_id| {
                    TydomMessage::Moments { items, transac_id }
                })
            }
            Some("/areas/data") => {
                decode_file_list(payload, frame, uri, transac_id, |items, transac_id| {
                    TydomMessage::Areas { items, transac_id }
                })
            }
            _ => DecodedMessage::plain(raw(payload, frame, uri, transac_id)),
        }
    }

    // ── /info ───────────────────────────────────────────────────────

    /// Gateway identification also bootstraps the poll schedule.
    fn decode_info(
        &self,
        payload: &[u8],
        frame: HttpFrame,
        uri: Option<String>,
        transac_id: Option<String>,
    ) -> DecodedMessage {
        let Some(body) = parse_body(&frame) else {
            return DecodedMessage::plain(raw(payload, frame, uri, transac_id));
        };
        if !body.is_object() {
            return DecodedMessage::plain(raw(payload, frame, uri, transac_id));
        }

        DecodedMessage {
            message: TydomMessage::GatewayInfo {
                payload: body,
                transac_id,
            },
            effects: vec![Effect::SchedulePoll {
                urls: DEFAULT_POLL_URLS.iter().map(|u| (*u).to_owned()).collect(),
                interval_secs: self.polling.interval_secs,
            }],
        }
    }

    // ── /configs/file ───────────────────────────────────────────────

    /// Catalog names and usages. Absorbed: the caller sees `Raw`.
    fn decode_configs_file(
        &self,
        payload: &[u8],
        frame: HttpFrame,
        uri: Option<String>,
        transac_id: Option<String>,
    ) -> DecodedMessage {
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            endpoints: Vec<Endpoint>,
        }
        #[derive(Deserialize)]
        struct Endpoint {
            id_endpoint: i64,
            id_device: i64,
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            last_usage: Option<String>,
        }

        if let Some(parsed) = parse_body_as::<Payload>(&frame) {
            for endpoint in parsed.endpoints {
                let name = if endpoint.last_usage.as_deref() == Some(ALARM_USAGE) {
                    Some(ALARM_NAME.to_owned())
                } else {
                    endpoint.name
                };
                self.catalog.upsert(CacheEntry {
                    unique_id: TydomDevice::unique_id(endpoint.id_endpoint, endpoint.id_device),
                    name,
                    usage: endpoint.last_usage,
                    metadata: None,
                });
            }
            trace!(entries = self.catalog.len(), "catalog updated from configs");
        }

        DecodedMessage::plain(raw(payload, frame, uri, transac_id))
    }

    // ── /devices/meta ───────────────────────────────────────────────

    /// Per-data-name metadata. Absorbed: the caller sees `Raw`.
    fn decode_devices_meta(
        &self,
        payload: &[u8],
        frame: HttpFrame,
        uri: Option<String>,
        transac_id: Option<String>,
    ) -> DecodedMessage {
        #[derive(Deserialize)]
        struct Device {
            id: i64,
            #[serde(default)]
            endpoints: Vec<Endpoint>,
        }
        #[derive(Deserialize)]
        struct Endpoint {
            id: i64,
            #[serde(default)]
            metadata: Vec<Map<String, Value>>,
        }

        if let Some(devices) = parse_body_as::<Vec<Device>>(&frame) {
            for device in devices {
                for endpoint in device.endpoints {
                    let mut mapping = Map::new();
                    for mut attrs in endpoint.metadata {
                        let Some(name) = attrs.remove("name").and_then(as_string) else {
                            continue;
                        };
                        mapping.insert(name, Value::Object(attrs));
                    }
                    self.catalog.upsert(CacheEntry {
                        unique_id: TydomDevice::unique_id(endpoint.id, device.id),
                        name: None,
                        usage: None,
                        metadata: Some(mapping),
                    });
                }
            }
        }

        DecodedMessage::plain(raw(payload, frame, uri, transac_id))
    }

    // ── /devices/data ───────────────────────────────────────────────

    fn decode_devices_data(
        &self,
        payload: &[u8],
        frame: HttpFrame,
        uri: Option<String>,
        transac_id: Option<String>,
    ) -> DecodedMessage {
        #[derive(Deserialize)]
        struct Device {
            id: i64,
            #[serde(default)]
            endpoints: Vec<Endpoint>,
        }
        #[derive(Deserialize)]
        struct Endpoint {
            id: i64,
            #[serde(default)]
            error: Option<i64>,
            #[serde(default)]
            data: Vec<Entry>,
        }
        #[derive(Deserialize)]
        struct Entry {
            name: String,
            #[serde(default)]
            value: Value,
            #[serde(default)]
            validity: Option<String>,
        }

        let Some(parsed) = parse_body_as::<Vec<Device>>(&frame) else {
            return DecodedMessage::plain(raw(payload, frame, uri, transac_id));
        };

        let mut devices = Vec::new();
        for device in parsed {
            for endpoint in device.endpoints {
                if endpoint.error.is_some_and(|e| e != 0) {
                    trace!(device = device.id, endpoint = endpoint.id, "endpoint in error, skipped");
                    continue;
                }
                let unique_id = TydomDevice::unique_id(endpoint.id, device.id);
                // Unknown endpoints are dropped silently; the catalog will
                // learn them from the next configs/meta round.
                let Some(info) = self.catalog.device_info(&unique_id) else {
                    continue;
                };

                let mut data = Map::new();
                for entry in endpoint.data {
                    if entry.validity.as_deref() == Some("upToDate") {
                        data.insert(entry.name, entry.value);
                    }
                }
                devices.push(info.into_device(device.id, endpoint.id, data));
            }
        }

        if devices.is_empty() {
            DecodedMessage::plain(raw(payload, frame, uri, transac_id))
        } else {
            DecodedMessage::plain(TydomMessage::Devices {
                devices,
                transac_id,
            })
        }
    }

    // ── /devices/cdata ──────────────────────────────────────────────

    /// Metered values. Only endpoints the catalog knows as `conso` are
    /// extracted; every cdata frame additionally feeds the reassembly
    /// store through a [`Effect::CDataReplyChunk`].
    fn decode_cdata(
        &self,
        payload: &[u8],
        frame: HttpFrame,
        uri: Option<String>,
        transac_id: Option<String>,
    ) -> DecodedMessage {
        #[derive(Deserialize)]
        struct Device {
            id: i64,
            #[serde(default)]
            endpoints: Vec<Endpoint>,
        }
        #[derive(Deserialize)]
        struct Endpoint {
            id: i64,
            #[serde(default)]
            error: Option<i64>,
            #[serde(default)]
            cdata: Vec<Entry>,
        }
        #[derive(Deserialize)]
        struct Entry {
            name: String,
            #[serde(default)]
            parameters: Option<Map<String, Value>>,
            #[serde(default)]
            values: Option<Value>,
        }

        let parsed = parse_body_as::<Vec<Device>>(&frame);

        let mut effects = Vec::new();
        if let Some(tx) = &transac_id {
            effects.push(Effect::CDataReplyChunk(CDataChunk {
                transac_id: tx.clone(),
                payload: payload.to_vec(),
                end_of_reply: parsed.is_some(),
            }));
        }

        let Some(parsed) = parsed else {
            return DecodedMessage {
                message: raw(payload, frame, uri, transac_id),
                effects,
            };
        };

        let mut devices = Vec::new();
        for device in parsed {
            for endpoint in device.endpoints {
                if endpoint.error.is_some_and(|e| e != 0) {
                    continue;
                }
                let unique_id = TydomDevice::unique_id(endpoint.id, device.id);
                let Some(info) = self.catalog.device_info(&unique_id) else {
                    continue;
                };
                if info.usage != "conso" {
                    continue;
                }

                let mut data = Map::new();
                for entry in endpoint.cdata {
                    extract_cdata_entry(&entry.name, &entry.parameters, &entry.values, &mut data);
                }
                if !data.is_empty() {
                    devices.push(info.into_device(device.id, endpoint.id, data));
                }
            }
        }

        let message = if devices.is_empty() {
            raw(payload, frame, uri, transac_id)
        } else {
            TydomMessage::Devices {
                devices,
                transac_id,
            }
        };
        DecodedMessage { message, effects }
    }
}

/// Flatten one cdata entry into `{name}_{...}` keys.
///
/// Counters keyed by destination take priority; period-indexed value
/// tables are flattened with uppercase keys.
fn extract_cdata_entry(
    name: &str,
    parameters: &Option<Map<String, Value>>,
    values: &Option<Value>,
    data: &mut Map<String, Value>,
) {
    let Some(parameters) = parameters else { return };
    let values_obj = values.as_ref().and_then(Value::as_object);

    if let Some(dest) = parameters.get("dest").and_then(Value::as_str) {
        if let Some(counter) = values_obj.and_then(|v| v.get("counter")) {
            data.insert(format!("{name}_{dest}"), counter.clone());
            return;
        }
    }

    if parameters.contains_key("period") {
        if let Some(values_obj) = values_obj {
            for (key, value) in values_obj {
                data.insert(format!("{name}_{}", key.to_uppercase()), value.clone());
            }
        }
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

fn raw(
    payload: &[u8],
    frame: HttpFrame,
    uri_origin: Option<String>,
    transac_id: Option<String>,
) -> TydomMessage {
    TydomMessage::Raw {
        payload: payload.to_vec(),
        frame: Some(frame),
        uri_origin,
        transac_id,
        parse_error: None,
    }
}

/// `/devices/data` itself, or any `/devices/.../data` sub-path.
fn is_devices_data_uri(uri: &str) -> bool {
    uri == "/devices/data" || (uri.starts_with("/devices/") && uri.ends_with("/data"))
}

fn parse_body(frame: &HttpFrame) -> Option<Value> {
    serde_json::from_slice(frame.body()?).ok()
}

fn parse_body_as<T: serde::de::DeserializeOwned>(frame: &HttpFrame) -> Option<T> {
    serde_json::from_slice(frame.body()?).ok()
}

fn as_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

/// Scenario/group/moment/area file payloads: a top-level array maps to
/// its elements, any other JSON value is carried as a single item.
fn decode_file_list(
    payload: &[u8],
    frame: HttpFrame,
    uri: Option<String>,
    transac_id: Option<String>,
    build: impl FnOnce(Vec<Value>, Option<String>) -> TydomMessage,
) -> DecodedMessage {
    let Some(body) = parse_body(&frame) else {
        return DecodedMessage::plain(raw(payload, frame, uri, transac_id));
    };
    let items = match body {
        Value::Array(items) => items,
        other => vec![other],
    };
    DecodedMessage::plain(build(items, transac_id))
}

// ── Tests ───────────────────────────────────────────────────────────
