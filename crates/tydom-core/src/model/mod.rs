// ── Domain model ──
//
// Canonical types for everything the decoder emits and the catalog
// stores. Dynamic gateway payloads stay `serde_json::Value`; identity
// and classification are strongly typed.

pub mod device;
pub mod mac;
pub mod message;

pub use device::{DeviceKind, TydomDevice};
pub use mac::GatewayMac;
pub use message::{CDataChunk, Effect, TydomMessage};
