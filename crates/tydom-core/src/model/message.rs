// ── Decoded gateway messages and side effects ──

use serde_json::Value;

use tydom_api::HttpFrame;

use super::device::TydomDevice;

/// A typed event decoded from one incoming frame.
///
/// The decoder prefers emitting [`Raw`](Self::Raw) over dropping data:
/// anything it cannot classify (unknown URI, unparseable body, frame
/// parse failure) is passed through with as much context as survived.
#[derive(Debug, Clone, PartialEq)]
pub enum TydomMessage {
    /// `/info` -- gateway software/hardware description.
    GatewayInfo {
        payload: Value,
        transac_id: Option<String>,
    },
    /// Device data extracted from `/devices/data` or `/devices/cdata`.
    Devices {
        devices: Vec<TydomDevice>,
        transac_id: Option<String>,
    },
    /// `/scenarios/file`.
    Scenarios {
        items: Vec<Value>,
        transac_id: Option<String>,
    },
    /// `/groups/file`.
    Groups {
        items: Vec<Value>,
        transac_id: Option<String>,
    },
    /// `/moments/file`.
    Moments {
        items: Vec<Value>,
        transac_id: Option<String>,
    },
    /// `/areas/data`.
    Areas {
        items: Vec<Value>,
        transac_id: Option<String>,
    },
    /// Fallback carrying the original payload.
    Raw {
        payload: Vec<u8>,
        frame: Option<HttpFrame>,
        uri_origin: Option<String>,
        transac_id: Option<String>,
        /// Set only when the frame itself failed to parse; a frame whose
        /// body merely failed JSON decoding leaves this empty.
        parse_error: Option<String>,
    },
}

impl TydomMessage {
    pub fn transac_id(&self) -> Option<&str> {
        match self {
            Self::GatewayInfo { transac_id, .. }
            | Self::Devices { transac_id, .. }
            | Self::Scenarios { transac_id, .. }
            | Self::Groups { transac_id, .. }
            | Self::Moments { transac_id, .. }
            | Self::Areas { transac_id, .. }
            | Self::Raw { transac_id, .. } => transac_id.as_deref(),
        }
    }
}

/// One chunk of a multi-frame cdata reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CDataChunk {
    pub transac_id: String,
    pub payload: Vec<u8>,
    /// End-of-reply marker; the reassembly store completes the reply
    /// when it sees this.
    pub end_of_reply: bool,
}

/// Side-effect instruction produced by the decoder, executed serially
/// by the effect executor.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send each pre-encoded command frame in order.
    SendCommands(Vec<String>),
    /// (Re)configure the poll scheduler.
    SchedulePoll {
        urls: Vec<String>,
        interval_secs: u64,
    },
    /// Send `refresh_all`, then run one immediate poll round.
    RefreshAll,
    /// A ping answer arrived; feed the watchdog.
    PongReceived,
    /// Append a chunk to the cdata reassembly store.
    CDataReplyChunk(CDataChunk),
}
