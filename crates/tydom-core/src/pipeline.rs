// ── Message pipeline ──
//
// raw bytes → frame parse → decode → hydrate → { typed message out,
// effects enqueued }. One serialized task per connection, so per-message
// ordering holds end to end and each message's effect batch lands in the
// executor as one contiguous block.

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::DeviceCatalog;
use crate::decoder::{DecodedMessage, MessageDecoder};
use crate::executor::EffectHandle;
use crate::model::TydomMessage;

const MESSAGE_OUT_CAPACITY: usize = 256;

/// Fill in catalog fields the decoder could not resolve at decode time.
///
/// `Devices` entries decoded before the catalog knew their endpoint get
/// name, usage, kind, and metadata re-checked; everything else passes
/// through untouched. Only in-memory lookups happen here -- hydration
/// must never block the stream.
pub fn hydrate(catalog: &DeviceCatalog, message: TydomMessage) -> TydomMessage {
    let TydomMessage::Devices {
        devices,
        transac_id,
    } = message
    else {
        return message;
    };

    let devices = devices
        .into_iter()
        .map(|mut device| {
            let needs_identity = device.name.is_empty() || device.usage.is_empty();
            if needs_identity || device.metadata.is_none() {
                if let Some(info) = catalog.device_info(&device.unique_id) {
                    if device.name.is_empty() {
                        device.name = info.name;
                    }
                    if device.usage.is_empty() {
                        device.usage = info.usage;
                        device.kind = info.kind;
                    }
                    if device.metadata.is_none() {
                        device.metadata = info.metadata;
                    }
                }
            }
            device
        })
        .collect();

    TydomMessage::Devices {
        devices,
        transac_id,
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

/// Stream transformation from raw payloads to [`TydomMessage`]s.
pub struct Pipeline;

impl Pipeline {
    /// Spawn the pipeline task over an incoming payload stream.
    ///
    /// Returns the typed message receiver and the task handle. The task
    /// ends when the payload stream ends, the consumer goes away, or
    /// `cancel` fires.
    pub fn spawn<S>(
        mut incoming: S,
        decoder: MessageDecoder,
        effects: EffectHandle,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<TydomMessage>, JoinHandle<()>)
    where
        S: Stream<Item = Vec<u8>> + Send + Unpin + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel(MESSAGE_OUT_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    payload = incoming.next() => {
                        let Some(payload) = payload else { break };
                        let DecodedMessage { message, effects: batch } =
                            decoder.decode(&payload);
                        let message = hydrate(decoder.catalog(), message);

                        if !batch.is_empty() {
                            effects.enqueue_all(batch).await;
                        }
                        if out_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("pipeline stopped");
        });

        (out_rx, task)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use tokio_stream::wrappers::ReceiverStream;

    use crate::catalog::CacheEntry;
    use crate::config::PollingConfig;
    use crate::executor::{CommandSink, EffectExecutor};
    use crate::model::{DeviceKind, TydomDevice};

    struct NullSink;

    #[async_trait::async_trait]
    impl CommandSink for NullSink {
        async fn send_command(&self, _frame: String) -> Result<(), tydom_api::Error> {
            Ok(())
        }
    }

    fn catalog_with_shutter() -> Arc<DeviceCatalog> {
        let catalog = Arc::new(DeviceCatalog::new());
        catalog.upsert(CacheEntry {
            name: Some("Living Room".into()),
            usage: Some("shutter".into()),
            ..CacheEntry::new("2_1")
        });
        catalog
    }

    #[test]
    fn hydrate_fills_identity_from_the_catalog() {
        let catalog = catalog_with_shutter();
        let bare = TydomMessage::Devices {
            devices: vec![TydomDevice {
                id: 1,
                endpoint_id: 2,
                unique_id: "2_1".into(),
                name: String::new(),
                usage: String::new(),
                kind: DeviceKind::Other(String::new()),
                data: serde_json::Map::new(),
                metadata: None,
            }],
            transac_id: None,
        };

        match hydrate(&catalog, bare) {
            TydomMessage::Devices { devices, .. } => {
                assert_eq!(devices[0].name, "Living Room");
                assert_eq!(devices[0].usage, "shutter");
                assert_eq!(devices[0].kind, DeviceKind::Shutter);
            }
            other => panic!("expected devices, got {other:?}"),
        }
    }

    #[test]
    fn hydrate_forwards_unknown_devices_unchanged() {
        let catalog = DeviceCatalog::new();
        let bare = TydomMessage::Devices {
            devices: vec![TydomDevice {
                id: 9,
                endpoint_id: 9,
                unique_id: "9_9".into(),
                name: String::new(),
                usage: String::new(),
                kind: DeviceKind::Other(String::new()),
                data: serde_json::Map::new(),
                metadata: None,
            }],
            transac_id: None,
        };

        match hydrate(&catalog, bare) {
            TydomMessage::Devices { devices, .. } => {
                assert!(devices[0].name.is_empty());
            }
            other => panic!("expected devices, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pipeline_decodes_in_order_and_ends_with_the_stream() {
        let catalog = catalog_with_shutter();
        let decoder = MessageDecoder::new(Arc::clone(&catalog), PollingConfig::default());
        let cancel = CancellationToken::new();
        let (effects, _tasks) = EffectExecutor::spawn(
            Arc::new(NullSink),
            PollingConfig::default(),
            None,
            cancel.clone(),
        );

        let (payload_tx, payload_rx) = mpsc::channel(8);
        let (mut messages, task) = Pipeline::spawn(
            ReceiverStream::new(payload_rx),
            decoder,
            effects,
            cancel.clone(),
        );

        let body = json!([
            {"id": 1, "endpoints": [
                {"id": 2, "error": 0, "data": [
                    {"name": "level", "value": 50, "validity": "upToDate"}
                ]}
            ]}
        ])
        .to_string();
        let devices_frame = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nUri-Origin: /devices/data\r\nTransac-Id: 456\r\n\r\n{body}",
            body.len()
        );

        payload_tx.send(devices_frame.into_bytes()).await.unwrap();
        payload_tx.send(b"garbage".to_vec()).await.unwrap();
        drop(payload_tx);

        match messages.recv().await.unwrap() {
            TydomMessage::Devices {
                devices,
                transac_id,
            } => {
                assert_eq!(transac_id.as_deref(), Some("456"));
                assert_eq!(devices[0].name, "Living Room");
            }
            other => panic!("expected devices, got {other:?}"),
        }

        match messages.recv().await.unwrap() {
            TydomMessage::Raw { parse_error, .. } => assert!(parse_error.is_some()),
            other => panic!("expected raw, got {other:?}"),
        }

        // Stream ended -> pipeline task exits and the channel closes.
        assert!(messages.recv().await.is_none());
        cancel.cancel();
        let _ = task.await;
    }
}
