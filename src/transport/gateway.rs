// Zenoh link to a remote BLE gateway
//
// The gateway owns the GATT connection and relays raw bytes:
// - frames we publish on <prefix>/tx are written to the robot
// - robot notifications arrive on <prefix>/rx

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ReceiveCallback, Transport, TransportError};
use crate::frame::hex;

struct GatewayLink {
    session: zenoh::Session,
    publisher: zenoh::pubsub::Publisher<'static>,
    rx_task: JoinHandle<()>,
}

/// Transport publishing frames to a zenoh key expression
pub struct ZenohTransport {
    link: tokio::sync::Mutex<Option<GatewayLink>>,
    callback: Arc<Mutex<Option<ReceiveCallback>>>,
    connected: Arc<AtomicBool>,
}

impl ZenohTransport {
    pub fn new() -> Self {
        Self {
            link: tokio::sync::Mutex::new(None),
            callback: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for ZenohTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn zenoh_error(e: zenoh::Error) -> TransportError {
    TransportError::Connection(e.to_string())
}

#[async_trait]
impl Transport for ZenohTransport {
    /// `target` is the key prefix of the gateway, e.g. "makeblock/robot"
    async fn connect(&self, target: &str) -> Result<(), TransportError> {
        if self.is_connected() {
            self.disconnect().await?;
        }

        let tx_key = format!("{}/tx", target);
        let rx_key = format!("{}/rx", target);

        info!("Opening Zenoh session...");
        let session = zenoh::open(zenoh::Config::default())
            .await
            .map_err(zenoh_error)?;
        let publisher = session
            .declare_publisher(tx_key.clone())
            .await
            .map_err(zenoh_error)?;
        let subscriber = session
            .declare_subscriber(rx_key.clone())
            .await
            .map_err(zenoh_error)?;

        let callback = self.callback.clone();
        let rx_task = tokio::spawn(async move {
            while let Ok(sample) = subscriber.recv_async().await {
                let bytes = sample.payload().to_bytes().to_vec();
                debug!("RX {}", hex(&bytes));
                let cb = callback
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                if let Some(cb) = cb {
                    cb(bytes);
                }
            }
            debug!("Gateway subscriber closed");
        });

        info!("Publishing to: {}", tx_key);
        info!("Subscribed to: {}", rx_key);

        *self.link.lock().await = Some(GatewayLink {
            session,
            publisher,
            rx_task,
        });
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let guard = self.link.lock().await;
        let link = guard.as_ref().ok_or(TransportError::NotConnected)?;
        link.publisher
            .put(bytes.to_vec())
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn on_receive(&self, callback: ReceiveCallback) {
        *self
            .callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(callback);
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.rx_task.abort();
            drop(link.publisher);
            if let Err(e) = link.session.close().await {
                warn!("Failed to close Zenoh session: {}", e);
            }
            info!("Zenoh session closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "zenoh"
    }
}
