// Link to the robot
//
// The streaming controller only sees the Transport trait. The BLE GATT client
// lives outside this crate; here we provide:
// - SerialTransport: serial port (Auriga USB, BLE-serial bridge modules)
// - ZenohTransport: remote BLE gateway reached over zenoh
// - LogTransport: dry run, logs every frame

mod gateway;
mod serial;

pub use gateway::ZenohTransport;
pub use serial::SerialTransport;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::frame::hex;

/// Callback invoked with every notification received from the robot
pub type ReceiveCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Error types for transport operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    Send(String),
}

impl TransportError {
    /// True when the link itself is gone, as opposed to a single lost write
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected | TransportError::Connection(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                TransportError::Send(e.to_string())
            }
            _ => TransportError::Connection(e.to_string()),
        }
    }
}

impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        TransportError::Connection(e.to_string())
    }
}

/// Send/receive/connect capability the controller drives
///
/// Implementations take `&self` so one transport can be shared between the
/// controller's writer task and whoever manages the connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link to `target` (port path, key prefix, device name ...)
    async fn connect(&self, target: &str) -> Result<(), TransportError>;

    /// Write one frame
    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Register the notification handler, replacing any previous one
    fn on_receive(&self, callback: ReceiveCallback);

    async fn disconnect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Dry-run transport: accepts every frame and logs it
#[derive(Debug, Default)]
pub struct LogTransport {
    connected: AtomicBool,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn connect(&self, target: &str) -> Result<(), TransportError> {
        info!("[dry-run] connected to {}", target);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        info!("[dry-run] TX {}", hex(bytes));
        Ok(())
    }

    fn on_receive(&self, _callback: ReceiveCallback) {}

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}
