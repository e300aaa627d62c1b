// Serial link to the robot
//
// Covers the Auriga's own USB serial port and BLE-serial bridge modules that
// show up as a tty. Writes go straight to the port; a reader thread forwards
// notifications to the registered callback.

use async_trait::async_trait;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ReceiveCallback, Transport, TransportError};
use crate::config::DEFAULT_BAUDRATE;
use crate::frame::hex;

/// Port read/write timeout; also bounds how long the reader takes to notice a disconnect
const PORT_TIMEOUT_MS: u64 = 50;

const READ_BUFFER_SIZE: usize = 256;

type SharedCallback = Arc<Mutex<Option<ReceiveCallback>>>;

struct Reader {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Serial port transport
pub struct SerialTransport {
    baudrate: u32,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    reader: Mutex<Option<Reader>>,
    callback: SharedCallback,
    connected: Arc<AtomicBool>,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::with_baudrate(DEFAULT_BAUDRATE)
    }

    pub fn with_baudrate(baudrate: u32) -> Self {
        Self {
            baudrate,
            port: Mutex::new(None),
            reader: Mutex::new(None),
            callback: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_reader(&self, mut port: Box<dyn SerialPort>) -> Reader {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let callback = self.callback.clone();
        let connected = self.connected.clone();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            while thread_running.load(Ordering::SeqCst) {
                match port.read(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        debug!("RX {}", hex(&buf[..n]));
                        let cb = lock(&callback).clone();
                        if let Some(cb) = cb {
                            cb(buf[..n].to_vec());
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => {
                        warn!("Serial read failed, closing reader: {}", e);
                        connected.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        Reader { running, handle }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&self, target: &str) -> Result<(), TransportError> {
        if self.is_connected() {
            self.disconnect().await?;
        }

        info!("Opening serial port {} at {} baud", target, self.baudrate);
        let port = serialport::new(target, self.baudrate)
            .timeout(Duration::from_millis(PORT_TIMEOUT_MS))
            .open()?;
        let reader_port = port.try_clone()?;

        *lock(&self.port) = Some(port);
        let reader = self.spawn_reader(reader_port);
        *lock(&self.reader) = Some(reader);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = lock(&self.port);
        let port = guard.as_mut().ok_or(TransportError::NotConnected)?;

        // Frames are a handful of bytes, the write returns well within the port timeout
        let result = port.write_all(bytes).and_then(|_| port.flush());
        if let Err(e) = result {
            let error = TransportError::from(e);
            if error.is_connection_loss() {
                self.connected.store(false, Ordering::SeqCst);
            }
            return Err(error);
        }
        Ok(())
    }

    fn on_receive(&self, callback: ReceiveCallback) {
        *lock(&self.callback) = Some(callback);
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.port).take();

        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            reader.running.store(false, Ordering::SeqCst);
            // Exits after at most one read timeout
            let _ = tokio::task::spawn_blocking(move || reader.handle.join()).await;
        }
        info!("Serial port closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "serial"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
