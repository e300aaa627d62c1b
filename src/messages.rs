// Events the bridge reports back to its frontend

use std::fmt;

use crate::transport::TransportError;

/// Why a frame was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Direction frame, first one or a periodic resend
    Direction(char),
    /// Stop frame after a direction key release or on shutdown
    Stop,
    /// One-shot action
    Action(char),
    /// Text typed by the user
    Manual,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Direction(key) => write!(f, "direction '{}'", key),
            FrameKind::Stop => f.write_str("stop"),
            FrameKind::Action(key) => write!(f, "action '{}'", key),
            FrameKind::Manual => f.write_str("manual"),
        }
    }
}

/// Output of the controller, delivered asynchronously
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Frame accepted by the transport
    FrameSent { kind: FrameKind, bytes: Vec<u8> },
    /// Transport rejected a frame; streaming keeps going
    SendError { kind: FrameKind, error: TransportError },
    /// Link is gone, the controller dropped back to idle
    ConnectionLost { error: TransportError },
    /// Raw notification bytes from the robot, undecoded
    DataReceived(Vec<u8>),
}
