//! Transport-neutral events delivered from the radio link to the position handler.
//!
//! The link (see [`crate::meshtastic`]) turns decoded device frames into these values and
//! sends them over a channel; the handler never sees protobuf types. Tests and alternative
//! transports construct them directly.

/// Meshtastic node number (the `from` field of a mesh packet).
pub type NodeId = u32;

/// Position sub-structure of a decoded packet. Each field is optional on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionFix {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            altitude: Some(altitude),
        }
    }
}

/// Decoded application payload of a packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPayload {
    /// `None` when the payload was tagged as a position but could not be decoded as one.
    pub position: Option<PositionFix>,
}

/// One inbound packet notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketEvent {
    pub from: NodeId,
    /// Receive time reported by the radio, passed through untouched.
    pub rx_time: Option<u64>,
    /// `None` for packets the radio could not decrypt.
    pub decoded: Option<DecodedPayload>,
}

impl PacketEvent {
    /// Convenience constructor for a decoded position report.
    pub fn position(from: NodeId, fix: PositionFix, rx_time: Option<u64>) -> Self {
        Self {
            from,
            rx_time,
            decoded: Some(DecodedPayload {
                position: Some(fix),
            }),
        }
    }

    /// Position carried by this packet, if it has both a decoded payload and a position.
    pub fn position_fix(&self) -> Option<&PositionFix> {
        self.decoded.as_ref().and_then(|d| d.position.as_ref())
    }
}

/// Details announced once the device finished its initial config push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub my_node_num: Option<NodeId>,
    pub port: String,
    pub known_nodes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    Connected(ConnectionInfo),
    Packet(PacketEvent),
}
