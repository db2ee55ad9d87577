//! # Meshtastic Device Link
//!
//! Talks to a Meshtastic radio over its serial protobuf API and turns what it hears into
//! [`MeshEvent`]s for the position handler.
//!
//! - [`framer`]: `0x94 0xC3 <len>` stream framing
//! - [`decode_from_radio`]: `FromRadio` protobuf → [`RadioUpdate`]
//! - [`LinkState`]: config handshake bookkeeping and node directory updates
//! - `link` (feature `serial`): the serial port reader task
//!
//! ## Handshake
//!
//! On open the client sends `want_config_id` with a random non-zero id. The radio replies
//! with `my_info`, one `node_info` per known node, assorted config, and finally
//! `config_complete_id` echoing the id. Only then is the connection announced. Position
//! packets are forwarded as soon as they arrive, even mid-handshake.

pub mod framer;
#[cfg(feature = "serial")]
pub mod link;

use crate::events::{ConnectionInfo, DecodedPayload, MeshEvent, NodeId, PacketEvent, PositionFix};
use crate::logutil::escape_log;
use crate::nodes::NodeTable;
use crate::protobuf::meshtastic_generated as proto;
use anyhow::{anyhow, Result};
use log::{debug, trace};
use prost::Message;

/// Scale of `latitude_i` / `longitude_i` (degrees × 1e7 on the wire).
const COORD_SCALE: f64 = 1e-7;

/// Interpretation of a single `FromRadio` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioUpdate {
    MyInfo {
        my_node_num: NodeId,
    },
    NodeInfo {
        num: NodeId,
        long_name: String,
        short_name: String,
    },
    ConfigComplete(u32),
    Position(PacketEvent),
    Rebooted,
    Log(String),
    /// Anything this logger does not act on (text, telemetry, encrypted traffic...).
    Ignored,
}

/// Convert a decoded `Position` into the handler's fix type.
pub fn position_fix(pos: &proto::Position) -> PositionFix {
    PositionFix {
        latitude: pos.latitude_i.map(|v| v as f64 * COORD_SCALE),
        longitude: pos.longitude_i.map(|v| v as f64 * COORD_SCALE),
        altitude: pos.altitude.or(pos.altitude_hae).map(f64::from),
    }
}

fn interpret_packet(pkt: &proto::MeshPacket) -> RadioUpdate {
    use proto::mesh_packet::PayloadVariant;

    let Some(PayloadVariant::Decoded(data)) = &pkt.payload_variant else {
        trace!("Encrypted packet from 0x{:08x}, skipping", pkt.from);
        return RadioUpdate::Ignored;
    };
    let port = proto::PortNum::try_from(data.portnum).unwrap_or(proto::PortNum::UnknownApp);
    let rx_time = (pkt.rx_time != 0).then_some(pkt.rx_time as u64);

    match port {
        proto::PortNum::PositionApp => {
            let position = match proto::Position::decode(data.payload.clone()) {
                Ok(pos) => Some(position_fix(&pos)),
                Err(e) => {
                    debug!("Undecodable position payload from 0x{:08x}: {}", pkt.from, e);
                    None
                }
            };
            RadioUpdate::Position(PacketEvent {
                from: pkt.from,
                rx_time,
                decoded: Some(DecodedPayload { position }),
            })
        }
        proto::PortNum::NodeinfoApp => match proto::User::decode(data.payload.clone()) {
            Ok(user) => RadioUpdate::NodeInfo {
                num: pkt.from,
                long_name: user.long_name,
                short_name: user.short_name,
            },
            Err(e) => {
                debug!("Undecodable NODEINFO payload from 0x{:08x}: {}", pkt.from, e);
                RadioUpdate::Ignored
            }
        },
        other => {
            trace!("Packet from 0x{:08x} on port {:?}, skipping", pkt.from, other);
            RadioUpdate::Ignored
        }
    }
}

/// Decode one framed payload. `None` when it is not a valid `FromRadio`.
pub fn decode_from_radio(frame: &[u8]) -> Option<RadioUpdate> {
    use proto::from_radio::PayloadVariant;

    let msg = match proto::FromRadio::decode(frame) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Discarding undecodable frame ({} bytes): {}", frame.len(), e);
            return None;
        }
    };
    let update = match msg.payload_variant {
        Some(PayloadVariant::Packet(pkt)) => interpret_packet(&pkt),
        Some(PayloadVariant::MyInfo(info)) => RadioUpdate::MyInfo {
            my_node_num: info.my_node_num,
        },
        Some(PayloadVariant::NodeInfo(node)) => {
            let (long_name, short_name) = node
                .user
                .map(|u| (u.long_name, u.short_name))
                .unwrap_or_default();
            RadioUpdate::NodeInfo {
                num: node.num,
                long_name,
                short_name,
            }
        }
        Some(PayloadVariant::ConfigCompleteId(id)) => RadioUpdate::ConfigComplete(id),
        Some(PayloadVariant::Rebooted(_)) => RadioUpdate::Rebooted,
        Some(PayloadVariant::LogRecord(rec)) => RadioUpdate::Log(rec.message),
        None => RadioUpdate::Ignored,
    };
    Some(update)
}

fn to_radio_frame(variant: proto::to_radio::PayloadVariant) -> Result<Vec<u8>> {
    let msg = proto::ToRadio {
        payload_variant: Some(variant),
    };
    framer::encode_frame(&msg.encode_to_vec()).ok_or_else(|| anyhow!("ToRadio payload too large"))
}

/// Framed `want_config_id` request.
pub fn want_config_frame(request_id: u32) -> Result<Vec<u8>> {
    to_radio_frame(proto::to_radio::PayloadVariant::WantConfigId(request_id))
}

/// Framed keepalive.
pub fn heartbeat_frame(nonce: u32) -> Result<Vec<u8>> {
    to_radio_frame(proto::to_radio::PayloadVariant::Heartbeat(
        proto::Heartbeat { nonce },
    ))
}

/// Framed disconnect notice, sent when the logger closes the port.
pub fn disconnect_frame() -> Result<Vec<u8>> {
    to_radio_frame(proto::to_radio::PayloadVariant::Disconnect(true))
}

/// Connection bookkeeping shared by every transport: tracks the handshake and keeps the
/// node directory current.
#[derive(Debug)]
pub struct LinkState {
    port_name: String,
    nodes: NodeTable,
    config_request_id: u32,
    my_node_num: Option<NodeId>,
    config_complete: bool,
    binary_frames_seen: bool,
}

impl LinkState {
    pub fn new(port_name: impl Into<String>, nodes: NodeTable, config_request_id: u32) -> Self {
        Self {
            port_name: port_name.into(),
            nodes,
            config_request_id,
            my_node_num: None,
            config_complete: false,
            binary_frames_seen: false,
        }
    }

    /// Random non-zero id for `want_config_id`.
    pub fn random_request_id() -> u32 {
        let id: u32 = rand::random();
        id.max(1)
    }

    pub fn config_request_id(&self) -> u32 {
        self.config_request_id
    }

    pub fn is_config_complete(&self) -> bool {
        self.config_complete
    }

    pub fn binary_detected(&self) -> bool {
        self.binary_frames_seen
    }

    /// Fold one update into the state, returning the event to forward, if any.
    pub fn apply(&mut self, update: RadioUpdate) -> Option<MeshEvent> {
        self.binary_frames_seen = true;
        match update {
            RadioUpdate::MyInfo { my_node_num } => {
                debug!("Got our node number: {}", my_node_num);
                self.my_node_num = Some(my_node_num);
                None
            }
            RadioUpdate::NodeInfo {
                num,
                long_name,
                short_name,
            } => {
                debug!(
                    "Node info for 0x{:08x}: {} ({})",
                    num,
                    escape_log(&long_name),
                    escape_log(&short_name)
                );
                self.nodes.update(num, &long_name);
                None
            }
            RadioUpdate::ConfigComplete(id) if id == self.config_request_id => {
                if self.config_complete {
                    return None;
                }
                self.config_complete = true;
                Some(MeshEvent::Connected(ConnectionInfo {
                    my_node_num: self.my_node_num,
                    port: self.port_name.clone(),
                    known_nodes: self.nodes.len(),
                }))
            }
            RadioUpdate::ConfigComplete(id) => {
                debug!(
                    "Ignoring config_complete_id=0x{:08x} (waiting for 0x{:08x})",
                    id, self.config_request_id
                );
                None
            }
            RadioUpdate::Position(packet) => Some(MeshEvent::Packet(packet)),
            RadioUpdate::Rebooted => {
                debug!("Device rebooted, config handshake will restart");
                self.config_complete = false;
                self.config_request_id = Self::random_request_id();
                None
            }
            RadioUpdate::Log(message) => {
                debug!("Device log: {}", escape_log(&message));
                None
            }
            RadioUpdate::Ignored => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::NodeDirectory;
    use bytes::Bytes;
    use framer::StreamFramer;

    fn from_radio(variant: proto::from_radio::PayloadVariant) -> Vec<u8> {
        proto::FromRadio {
            id: 1,
            payload_variant: Some(variant),
        }
        .encode_to_vec()
    }

    fn packet(from: u32, port: proto::PortNum, payload: Vec<u8>, rx_time: u32) -> Vec<u8> {
        let pkt = proto::MeshPacket {
            from,
            to: 0xFFFF_FFFF,
            rx_time,
            payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(proto::Data {
                portnum: port as i32,
                payload: Bytes::from(payload),
                ..Default::default()
            })),
            ..Default::default()
        };
        from_radio(proto::from_radio::PayloadVariant::Packet(pkt))
    }

    #[test]
    fn position_packet_survives_framing_and_decoding() {
        let pos = proto::Position {
            latitude_i: Some(377_749_000),
            longitude_i: Some(-1_224_194_000),
            altitude: Some(15),
            ..Default::default()
        };
        let payload = packet(123_456_789, proto::PortNum::PositionApp, pos.encode_to_vec(), 1_700_000_000);

        let mut framer = StreamFramer::new();
        framer.push(&framer::encode_frame(&payload).unwrap());
        let frame = framer.next_frame().unwrap();

        match decode_from_radio(&frame) {
            Some(RadioUpdate::Position(event)) => {
                assert_eq!(event.from, 123_456_789);
                assert_eq!(event.rx_time, Some(1_700_000_000));
                let fix = event.position_fix().unwrap();
                assert!((fix.latitude.unwrap() - 37.7749).abs() < 1e-6);
                assert!((fix.longitude.unwrap() + 122.4194).abs() < 1e-6);
                assert_eq!(fix.altitude, Some(15.0));
            }
            other => panic!("expected position, got {:?}", other),
        }
    }

    #[test]
    fn altitude_falls_back_to_hae() {
        let pos = proto::Position {
            latitude_i: Some(1),
            altitude_hae: Some(-12),
            ..Default::default()
        };
        let fix = position_fix(&pos);
        assert_eq!(fix.altitude, Some(-12.0));
        assert_eq!(fix.longitude, None);
    }

    #[test]
    fn garbage_position_payload_yields_event_without_fix() {
        let payload = packet(5, proto::PortNum::PositionApp, vec![0xFF, 0xFF, 0xFF], 0);
        match decode_from_radio(&payload) {
            Some(RadioUpdate::Position(event)) => {
                assert!(event.decoded.is_some());
                assert!(event.position_fix().is_none());
                assert_eq!(event.rx_time, None);
            }
            other => panic!("expected position event, got {:?}", other),
        }
    }

    #[test]
    fn encrypted_and_text_packets_are_ignored() {
        let text = packet(5, proto::PortNum::TextMessageApp, b"hi".to_vec(), 0);
        assert_eq!(decode_from_radio(&text), Some(RadioUpdate::Ignored));

        let encrypted = from_radio(proto::from_radio::PayloadVariant::Packet(proto::MeshPacket {
            from: 5,
            payload_variant: Some(proto::mesh_packet::PayloadVariant::Encrypted(Bytes::from_static(
                b"\x01\x02",
            ))),
            ..Default::default()
        }));
        assert_eq!(decode_from_radio(&encrypted), Some(RadioUpdate::Ignored));
    }

    #[test]
    fn nodeinfo_packet_updates_directory() {
        let user = proto::User {
            long_name: "Summit Relay".to_string(),
            short_name: "SR".to_string(),
            ..Default::default()
        };
        let frame = packet(0xABCD, proto::PortNum::NodeinfoApp, user.encode_to_vec(), 1_700_000_000);
        let nodes = NodeTable::new();
        let mut state = LinkState::new("/dev/ttyUSB0", nodes.clone(), 7);
        let update = decode_from_radio(&frame).unwrap();
        assert!(state.apply(update).is_none());
        assert_eq!(nodes.long_name(0xABCD).as_deref(), Some("Summit Relay"));
    }

    #[test]
    fn handshake_announces_connection_once() {
        let nodes = NodeTable::new();
        let mut state = LinkState::new("/dev/ttyACM0", nodes, 42);

        let my_info = from_radio(proto::from_radio::PayloadVariant::MyInfo(proto::MyNodeInfo {
            my_node_num: 0x1234_5678,
            ..Default::default()
        }));
        let node = from_radio(proto::from_radio::PayloadVariant::NodeInfo(proto::NodeInfo {
            num: 99,
            user: Some(proto::User {
                long_name: "Base".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }));
        for frame in [my_info, node] {
            assert!(state.apply(decode_from_radio(&frame).unwrap()).is_none());
        }

        assert!(state.apply(RadioUpdate::ConfigComplete(41)).is_none());
        assert!(!state.is_config_complete());

        let event = state.apply(RadioUpdate::ConfigComplete(42));
        assert_eq!(
            event,
            Some(MeshEvent::Connected(ConnectionInfo {
                my_node_num: Some(0x1234_5678),
                port: "/dev/ttyACM0".to_string(),
                known_nodes: 1,
            }))
        );
        assert!(state.apply(RadioUpdate::ConfigComplete(42)).is_none());
        assert!(state.binary_detected());
    }

    #[test]
    fn reboot_restarts_handshake() {
        let mut state = LinkState::new("p", NodeTable::new(), 42);
        state.apply(RadioUpdate::ConfigComplete(42));
        assert!(state.is_config_complete());
        state.apply(RadioUpdate::Rebooted);
        assert!(!state.is_config_complete());
        assert_ne!(state.config_request_id(), 0);
    }

    #[test]
    fn outbound_frames_decode_as_to_radio() {
        use proto::to_radio::PayloadVariant;
        let mut framer = StreamFramer::new();
        framer.push(&want_config_frame(0xDEAD_BEEF).unwrap());
        framer.push(&heartbeat_frame(3).unwrap());
        framer.push(&disconnect_frame().unwrap());

        let decode = |f: Vec<u8>| proto::ToRadio::decode(f.as_slice()).unwrap().payload_variant;
        assert_eq!(
            decode(framer.next_frame().unwrap()),
            Some(PayloadVariant::WantConfigId(0xDEAD_BEEF))
        );
        assert_eq!(
            decode(framer.next_frame().unwrap()),
            Some(PayloadVariant::Heartbeat(proto::Heartbeat { nonce: 3 }))
        );
        assert_eq!(
            decode(framer.next_frame().unwrap()),
            Some(PayloadVariant::Disconnect(true))
        );
    }
}
