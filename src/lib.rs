//! # meshpos - Meshtastic position logger
//!
//! Listens to a Meshtastic radio over serial and keeps the most recent GPS fix of every mesh
//! node in a JSON file.
//!
//! ## Module Organization
//!
//! - [`ledger`] - node → last position map and its JSON file
//! - [`handler`] - applies one inbound packet to the ledger and persists it
//! - [`logger`] - event loop between an event source and the handler
//! - [`events`] - transport-neutral packet/connection events
//! - [`nodes`] - known-node directory used for display names
//! - [`meshtastic`] - serial framing, protobuf decoding and the device reader
//! - [`config`] - TOML configuration
//! - [`logutil`] - logger setup and log escaping
//! - [`metrics`] - per-run counters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   MeshEvent    ┌─────────────────┐  name lookup  ┌─────────────┐
//! │   Meshtastic    │ ─────────────▶ │ PositionLogger  │ ────────────▶ │  NodeTable  │
//! │   link (serial) │    (mpsc)      │  └ Handler      │               └─────────────┘
//! └─────────────────┘                └─────────────────┘                      ▲
//!          │                                  │ upsert + persist              │
//!          │                         ┌─────────────────┐                      │
//!          │                         │ PositionLedger  │                      │
//!          │                         └─────────────────┘                      │
//!          └──────────────────── node info ───────────────────────────────────┘
//! ```

pub mod config;
pub mod events;
pub mod handler;
pub mod ledger;
pub mod logger;
pub mod logutil;
#[cfg(feature = "meshtastic-proto")]
pub mod meshtastic;
pub mod metrics;
pub mod nodes;
pub mod protobuf;
