//! Position event handler: turns one inbound packet into a ledger update plus persist.
//!
//! The handler owns the [`PositionLedger`] behind a single mutex. Upsert and persist happen
//! under the same lock so two deliveries can never interleave a mutation with another
//! event's file write.

use crate::events::{ConnectionInfo, NodeId, PacketEvent};
use crate::ledger::{LedgerError, PositionLedger, PositionRecord};
use crate::logutil::escape_log;
use crate::metrics::{LoggerStats, StatsSnapshot};
use crate::nodes::NodeDirectory;
use chrono::{DateTime, Local};
use log::{debug, info};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Name recorded for nodes the directory cannot resolve.
pub const UNKNOWN_NODE_NAME: &str = "Unknown";

/// What a single packet did to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionOutcome {
    Recorded {
        node: NodeId,
        record: PositionRecord,
        persisted: usize,
    },
    /// No decoded payload or no position sub-structure.
    NoPosition,
    /// Latitude and longitude both zero: the device has no fix yet.
    NoFix,
}

pub struct PositionHandler {
    ledger: Mutex<PositionLedger>,
    stats: LoggerStats,
}

impl PositionHandler {
    pub fn new(ledger: PositionLedger) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            stats: LoggerStats::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PositionLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status output for a freshly established device connection.
    pub fn on_connected(&self, info: &ConnectionInfo) {
        info!("Connected to Meshtastic device on {}", info.port);
        match info.my_node_num {
            Some(num) => info!("My node: {} (0x{:08x})", num, num),
            None => info!("My node: unknown"),
        }
        info!("Known nodes: {}", info.known_nodes);
        info!("Listening for position updates...");
        info!("Logging to: {}", self.lock().path().display());
    }

    /// Handle one packet, stamping accepted fixes with the current local time.
    ///
    /// An `Err` means the ledger was updated in memory but the file write failed.
    pub fn on_packet<D: NodeDirectory + ?Sized>(
        &self,
        packet: &PacketEvent,
        nodes: &D,
    ) -> Result<PositionOutcome, LedgerError> {
        self.on_packet_at(packet, nodes, Local::now())
    }

    pub fn on_packet_at<D: NodeDirectory + ?Sized>(
        &self,
        packet: &PacketEvent,
        nodes: &D,
        now: DateTime<Local>,
    ) -> Result<PositionOutcome, LedgerError> {
        self.stats.inc_packets();

        let Some(fix) = packet.position_fix() else {
            debug!("Packet from {} carries no position, ignoring", packet.from);
            self.stats.inc_no_position();
            return Ok(PositionOutcome::NoPosition);
        };

        let latitude = fix.latitude.unwrap_or(0.0);
        let longitude = fix.longitude.unwrap_or(0.0);
        let altitude = fix.altitude.unwrap_or(0.0);

        if latitude == 0.0 && longitude == 0.0 {
            debug!("Position from {} has no fix yet (0,0), ignoring", packet.from);
            self.stats.inc_no_fix();
            return Ok(PositionOutcome::NoFix);
        }

        let name = nodes
            .long_name(packet.from)
            .unwrap_or_else(|| UNKNOWN_NODE_NAME.to_string());
        let record = PositionRecord::new(
            name,
            latitude,
            longitude,
            altitude,
            now,
            packet.rx_time.unwrap_or(0),
        );

        info!(
            "Position update from {} ({}): lat={:.6} lon={:.6} alt={}m time={}",
            escape_log(&record.name),
            packet.from,
            record.latitude,
            record.longitude,
            record.altitude,
            record.timestamp
        );

        let mut ledger = self.lock();
        ledger.upsert(packet.from, record.clone());
        self.stats.inc_recorded();
        let persisted = ledger.persist().map_err(|e| {
            self.stats.inc_persist_failures();
            e
        })?;
        Ok(PositionOutcome::Recorded {
            node: packet.from,
            record,
            persisted,
        })
    }

    /// Flush the ledger regardless of pending changes (used on shutdown).
    pub fn persist(&self) -> Result<usize, LedgerError> {
        self.lock().persist()
    }

    /// Run `f` against the current ledger contents.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&PositionLedger) -> R) -> R {
        f(&self.lock())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn into_ledger(self) -> PositionLedger {
        self.ledger.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
