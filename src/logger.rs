//! Event loop wiring an event source to the [`PositionHandler`].
//!
//! ```rust,no_run
//! use meshpos::handler::PositionHandler;
//! use meshpos::ledger::PositionLedger;
//! use meshpos::logger::PositionLogger;
//! use meshpos::nodes::NodeTable;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ledger = PositionLedger::load("mesh_positions.json")?;
//!     let logger = PositionLogger::new(PositionHandler::new(ledger), NodeTable::new());
//!     let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
//!     logger.run(rx, async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

use crate::events::MeshEvent;
use crate::handler::PositionHandler;
use crate::ledger::LedgerError;
use crate::metrics::StatsSnapshot;
use crate::nodes::NodeTable;
use log::{error, info, warn};
use std::future::Future;
use tokio::sync::mpsc;

/// Why [`PositionLogger::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown future completed (Ctrl-C).
    Shutdown,
    /// Every event sender was dropped, e.g. the serial reader died.
    SourceClosed,
}

pub struct PositionLogger {
    handler: PositionHandler,
    nodes: NodeTable,
}

impl PositionLogger {
    pub fn new(handler: PositionHandler, nodes: NodeTable) -> Self {
        Self { handler, nodes }
    }

    pub fn handler(&self) -> &PositionHandler {
        &self.handler
    }

    /// Dispatch a single event to the handler. Persist failures are logged, not fatal.
    pub fn dispatch(&self, event: MeshEvent) {
        match event {
            MeshEvent::Connected(info) => self.handler.on_connected(&info),
            MeshEvent::Packet(packet) => {
                if let Err(e) = self.handler.on_packet(&packet, &self.nodes) {
                    error!(
                        "Position from {} kept in memory but not saved: {}",
                        packet.from, e
                    );
                }
            }
        }
    }

    /// Handle events until `shutdown` resolves or the source closes, then persist once more.
    pub async fn run<F>(
        &self,
        mut events: mpsc::UnboundedReceiver<MeshEvent>,
        shutdown: F,
    ) -> Result<StopReason, LedgerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopping logger...");
                    break StopReason::Shutdown;
                }
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        warn!("Event source closed, stopping logger");
                        break StopReason::SourceClosed;
                    }
                },
            }
        };

        let saved = self.handler.persist()?;
        info!("Logger stopped. {} positions saved to {}", saved, self.output_display());
        let stats: StatsSnapshot = self.handler.stats();
        info!("Session stats: {}", stats);
        Ok(reason)
    }

    /// [`run`](Self::run), then await `close` whether or not the final persist succeeded.
    pub async fn run_and_close<F, C, T>(
        &self,
        events: mpsc::UnboundedReceiver<MeshEvent>,
        shutdown: F,
        close: C,
    ) -> (Result<StopReason, LedgerError>, T)
    where
        F: Future<Output = ()>,
        C: Future<Output = T>,
    {
        let run_result = self.run(events, shutdown).await;
        if let Err(e) = &run_result {
            error!("Final save failed: {}", e);
        }
        (run_result, close.await)
    }

    fn output_display(&self) -> String {
        self.handler.with_ledger(|l| l.path().display().to_string())
    }
}
