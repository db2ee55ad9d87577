//! Serial transport: opens the radio's USB/UART port and runs the blocking reader loop on a
//! dedicated tokio blocking thread.

use super::framer::StreamFramer;
use super::{decode_from_radio, disconnect_frame, heartbeat_frame, want_config_frame, LinkState};
use crate::events::MeshEvent;
use crate::nodes::NodeTable;
use anyhow::{anyhow, Result};
use log::{debug, info, trace, warn};
use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Resend `want_config_id` this often until the radio completes the config push.
const WANT_CONFIG_RETRY: Duration = Duration::from_secs(7);

fn hex_snippet(data: &[u8], max: usize) -> String {
    data.iter()
        .take(max)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("")
}

/// Pick the serial port a Meshtastic radio is most likely attached to.
pub fn detect_port() -> Result<String> {
    let ports = serialport::available_ports()
        .map_err(|e| anyhow!("Failed to enumerate serial ports: {}", e))?;
    let looks_usb = |name: &str| {
        ["ttyUSB", "ttyACM", "usbserial", "usbmodem", "COM"]
            .iter()
            .any(|hint| name.contains(hint))
    };
    ports
        .iter()
        .find(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
        .or_else(|| ports.iter().find(|p| looks_usb(&p.port_name)))
        .map(|p| p.port_name.clone())
        .ok_or_else(|| anyhow!("No USB serial device found"))
}

pub struct RadioLink {
    port: Box<dyn SerialPort>,
    framer: StreamFramer,
    state: LinkState,
    heartbeat_interval: Option<Duration>,
    heartbeat_nonce: u32,
    last_heartbeat: Instant,
    last_want_config_sent: Instant,
}

impl RadioLink {
    /// Open `port_name` and start the config handshake.
    pub async fn open(
        port_name: &str,
        baud_rate: u32,
        nodes: NodeTable,
        heartbeat_interval: Duration,
    ) -> Result<Self> {
        info!(
            "Opening Meshtastic device on {} at {} baud",
            port_name, baud_rate
        );
        let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(500));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;

        // ESP32 boards need DTR/RTS asserted to come out of reset.
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        sleep(Duration::from_millis(150)).await;

        // Drop boot console text buffered before we connected.
        let mut purge_buf = [0u8; 512];
        if let Ok(available) = port.bytes_to_read() {
            if available > 0 {
                let _ = port.read(&mut purge_buf);
            }
        }

        let now = Instant::now();
        let mut link = RadioLink {
            port,
            framer: StreamFramer::new(),
            state: LinkState::new(port_name, nodes, LinkState::random_request_id()),
            heartbeat_interval: (!heartbeat_interval.is_zero()).then_some(heartbeat_interval),
            heartbeat_nonce: 0,
            last_heartbeat: now,
            last_want_config_sent: now,
        };
        link.send_want_config()?;
        Ok(link)
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }

    fn send_want_config(&mut self) -> Result<()> {
        let id = self.state.config_request_id();
        debug!("Sending want_config_id=0x{:08x}", id);
        self.send_frame(&want_config_frame(id)?)?;
        self.last_want_config_sent = Instant::now();
        Ok(())
    }

    fn send_heartbeat(&mut self) -> Result<()> {
        self.heartbeat_nonce = self.heartbeat_nonce.wrapping_add(1);
        trace!("Sending heartbeat nonce={}", self.heartbeat_nonce);
        self.send_frame(&heartbeat_frame(self.heartbeat_nonce)?)?;
        self.last_heartbeat = Instant::now();
        Ok(())
    }

    fn maintain(&mut self) -> Result<()> {
        if !self.state.is_config_complete() && self.last_want_config_sent.elapsed() >= WANT_CONFIG_RETRY {
            if !self.state.binary_detected() {
                warn!("No protobuf frames from device yet. Is serial.mode set to PROTO?");
            }
            self.send_want_config()?;
        }
        if let Some(interval) = self.heartbeat_interval {
            if self.last_heartbeat.elapsed() >= interval {
                self.send_heartbeat()?;
            }
        }
        Ok(())
    }

    /// Read once and forward decoded events. Returns `false` once the receiver is gone.
    fn poll(&mut self, events: &mpsc::UnboundedSender<MeshEvent>) -> Result<bool> {
        let mut buffer = [0u8; 1024];
        match self.port.read(&mut buffer) {
            Ok(0) => {}
            Ok(n) => {
                trace!("RAW {} bytes: {}", n, hex_snippet(&buffer[..n], 64));
                self.framer.push(&buffer[..n]);
                let was_complete = self.state.is_config_complete();
                while let Some(frame) = self.framer.next_frame() {
                    let Some(update) = decode_from_radio(&frame) else {
                        continue;
                    };
                    if let Some(event) = self.state.apply(update) {
                        if events.send(event).is_err() {
                            return Ok(false);
                        }
                    }
                }
                // A reboot drops the handshake; ask again straight away.
                if was_complete && !self.state.is_config_complete() {
                    self.send_want_config()?;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) => return Err(anyhow!("Serial read error: {}", e)),
        }
        Ok(true)
    }

    fn run_blocking(
        mut self,
        events: mpsc::UnboundedSender<MeshEvent>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<()> {
        let result = loop {
            if shutdown.load(Ordering::Relaxed) {
                break Ok(());
            }
            match self.poll(&events) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Event receiver dropped, stopping reader");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
            if let Err(e) = self.maintain() {
                break Err(e);
            }
        };
        if let Ok(frame) = disconnect_frame() {
            let _ = self.send_frame(&frame);
        }
        info!("Meshtastic reader stopped");
        result
    }

    /// Start the reader on a blocking thread. Events arrive on `events` until the handle is
    /// closed or the port fails.
    pub fn spawn(self, events: mpsc::UnboundedSender<MeshEvent>) -> LinkHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let task = tokio::task::spawn_blocking(move || self.run_blocking(events, flag));
        LinkHandle { shutdown, task }
    }
}

pub struct LinkHandle {
    shutdown: Arc<AtomicBool>,
    task: JoinHandle<Result<()>>,
}

impl LinkHandle {
    /// Stop the reader, send `disconnect`, and report how the reader ended.
    pub async fn close(self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.task
            .await
            .map_err(|e| anyhow!("Meshtastic reader task failed: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::hex_snippet;

    #[test]
    fn hex_snippet_caps_output() {
        assert_eq!(hex_snippet(&[0x94, 0xc3, 0x00, 0x10], 2), "94c3");
    }
}
