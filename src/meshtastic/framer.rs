//! Stream framing for the Meshtastic serial API.
//!
//! Each protobuf message on the wire is preceded by a 4-byte header:
//!
//!   `0x94 0xC3 <len_hi> <len_lo>`
//!
//! Debug console text from the firmware can be interleaved between frames, so the framer
//! skips bytes until it finds the magic pair and drops a byte to resynchronize whenever a
//! header declares an impossible length.

/// Frame start markers.
pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
const HEADER_LEN: usize = 4;
/// Largest payload the firmware will emit (MAX_TO_FROM_RADIO_SIZE).
pub const MAX_PAYLOAD: usize = 512;

#[derive(Debug, Default)]
pub struct StreamFramer {
    buf: Vec<u8>,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete payload, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // Realign to a start marker.
            match self.buf.iter().position(|&b| b == START1) {
                Some(0) => {}
                Some(pos) => {
                    self.buf.drain(..pos);
                }
                None => {
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != START2 {
                self.buf.drain(..1);
                continue;
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let declared = ((self.buf[2] as usize) << 8) | self.buf[3] as usize;
            if declared == 0 || declared > MAX_PAYLOAD {
                self.buf.drain(..1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }
            let frame = self.buf[HEADER_LEN..HEADER_LEN + declared].to_vec();
            self.buf.drain(..HEADER_LEN + declared);
            return Some(frame);
        }
    }
}

/// Prefix `payload` with the serial frame header.
pub fn encode_frame(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return None;
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(START1);
    out.push(START2);
    out.push(((payload.len() >> 8) & 0xFF) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    Some(out)
}
