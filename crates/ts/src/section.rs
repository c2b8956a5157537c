//! Generic PSI/SI section reassembly and demultiplexing.
//!
//! Generalizes the original `TsParser` (`parser_zero_copy.rs`) from its
//! PAT/PMT-only reassembly to an arbitrary set of demultiplexed PIDs feeding
//! any PSI/SI table type.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::crc32::validate_section_crc32;
use crate::error::TsError;
use crate::packet::{ContinuityMode, ContinuityStatus, TsPacket};

/// A parsed-but-not-yet-table-typed PSI/SI section: the common 8-byte
/// "long form" header plus payload, with the trailing CRC already validated
/// (if requested) and stripped off.
#[derive(Debug, Clone)]
pub struct RawSection {
    pub table_id: u8,
    /// Also called `transport_stream_id`/`program_number`/`service_id`
    /// depending on table type.
    pub table_id_extension: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Payload after the 8-byte header, before the trailing 4-byte CRC.
    pub payload: Bytes,
    /// The PID this section was demultiplexed from.
    pub pid: u16,
}

impl RawSection {
    /// Parse one full "long form" section (beginning at `table_id`, ending
    /// just past the CRC) out of `data`. `validate_crc` controls whether the
    /// trailing CRC-32 is checked.
    pub fn parse(data: &[u8], pid: u16, validate_crc: bool) -> crate::Result<Self> {
        if data.len() < 3 {
            return Err(TsError::MalformedSection("section shorter than 3 bytes"));
        }
        let table_id = data[0];
        let section_syntax_indicator = (data[1] & 0x80) != 0;
        let section_length = (((data[1] & 0x0F) as usize) << 8) | data[2] as usize;
        let total_len = 3 + section_length;
        if data.len() < total_len {
            return Err(TsError::MalformedSection("section shorter than section_length"));
        }
        if !section_syntax_indicator {
            return Err(TsError::MalformedSection(
                "section_syntax_indicator clear, not a long-form section",
            ));
        }
        if section_length < 9 {
            return Err(TsError::MalformedSection("section_length too small for long form"));
        }

        if validate_crc && !validate_section_crc32(&data[..total_len]) {
            return Err(TsError::CrcMismatch);
        }

        let table_id_extension = u16::from_be_bytes([data[3], data[4]]);
        let version_number = (data[5] >> 1) & 0x1F;
        let current_next_indicator = (data[5] & 0x01) != 0;
        let section_number = data[6];
        let last_section_number = data[7];
        let payload = Bytes::copy_from_slice(&data[8..total_len - 4]);

        Ok(RawSection {
            table_id,
            table_id_extension,
            version_number,
            current_next_indicator,
            section_number,
            last_section_number,
            payload,
            pid,
        })
    }
}

/// Reassembles PSI/SI sections from a configurable set of demultiplexed
/// PIDs. Handles multi-packet sections via `payload_unit_start_indicator`
/// and the leading `pointer_field`.
#[derive(Debug, Default)]
pub struct SectionDemux {
    active_pids: std::collections::HashSet<u16>,
    buffers: HashMap<u16, BytesMut>,
    validate_crc: bool,
    continuity_mode: ContinuityMode,
    continuity: HashMap<u16, u8>,
}

impl SectionDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_crc_validation(mut self, validate: bool) -> Self {
        self.validate_crc = validate;
        self
    }

    pub fn with_continuity_mode(mut self, mode: ContinuityMode) -> Self {
        self.continuity_mode = mode;
        self
    }

    pub fn add_pid(&mut self, pid: u16) {
        self.active_pids.insert(pid);
    }

    pub fn remove_pid(&mut self, pid: u16) {
        self.active_pids.remove(&pid);
        self.buffers.remove(&pid);
        self.continuity.remove(&pid);
    }

    pub fn is_active(&self, pid: u16) -> bool {
        self.active_pids.contains(&pid)
    }

    /// Update the continuity counter state for `pid` given a newly-seen
    /// counter value, returning the resulting status. Only packets that
    /// carry a payload (checked by the caller) participate in continuity
    /// tracking.
    fn check_cc(&mut self, pid: u16, cc: u8) -> ContinuityStatus {
        let status = match self.continuity.get(&pid) {
            None => ContinuityStatus::Initial,
            Some(&prev) if cc == prev => ContinuityStatus::Duplicate,
            Some(&prev) if cc == (prev + 1) & 0x0F => ContinuityStatus::Ok,
            Some(&prev) => ContinuityStatus::Discontinuity { expected: (prev + 1) & 0x0F, actual: cc },
        };
        if status != ContinuityStatus::Duplicate {
            self.continuity.insert(pid, cc);
        }
        status
    }

    /// Feed one packet. Returns any sections that completed reassembly as a
    /// result of this packet (usually zero or one; a packet that starts a
    /// new section while completing the previous section's buffer can
    /// in principle yield more than one if packed tightly, though in
    /// practice PSI tables are not packed that way).
    ///
    /// When `continuity_mode` is not `Disabled`, a duplicate packet is
    /// dropped outright and a discontinuity clears the PID's in-flight
    /// buffer (the bytes already reassembled can no longer be trusted);
    /// `Warn` still lets this packet's bytes seed a fresh buffer, `Strict`
    /// drops this packet too.
    pub fn feed_packet(&mut self, packet: &TsPacket) -> Vec<RawSection> {
        let mut out = Vec::new();
        if !self.active_pids.contains(&packet.pid) {
            return out;
        }
        let Some(payload) = &packet.payload else {
            return out;
        };
        if payload.is_empty() {
            return out;
        }

        if self.continuity_mode != ContinuityMode::Disabled {
            match self.check_cc(packet.pid, packet.continuity_counter) {
                ContinuityStatus::Duplicate => return out,
                ContinuityStatus::Discontinuity { expected, actual } => {
                    warn!(pid = packet.pid, expected, actual, "continuity counter discontinuity");
                    self.buffers.remove(&packet.pid);
                    if self.continuity_mode == ContinuityMode::Strict {
                        return out;
                    }
                }
                ContinuityStatus::Initial | ContinuityStatus::Ok => {}
            }
        }

        if packet.payload_unit_start_indicator {
            let pointer_field = payload[0] as usize;
            if 1 + pointer_field > payload.len() {
                return out;
            }
            // Bytes before the pointed-to start belong to a section already
            // in flight in the per-PID buffer; bytes from the pointer
            // onward start a fresh section.
            let before = &payload[1..1 + pointer_field];
            let after = payload.slice(1 + pointer_field..);

            if let Some(buf) = self.buffers.get_mut(&packet.pid) {
                buf.extend_from_slice(before);
                if let Some(section) = Self::try_complete(buf, packet.pid, self.validate_crc) {
                    out.push(section);
                }
            }

            let buf = self.buffers.entry(packet.pid).or_insert_with(BytesMut::new);
            buf.clear();
            buf.extend_from_slice(&after);
            if let Some(section) = Self::try_complete(buf, packet.pid, self.validate_crc) {
                out.push(section);
            }
        } else if let Some(buf) = self.buffers.get_mut(&packet.pid) {
            buf.extend_from_slice(payload);
            if let Some(section) = Self::try_complete(buf, packet.pid, self.validate_crc) {
                out.push(section);
            }
        }

        out
    }

    fn try_complete(buf: &mut BytesMut, pid: u16, validate_crc: bool) -> Option<RawSection> {
        if buf.len() < 3 {
            return None;
        }
        if buf[0] == 0xFF {
            // Stuffing byte terminates the PID's section stream until the
            // next payload_unit_start.
            buf.clear();
            return None;
        }
        let section_length = (((buf[1] & 0x0F) as usize) << 8) | buf[2] as usize;
        let total_len = 3 + section_length;
        if buf.len() < total_len {
            return None;
        }
        let section = RawSection::parse(&buf[..total_len], pid, validate_crc).ok();
        let remainder = buf.split_off(total_len);
        *buf = remainder;
        section
    }
}
