//! Re-packetizes a rewritten PSI/SI section payload (as produced by
//! `Pat::serialize_single_service`/`Pmt::serialize`) back into 188-byte TS
//! packets, computing the CRC and a rolling continuity counter. Used by the
//! service filter to re-emit a PAT/PMT it has rewritten.

use bytes::Bytes;

use crate::crc32::mpeg2_crc32;
use crate::packet::TsPacket;

/// Packetizes sections for one PID, tracking that PID's continuity counter
/// across calls.
#[derive(Debug, Clone)]
pub struct SectionPacketizer {
    pid: u16,
    continuity_counter: u8,
}

impl SectionPacketizer {
    pub fn new(pid: u16) -> Self {
        SectionPacketizer {
            pid,
            continuity_counter: 0,
        }
    }

    /// Build the full section (8-byte long-form header + payload + CRC-32)
    /// and split it into 188-byte TS packets.
    #[allow(clippy::too_many_arguments)]
    pub fn packetize(
        &mut self,
        table_id: u8,
        table_id_extension: u16,
        version_number: u8,
        current_next_indicator: bool,
        section_number: u8,
        last_section_number: u8,
        payload: &[u8],
    ) -> Vec<TsPacket> {
        let mut section = Vec::with_capacity(3 + 5 + payload.len() + 4);
        let body_len = 5 + payload.len() + 4;
        section.push(table_id);
        section.push(0x80 | (((body_len >> 8) & 0x0F) as u8));
        section.push(body_len as u8);
        section.extend_from_slice(&table_id_extension.to_be_bytes());
        section.push(0xC0 | ((version_number & 0x1F) << 1) | (current_next_indicator as u8));
        section.push(section_number);
        section.push(last_section_number);
        section.extend_from_slice(payload);
        let crc = mpeg2_crc32(&section);
        section.extend_from_slice(&crc.to_be_bytes());

        self.split_into_packets(&section)
    }

    fn split_into_packets(&mut self, section: &[u8]) -> Vec<TsPacket> {
        let mut packets = Vec::new();
        let mut offset = 0;
        let mut first = true;

        while offset < section.len() || first {
            let mut buf = vec![0xFFu8; 188];
            buf[0] = 0x47;
            buf[1] = (((self.pid >> 8) as u8) & 0x1F) | if first { 0x40 } else { 0x00 };
            buf[2] = (self.pid & 0xFF) as u8;
            buf[3] = 0x10 | (self.continuity_counter & 0x0F);
            self.continuity_counter = self.continuity_counter.wrapping_add(1) & 0x0F;

            let mut pos = 4;
            if first {
                buf[pos] = 0; // pointer_field
                pos += 1;
                first = false;
            }
            let available = 188 - pos;
            let remaining = section.len() - offset;
            let take = remaining.min(available);
            buf[pos..pos + take].copy_from_slice(&section[offset..offset + take]);
            offset += take;

            packets.push(TsPacket::parse(Bytes::from(buf)).expect("packetizer builds well-formed packets"));

            if offset >= section.len() {
                break;
            }
        }

        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::RawSection;

    #[test]
    fn test_packetize_roundtrips_through_section_parse() {
        let mut packetizer = SectionPacketizer::new(0x0020);
        let payload = vec![1u8, 2, 3, 4];
        let packets = packetizer.packetize(0x02, 101, 0, true, 0, 0, &payload);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].payload_unit_start_indicator);
        assert_eq!(packets[0].pid, 0x0020);

        let psi_payload = packets[0].get_psi_payload().unwrap();
        let section = RawSection::parse(&psi_payload, 0x0020, true).unwrap();
        assert_eq!(section.table_id, 0x02);
        assert_eq!(section.table_id_extension, 101);
        assert_eq!(&section.payload[..], &payload[..]);
    }

    #[test]
    fn test_packetize_multi_packet_section() {
        let mut packetizer = SectionPacketizer::new(0x0020);
        let payload = vec![0xAB; 300];
        let packets = packetizer.packetize(0x02, 101, 0, true, 0, 0, &payload);
        assert_eq!(packets.len(), 2);
        assert!(packets[0].payload_unit_start_indicator);
        assert!(!packets[1].payload_unit_start_indicator);
        assert_eq!(packets[1].continuity_counter, 1);
    }

    #[test]
    fn test_continuity_counter_increments_across_calls() {
        let mut packetizer = SectionPacketizer::new(0x0020);
        let p1 = packetizer.packetize(0x02, 1, 0, true, 0, 0, &[1, 2]);
        let p2 = packetizer.packetize(0x02, 1, 1, true, 0, 0, &[3, 4]);
        assert_eq!(p1[0].continuity_counter, 0);
        assert_eq!(p2[0].continuity_counter, 1);
    }
}
