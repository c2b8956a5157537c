//! Emits one JSON document per event rather than per EIT section, by
//! running the schedule bitmap in [`crate::eit_collector::EitCollector`]
//! and flattening each newly-accepted section's event list into individual,
//! service-triple-tagged documents.

use std::collections::HashSet;

use ts::{SidSet, TsPacket};

use crate::eit_collector::{EitCollector, EitCollectorOptions};

type EventKey = (u16, u16, u16, u16);

pub struct ProgramMetadataCollector {
    inner: EitCollector,
    emitted: HashSet<EventKey>,
}

impl ProgramMetadataCollector {
    pub fn new(xsids: SidSet) -> Self {
        ProgramMetadataCollector {
            inner: EitCollector::new(EitCollectorOptions { xsids }),
            emitted: HashSet::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    pub fn handle_packet(&mut self, packet: &TsPacket) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        for section in self.inner.handle_packet(packet) {
            let nid = section["originalNetworkId"].as_u64().unwrap_or(0) as u16;
            let tsid = section["transportStreamId"].as_u64().unwrap_or(0) as u16;
            let sid = section["serviceId"].as_u64().unwrap_or(0) as u16;
            let Some(events) = section["events"].as_array() else { continue };
            for event in events {
                let event_id = event["eventId"].as_u64().unwrap_or(0) as u16;
                if !self.emitted.insert((nid, tsid, sid, event_id)) {
                    continue;
                }
                out.push(serde_json::json!({
                    "originalNetworkId": nid,
                    "transportStreamId": tsid,
                    "serviceId": sid,
                    "eventId": event_id,
                    "startTime": event["startTime"],
                    "duration": event["duration"],
                    "runningStatus": event["runningStatus"],
                    "scrambled": event["scrambled"],
                    "descriptors": event["descriptors"],
                }));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ts::crc32::mpeg2_crc32;
    use ts::packet::PID_EIT;

    fn section_packet(pid: u16, payload: &[u8]) -> TsPacket {
        let mut buf = vec![0u8; 188];
        buf[0] = 0x47;
        buf[1] = 0x40 | ((pid >> 8) as u8 & 0x1F);
        buf[2] = (pid & 0xFF) as u8;
        buf[3] = 0x10;
        buf[4] = 0;
        buf[5..5 + payload.len()].copy_from_slice(payload);
        TsPacket::parse(Bytes::from(buf)).unwrap()
    }

    fn build_single_section_schedule(sid: u16, table_id: u8, version: u8, event_id: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0x1234u16.to_be_bytes());
        body.extend_from_slice(&0x7FE1u16.to_be_bytes());
        body.push(0);
        body.push(table_id);
        body.extend_from_slice(&event_id.to_be_bytes());
        body.extend_from_slice(&60310u16.to_be_bytes());
        body.extend_from_slice(&[0x12, 0, 0]);
        body.extend_from_slice(&[0, 1, 0]);
        body.extend_from_slice(&[0x10, 0x00]);
        let section_length = body.len() + 4;
        let mut section = vec![
            table_id,
            0x80 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            (sid >> 8) as u8,
            sid as u8,
            0xC0 | (version << 1) | 0x01,
            0,
            0,
        ];
        section.extend_from_slice(&body);
        let crc = mpeg2_crc32(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    #[test]
    fn test_emits_one_document_per_event() {
        let mut collector = ProgramMetadataCollector::new(SidSet::new());
        let section = build_single_section_schedule(1, 0x50, 0, 100);
        let out = collector.handle_packet(&section_packet(PID_EIT, &section));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["eventId"], 100);
        assert_eq!(out[0]["serviceId"], 1);
        assert!(collector.is_done());
    }

    #[test]
    fn test_same_event_not_reemitted() {
        let mut collector = ProgramMetadataCollector::new(SidSet::new());
        let section = build_single_section_schedule(1, 0x50, 0, 100);
        assert_eq!(collector.handle_packet(&section_packet(PID_EIT, &section)).len(), 1);
        assert_eq!(collector.handle_packet(&section_packet(PID_EIT, &section)).len(), 0);
    }
}
