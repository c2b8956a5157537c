//! Collects schedule EIT sections (table_id 0x50-0x5F) until every basic and
//! extra schedule sub-table has been seen for every service that has shown
//! up on PID 0x0012, tracked with a per-service 256-section bitmap.
//!
//! TDT/TOT (PID 0x0014) are demuxed alongside EIT purely to learn the
//! current JST hour, which lets the basic schedule's current segment mark
//! earlier segments of today's table as permanently unused instead of
//! waiting for sections that already aired.

use std::collections::HashMap;

use chrono::{NaiveDateTime, Timelike};
use tracing::warn;

use ts::eit::{is_schedule_table_id, is_basic_table, table_index};
use ts::packet::{PID_EIT, PID_TDT_TOT};
use ts::tdt_tot::{TABLE_ID_TDT, TABLE_ID_TOT};
use ts::{Eit, RawSection, SectionDemux, SidSet, Tdt, Tot, TsPacket};

const NUM_SEGMENTS: usize = 32;
const NUM_SECTIONS: usize = 256;
const NUM_TABLES: usize = 8;

pub struct EitCollectorOptions {
    /// Services excluded from collection; treated as already-collected so
    /// they never block completion.
    pub xsids: SidSet,
}

impl Default for EitCollectorOptions {
    fn default() -> Self {
        EitCollectorOptions { xsids: SidSet::new() }
    }
}

type ServiceTriple = (u16, u16, u16);

/// The fields of a schedule EIT section the progress bitmap needs, derived
/// once per section from the already-parsed [`Eit`].
struct ScheduleSection {
    service_triple: ServiceTriple,
    table_id: u8,
    last_table_id: u8,
    section_number: u8,
    last_section_number: u8,
    segment_last_section_number: u8,
    version_number: u8,
    has_timestamp: bool,
    timestamp: Option<NaiveDateTime>,
}

impl ScheduleSection {
    fn table_index(&self) -> usize {
        table_index(self.table_id)
    }

    fn last_table_index(&self) -> usize {
        table_index(self.last_table_id)
    }

    fn segment_index(&self) -> usize {
        (self.section_number >> 3) as usize
    }

    fn section_index(&self) -> usize {
        (self.section_number & 0x07) as usize
    }

    fn last_segment_index(&self) -> usize {
        (self.last_section_number >> 3) as usize
    }

    fn last_section_index(&self) -> usize {
        (self.segment_last_section_number & 0x07) as usize
    }

    fn is_basic(&self) -> bool {
        is_basic_table(self.table_id)
    }
}

/// 256-section bitmap for one schedule sub-table (one `table_id` value).
struct TableProgress {
    collected: [u8; NUM_SEGMENTS],
    unused: [u8; NUM_SEGMENTS],
    /// Indexed by `section_index()` (0..8), not absolute section number —
    /// mirrors the original's indexing, which never addresses past 8.
    section_versions: [u8; NUM_SECTIONS],
    completed: bool,
}

impl Default for TableProgress {
    fn default() -> Self {
        TableProgress {
            collected: [0; NUM_SEGMENTS],
            unused: [0; NUM_SEGMENTS],
            section_versions: [0xFF; NUM_SECTIONS],
            completed: false,
        }
    }
}

impl TableProgress {
    fn reset(&mut self) {
        self.collected = [0; NUM_SEGMENTS];
        self.unused = [0; NUM_SEGMENTS];
        self.completed = false;
    }

    fn unuse(&mut self) {
        self.unused = [0xFF; NUM_SEGMENTS];
        self.completed = true;
    }

    fn update(&mut self, section: &ScheduleSection) {
        // The version number in a section doesn't reliably apply to the
        // whole sub-table in the wild, so consistency is never checked here
        // and a version change never triggers a reset.
        if section.table_index() == 0 && section.has_timestamp {
            if let Some(ts) = section.timestamp {
                let segment = (ts.hour() as usize) / 3;
                for i in 0..segment.min(NUM_SEGMENTS) {
                    self.unused[i] = 0xFF;
                }
            }
        }

        for i in (section.last_segment_index() + 1)..NUM_SEGMENTS {
            self.unused[i] = 0xFF;
        }

        for i in (section.last_section_index() + 1)..8 {
            self.unused[section.segment_index()] |= 1 << i;
        }

        self.collected[section.segment_index()] |= 1 << section.section_index();

        for i in section.section_index()..=section.last_section_index() {
            self.section_versions[i] = section.version_number;
        }

        self.completed = self.check_completed();
    }

    fn check_collected(&self, section: &ScheduleSection) -> bool {
        for i in section.section_index()..section.last_section_index() {
            if self.section_versions[i] == 0xFF || self.section_versions[i] != section.version_number {
                return false;
            }
        }
        let mask = 1 << section.section_index();
        (self.collected[section.segment_index()] & mask) != 0
    }

    fn is_completed(&self) -> bool {
        self.completed
    }

    fn check_completed(&self) -> bool {
        self.collected.iter().zip(self.unused.iter()).all(|(c, u)| (c | u) == 0xFF)
    }
}

/// The 8 basic or 8 extra sub-table bitmaps for one service.
struct TableGroupProgress {
    tables: [TableProgress; NUM_TABLES],
    last_table_index: Option<usize>,
    completed: bool,
}

impl Default for TableGroupProgress {
    fn default() -> Self {
        TableGroupProgress {
            tables: std::array::from_fn(|_| TableProgress::default()),
            last_table_index: None,
            completed: false,
        }
    }
}

impl TableGroupProgress {
    fn update(&mut self, section: &ScheduleSection) {
        if !self.check_consistency(section) {
            for table in self.tables.iter_mut() {
                table.reset();
            }
            for i in (section.last_table_index() + 1)..NUM_TABLES {
                self.tables[i].unuse();
            }
            self.completed = false;
        }

        self.tables[section.table_index()].update(section);
        self.last_table_index = Some(section.last_table_index());
        self.completed = self.check_completed();
    }

    fn check_collected(&self, section: &ScheduleSection) -> bool {
        match self.last_table_index {
            None => false,
            Some(lti) if lti != section.last_table_index() => false,
            _ => self.tables[section.table_index()].check_collected(section),
        }
    }

    fn is_completed(&self) -> bool {
        match self.last_table_index {
            None => true,
            Some(_) => self.completed,
        }
    }

    fn check_consistency(&self, section: &ScheduleSection) -> bool {
        matches!(self.last_table_index, Some(lti) if lti == section.last_table_index())
    }

    fn check_completed(&self) -> bool {
        self.tables.iter().all(|t| t.is_completed())
    }
}

/// The basic/extra split for one service, keyed by `ScheduleSection::is_basic`.
#[derive(Default)]
struct ServiceProgress {
    basic: TableGroupProgress,
    extra: TableGroupProgress,
}

impl ServiceProgress {
    fn update(&mut self, section: &ScheduleSection) {
        if section.is_basic() {
            self.basic.update(section);
        } else {
            self.extra.update(section);
        }
    }

    fn check_collected(&self, section: &ScheduleSection) -> bool {
        if section.is_basic() {
            self.basic.check_collected(section)
        } else {
            self.extra.check_collected(section)
        }
    }

    fn is_completed(&self) -> bool {
        self.basic.is_completed() && self.extra.is_completed()
    }
}

#[derive(Default)]
struct CollectProgress {
    services: HashMap<ServiceTriple, ServiceProgress>,
    completed: bool,
}

impl CollectProgress {
    fn update(&mut self, section: &ScheduleSection) {
        self.services.entry(section.service_triple).or_default().update(section);
        self.completed = self.check_completed();
    }

    fn check_collected(&self, section: &ScheduleSection) -> bool {
        match self.services.get(&section.service_triple) {
            None => false,
            Some(progress) => progress.check_collected(section),
        }
    }

    fn is_completed(&self) -> bool {
        self.completed
    }

    fn check_completed(&self) -> bool {
        self.services.values().all(|s| s.is_completed())
    }
}

pub struct EitCollector {
    options: EitCollectorOptions,
    demux: SectionDemux,
    has_timestamp: bool,
    timestamp: Option<NaiveDateTime>,
    progress: CollectProgress,
    done: bool,
}

impl EitCollector {
    pub fn new(options: EitCollectorOptions) -> Self {
        let mut demux = SectionDemux::new().with_crc_validation(true);
        demux.add_pid(PID_EIT);
        demux.add_pid(PID_TDT_TOT);
        EitCollector {
            options,
            demux,
            has_timestamp: false,
            timestamp: None,
            progress: CollectProgress::default(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn handle_packet(&mut self, packet: &TsPacket) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        for section in self.demux.feed_packet(packet) {
            if let Some(json) = self.handle_section(&section) {
                out.push(json);
            }
        }
        self.done = self.progress.is_completed();
        out
    }

    fn handle_section(&mut self, section: &RawSection) -> Option<serde_json::Value> {
        match section.table_id {
            TABLE_ID_TDT => {
                match Tdt::parse(section) {
                    Ok(tdt) => {
                        self.has_timestamp = true;
                        self.timestamp = Some(tdt.jst_time);
                    }
                    Err(_) => warn!("Broken TDT, skip"),
                }
                return None;
            }
            TABLE_ID_TOT => {
                match Tot::parse(section) {
                    Ok(tot) => {
                        self.has_timestamp = true;
                        self.timestamp = Some(tot.jst_time);
                    }
                    Err(_) => warn!("Broken TOT, skip"),
                }
                return None;
            }
            _ => {}
        }

        if !is_schedule_table_id(section.table_id) {
            return None;
        }
        if !section.current_next_indicator {
            return None;
        }

        let eit = match Eit::parse(section) {
            Ok(eit) => eit,
            Err(_) => {
                warn!("Broken EIT, skip");
                return None;
            }
        };

        let info = ScheduleSection {
            service_triple: (eit.original_network_id, eit.transport_stream_id, eit.service_id),
            table_id: eit.table_id,
            last_table_id: eit.last_table_id,
            section_number: eit.section_number,
            last_section_number: eit.last_section_number,
            segment_last_section_number: eit.segment_last_section_number,
            version_number: eit.version_number,
            has_timestamp: self.has_timestamp,
            timestamp: self.timestamp,
        };

        if self.check_collected(&info) {
            return None;
        }

        let json = eit.to_json();
        self.progress.update(&info);
        Some(json)
    }

    fn check_collected(&self, section: &ScheduleSection) -> bool {
        if self.options.xsids.contains(section.service_triple.2) {
            return true;
        }
        self.progress.check_collected(section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ts::crc32::mpeg2_crc32;

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

    /// One schedule section whose last_table_id/last_section_number/
    /// segment_last_section_number are all 0: it is, by itself, the whole
    /// basic schedule for this service, and completes that service's
    /// collection in one shot.
    fn build_single_section_schedule(sid: u16, table_id: u8, version: u8, event_id: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0x1234u16.to_be_bytes()); // transport_stream_id
        body.extend_from_slice(&0x7FE1u16.to_be_bytes()); // original_network_id
        body.push(0); // segment_last_section_number
        body.push(table_id); // last_table_id
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
            0, // section_number
            0, // last_section_number
        ];
        section.extend_from_slice(&body);
        let crc = mpeg2_crc32(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    #[test]
    fn test_single_section_schedule_completes_and_emits() {
        let mut collector = EitCollector::new(EitCollectorOptions::default());
        let section = build_single_section_schedule(1, 0x50, 0, 100);
        let out = collector.handle_packet(&section_packet(PID_EIT, &section));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["serviceId"], 1);
        assert!(collector.is_done());
    }

    #[test]
    fn test_already_collected_section_not_reemitted() {
        let mut collector = EitCollector::new(EitCollectorOptions::default());
        let section = build_single_section_schedule(1, 0x50, 0, 100);
        assert_eq!(collector.handle_packet(&section_packet(PID_EIT, &section)).len(), 1);
        assert_eq!(collector.handle_packet(&section_packet(PID_EIT, &section)).len(), 0);
    }

    #[test]
    fn test_excluded_service_never_emitted_or_completed() {
        let mut xsids = SidSet::new();
        xsids.add(1);
        let mut collector = EitCollector::new(EitCollectorOptions { xsids });
        let section = build_single_section_schedule(1, 0x50, 0, 100);
        let out = collector.handle_packet(&section_packet(PID_EIT, &section));
        assert!(out.is_empty());
        assert!(!collector.is_done());
    }
}
