//! Collects present/following EIT sections (table_id 0x4E only) for a set of
//! services, deduplicating by `(service_triple, section_number, version)`
//! until every configured service's present and/or following section has
//! been seen at least once.

use std::collections::HashMap;

use tracing::warn;

use ts::eit::TABLE_ID_EIT_PF_ACTUAL;
use ts::packet::PID_EIT;
use ts::{Eit, RawSection, SectionDemux, SidSet, TsPacket};

pub struct EitpfCollectorOptions {
    pub sids: SidSet,
    /// Keep running (and never report done) regardless of coverage.
    pub streaming: bool,
    /// Collect present (section_number 0) sections.
    pub present: bool,
    /// Collect following (section_number 1) sections.
    pub following: bool,
}

impl Default for EitpfCollectorOptions {
    fn default() -> Self {
        EitpfCollectorOptions { sids: SidSet::new(), streaming: false, present: true, following: true }
    }
}

/// `(original_network_id, transport_stream_id, service_id)`, used as the
/// dedup key — mirrors the original's `service_triple()`.
type ServiceTriple = (u16, u16, u16);

pub struct EitpfCollector {
    options: EitpfCollectorOptions,
    demux: SectionDemux,
    present_versions: HashMap<ServiceTriple, u8>,
    following_versions: HashMap<ServiceTriple, u8>,
    done: bool,
}

impl EitpfCollector {
    pub fn new(options: EitpfCollectorOptions) -> Self {
        let mut demux = SectionDemux::new().with_crc_validation(true);
        demux.add_pid(PID_EIT);
        EitpfCollector {
            options,
            demux,
            present_versions: HashMap::new(),
            following_versions: HashMap::new(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds one packet, returning the JSON for any newly-accepted EIT
    /// section (`None` when the packet carried nothing new).
    pub fn handle_packet(&mut self, packet: &TsPacket) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        for section in self.demux.feed_packet(packet) {
            if let Some(json) = self.handle_section(&section) {
                out.push(json);
            }
        }
        if !self.options.streaming {
            self.done = self.collected_all();
        }
        out
    }

    fn handle_section(&mut self, section: &RawSection) -> Option<serde_json::Value> {
        if section.table_id != TABLE_ID_EIT_PF_ACTUAL {
            return None;
        }
        if !section.current_next_indicator {
            // The "next" version of the table, not yet in effect.
            return None;
        }

        let eit = match Eit::parse(section) {
            Ok(eit) => eit,
            Err(_) => {
                warn!("Broken EIT, skip");
                return None;
            }
        };

        if !self.options.sids.is_empty() && !self.options.sids.contains(eit.service_id) {
            return None;
        }

        let triple = (eit.original_network_id, eit.transport_stream_id, eit.service_id);
        let versions = match section.section_number {
            0 if self.options.present => &mut self.present_versions,
            1 if self.options.following => &mut self.following_versions,
            _ => return None,
        };
        if versions.get(&triple) == Some(&eit.version_number) {
            return None;
        }
        versions.insert(triple, eit.version_number);

        Some(eit.to_json())
    }

    fn collected_all(&self) -> bool {
        if self.options.sids.is_empty() {
            return false;
        }
        self.options.sids.iter().all(|sid| {
            let present_ok = !self.options.present || self.present_versions.keys().any(|(_, _, s)| *s == sid);
            let following_ok = !self.options.following || self.following_versions.keys().any(|(_, _, s)| *s == sid);
            present_ok && following_ok
        })
    }
}
