//! Buffers a single-service stream until a content transition (a PMT whose
//! video/audio PID set differs from the one previously observed) is seen,
//! then replays the buffered PAT and the buffer tail from the transition
//! point and switches to pass-through.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use ts::pat::TABLE_ID_PAT;
use ts::packet::PID_PAT;
use ts::pcr::compare_pcr;
use ts::pmt::TABLE_ID_PMT;
use ts::{Pat, Pcr42, Pmt, RawSection, SectionDemux, TsPacket};

pub struct StartSeekerOptions {
    pub service_id: u16,
    pub max_packets: Option<usize>,
    pub max_duration_ms: Option<i64>,
}

#[derive(Debug)]
pub enum FilterAction {
    /// Still buffering; nothing to forward yet.
    Buffering,
    /// The transition (or a fallback budget) was reached: replay these
    /// packets and then switch to pass-through.
    Flush(Vec<TsPacket>),
    /// Already past the transition: forward this packet directly.
    Forward(TsPacket),
}

pub struct StartSeeker {
    options: StartSeekerOptions,
    demux: SectionDemux,
    buffer: Vec<TsPacket>,
    pat_index: Option<usize>,
    pmt_pid: Option<u16>,
    video_audio_pids: HashSet<u16>,
    seen_first_pmt: bool,
    first_pcr: Option<Pcr42>,
    done: bool,
}

impl StartSeeker {
    pub fn new(options: StartSeekerOptions) -> Self {
        let mut demux = SectionDemux::new().with_crc_validation(true);
        demux.add_pid(PID_PAT);
        StartSeeker {
            options,
            demux,
            buffer: Vec::new(),
            pat_index: None,
            pmt_pid: None,
            video_audio_pids: HashSet::new(),
            seen_first_pmt: false,
            first_pcr: None,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn handle_packet(&mut self, packet: &TsPacket) -> FilterAction {
        if self.done {
            return FilterAction::Forward(packet.clone());
        }

        let transition_index = self.buffer.len();
        self.buffer.push(packet.clone());

        for section in self.demux.feed_packet(packet) {
            if self.handle_section(&section, transition_index) {
                return self.flush_from(transition_index);
            }
        }

        if let Some(pcr) = packet.pcr42() {
            match self.first_pcr {
                None => self.first_pcr = Some(pcr),
                Some(first) => {
                    if let Some(max_duration_ms) = self.options.max_duration_ms {
                        let elapsed_ms = (pcr.ticks() - first.ticks()) / ts::pcr::PCR_TICKS_PER_MS;
                        if compare_pcr(pcr, first) != std::cmp::Ordering::Less && elapsed_ms >= max_duration_ms {
                            info!(elapsed_ms, "Reached max_duration, flush and pass through");
                            return self.flush_all();
                        }
                    }
                }
            }
        }

        if let Some(max_packets) = self.options.max_packets {
            if self.buffer.len() >= max_packets {
                info!(max_packets, "Reached max_packets, flush and pass through");
                return self.flush_all();
            }
        }

        FilterAction::Buffering
    }

    /// Returns `true` if this section establishes a content transition.
    fn handle_section(&mut self, section: &RawSection, transition_index: usize) -> bool {
        match section.table_id {
            TABLE_ID_PAT => self.handle_pat(section, transition_index),
            TABLE_ID_PMT => self.handle_pmt(section, transition_index),
            _ => false,
        }
    }

    fn handle_pat(&mut self, section: &RawSection, transition_index: usize) -> bool {
        let pat = match Pat::parse(section) {
            Ok(pat) => pat,
            Err(_) => {
                warn!("Broken PAT, skip");
                return false;
            }
        };

        let Some(new_pmt_pid) = pat.pmt_pid_for(self.options.service_id) else {
            warn!(sid = self.options.service_id, "SID not found in PAT, skip");
            return false;
        };

        self.pat_index = Some(transition_index);
        if let Some(old_pmt_pid) = self.pmt_pid.replace(new_pmt_pid) {
            if old_pmt_pid != new_pmt_pid {
                self.demux.remove_pid(old_pmt_pid);
                self.demux.add_pid(new_pmt_pid);
            }
        } else {
            self.demux.add_pid(new_pmt_pid);
        }
        debug!(pmt_pid = new_pmt_pid, "Demux += PMT");
        false
    }

    fn handle_pmt(&mut self, section: &RawSection, transition_index: usize) -> bool {
        let pmt = match Pmt::parse(section) {
            Ok(pmt) => pmt,
            Err(_) => {
                warn!("Broken PMT, skip");
                return false;
            }
        };

        if pmt.service_id != self.options.service_id {
            return false;
        }

        let new_pids: HashSet<u16> = pmt
            .streams
            .iter()
            .filter(|s| s.stream_type.is_video() || s.stream_type.is_audio())
            .map(|s| s.elementary_pid)
            .collect();

        if !self.seen_first_pmt {
            self.seen_first_pmt = true;
            self.video_audio_pids = new_pids;
            return false;
        }

        if new_pids == self.video_audio_pids {
            return false;
        }

        info!(old = ?self.video_audio_pids, new = ?new_pids, "Content transition detected");
        self.video_audio_pids = new_pids;
        self.transition_at(transition_index);
        true
    }

    fn transition_at(&mut self, transition_index: usize) {
        self.pat_index.get_or_insert(transition_index);
    }

    fn flush_from(&mut self, transition_index: usize) -> FilterAction {
        self.done = true;
        let mut out = Vec::new();
        if let Some(pat_index) = self.pat_index {
            if pat_index < transition_index {
                out.push(self.buffer[pat_index].clone());
            }
        }
        out.extend(self.buffer[transition_index..].iter().cloned());
        self.buffer.clear();
        FilterAction::Flush(out)
    }

    fn flush_all(&mut self) -> FilterAction {
        self.done = true;
        FilterAction::Flush(std::mem::take(&mut self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ts::crc32::mpeg2_crc32;

    fn section_packet(pid: u16, pusi: bool, payload: &[u8]) -> TsPacket {
        let mut buf = vec![0u8; 188];
        buf[0] = 0x47;
        buf[1] = (if pusi { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F);
        buf[2] = (pid & 0xFF) as u8;
        buf[3] = 0x10;
        let mut off = 4;
        if pusi {
            buf[off] = 0;
            off += 1;
        }
        buf[off..off + payload.len()].copy_from_slice(payload);
        TsPacket::parse(Bytes::from(buf)).unwrap()
    }

    fn null_packet(pid: u16) -> TsPacket {
        let mut buf = vec![0xFFu8; 188];
        buf[0] = 0x47;
        buf[1] = (pid >> 8) as u8 & 0x1F;
        buf[2] = (pid & 0xFF) as u8;
        buf[3] = 0x10;
        TsPacket::parse(Bytes::from(buf)).unwrap()
    }

    fn build_pat(ts_id: u16, sid: u16, pmt_pid: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&ts_id.to_be_bytes());
        body.push(0xC1);
        body.push(0);
        body.push(0);
        body.extend_from_slice(&sid.to_be_bytes());
        body.extend_from_slice(&(0xE000 | pmt_pid).to_be_bytes());
        let section_length = body.len() + 4;
        let mut section = vec![0x00, 0x80 | ((section_length >> 8) as u8 & 0x0F), section_length as u8];
        section.extend_from_slice(&body);
        let crc = mpeg2_crc32(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    fn build_pmt(sid: u16, pcr_pid: u16, streams: &[(u8, u16)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&sid.to_be_bytes());
        body.push(0xC1);
        body.push(0);
        body.push(0);
        body.extend_from_slice(&(0xE000 | pcr_pid).to_be_bytes());
        body.extend_from_slice(&0xF000u16.to_be_bytes());
        for (stype, pid) in streams {
            body.push(*stype);
            body.extend_from_slice(&(0xE000 | pid).to_be_bytes());
            body.extend_from_slice(&0xF000u16.to_be_bytes());
        }
        let section_length = body.len() + 4;
        let mut section = vec![0x02, 0x80 | ((section_length >> 8) as u8 & 0x0F), section_length as u8];
        section.extend_from_slice(&body);
        let crc = mpeg2_crc32(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    #[test]
    fn test_first_pmt_never_counts_as_transition() {
        let mut seeker = StartSeeker::new(StartSeekerOptions { service_id: 1, max_packets: None, max_duration_ms: None });
        let pat = build_pat(1, 1, 0x100);
        assert!(matches!(seeker.handle_packet(&section_packet(PID_PAT, true, &pat)), FilterAction::Buffering));

        let pmt = build_pmt(1, 0x101, &[(0x1B, 0x101)]);
        assert!(matches!(seeker.handle_packet(&section_packet(0x100, true, &pmt)), FilterAction::Buffering));
        assert!(!seeker.is_done());
    }

    #[test]
    fn test_pid_set_change_triggers_flush() {
        let mut seeker = StartSeeker::new(StartSeekerOptions { service_id: 1, max_packets: None, max_duration_ms: None });
        let pat = build_pat(1, 1, 0x100);
        seeker.handle_packet(&section_packet(PID_PAT, true, &pat));

        let pmt1 = build_pmt(1, 0x101, &[(0x1B, 0x101)]);
        seeker.handle_packet(&section_packet(0x100, true, &pmt1));

        seeker.handle_packet(&null_packet(0x200));

        let pmt2 = build_pmt(1, 0x101, &[(0x1B, 0x102)]); // different video PID
        let action = seeker.handle_packet(&section_packet(0x100, true, &pmt2));
        match action {
            FilterAction::Flush(packets) => {
                assert!(!packets.is_empty());
                assert_eq!(packets[0].pid, PID_PAT);
            }
            other => panic!("expected Flush, got {other:?}"),
        }
        assert!(seeker.is_done());
        assert!(matches!(seeker.handle_packet(&null_packet(0x300)), FilterAction::Forward(_)));
    }

    #[test]
    fn test_max_packets_fallback_flushes() {
        let mut seeker = StartSeeker::new(StartSeekerOptions { service_id: 1, max_packets: Some(3), max_duration_ms: None });
        assert!(matches!(seeker.handle_packet(&null_packet(0x200)), FilterAction::Buffering));
        assert!(matches!(seeker.handle_packet(&null_packet(0x200)), FilterAction::Buffering));
        match seeker.handle_packet(&null_packet(0x200)) {
            FilterAction::Flush(packets) => assert_eq!(packets.len(), 3),
            other => panic!("expected Flush, got {other:?}"),
        }
        assert!(seeker.is_done());
    }
}
