//! Bounds a single-service packet stream to the airing window of one EIT
//! event, buffering PAT/PMT until the start PCR is reached and stopping once
//! the end PCR is reached (or the event is canceled/not found in EIT).

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use ts::eit::TABLE_ID_EIT_PF_ACTUAL;
use ts::pat::TABLE_ID_PAT;
use ts::packet::{PID_EIT, PID_PAT, PID_TDT_TOT};
use ts::pcr::compare_pcr;
use ts::pmt::TABLE_ID_PMT;
use ts::tdt_tot::{TABLE_ID_TDT, TABLE_ID_TOT};
use ts::{Eit, EitEvent, Pat, Pcr42, Pmt, RawSection, SectionDemux, SectionPacketizer, Tdt, Tot, TsPacket};

pub struct ProgramFilterOptions {
    pub service_id: u16,
    pub event_id: u16,
    /// Initial PCR PID/tick/JST-time baseline, carried over from a previous
    /// run (e.g. `sync-clocks`' output) so streaming can start without
    /// waiting for a fresh TDT/TOT.
    pub clock_pid: u16,
    pub clock_pcr: Pcr42,
    pub clock_time: NaiveDateTime,
    pub start_margin_ms: i64,
    pub end_margin_ms: i64,
    /// Forward PAT packets immediately instead of buffering them until the
    /// start PCR is reached.
    pub pre_streaming: bool,
    /// If reached while still in `WaitReady` (PCR/event-time baseline not
    /// yet established), the filter gives up and signals a retry instead of
    /// blocking forever.
    pub wait_until: Option<NaiveDateTime>,
    /// When non-empty, the rewritten PMT drops video elementary streams
    /// whose stream-identifier-descriptor component tag isn't listed.
    pub video_component_tag_allowlist: Vec<u8>,
    /// Same as `video_component_tag_allowlist`, for audio streams.
    pub audio_component_tag_allowlist: Vec<u8>,
}

#[derive(Debug)]
pub enum FilterAction {
    Drop,
    Forward(Vec<TsPacket>),
    Stop,
    /// `wait_until` was reached without the filter becoming ready; the
    /// caller should exit with the retry status code.
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitReady,
    Streaming,
}

pub struct ProgramFilter {
    options: ProgramFilterOptions,
    demux: SectionDemux,
    clock: Clock,
    state: State,
    last_pat_packets: Vec<TsPacket>,
    last_pmt_packets: Vec<TsPacket>,
    pmt_packetizer: SectionPacketizer,
    pmt_pid: Option<u16>,
    pcr_pid: Option<u16>,
    pcr_pid_ready: bool,
    event_time_ready: bool,
    event_start_time: Option<NaiveDateTime>,
    event_end_time: Option<NaiveDateTime>,
    start_pcr: Option<Pcr42>,
    end_pcr: Option<Pcr42>,
    stop: bool,
    retry: bool,
}

impl ProgramFilter {
    pub fn new(options: ProgramFilterOptions) -> Self {
        let mut demux = SectionDemux::new().with_crc_validation(true);
        demux.add_pid(PID_PAT);
        demux.add_pid(PID_EIT);
        demux.add_pid(PID_TDT_TOT);
        debug!("Demux += PAT EIT TDT/TOT");

        let mut clock = Clock::new();
        clock.set_pid(options.clock_pid);
        clock.update_pcr(options.clock_pcr);
        clock.update_time(options.clock_time);
        debug!(clock_pid = options.clock_pid, clock_pcr = ?options.clock_pcr, "Initial clock");

        ProgramFilter {
            options,
            demux,
            clock,
            state: State::WaitReady,
            last_pat_packets: Vec::new(),
            last_pmt_packets: Vec::new(),
            pmt_packetizer: SectionPacketizer::new(PID_PAT), // re-targeted once the PMT PID is known
            pmt_pid: None,
            pcr_pid: None,
            pcr_pid_ready: false,
            event_time_ready: false,
            event_start_time: None,
            event_end_time: None,
            start_pcr: None,
            end_pcr: None,
            stop: false,
            retry: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state == State::Streaming
    }

    pub fn handle_packet(&mut self, packet: &TsPacket) -> FilterAction {
        for section in self.demux.feed_packet(packet) {
            self.handle_section(&section);
        }

        match self.state {
            State::WaitReady => self.wait_ready(packet),
            State::Streaming => self.do_streaming(packet),
        }
    }

    fn wait_ready(&mut self, packet: &TsPacket) -> FilterAction {
        if self.stop {
            warn!("Canceled");
            return FilterAction::Stop;
        }
        if self.retry {
            warn!("Gave up waiting, retry");
            return FilterAction::Retry;
        }

        if let (Some(wait_until), Some(now)) = (self.options.wait_until, self.clock.now()) {
            if !(self.pcr_pid_ready && self.event_time_ready && self.clock.is_ready()) && now >= wait_until {
                warn!(?wait_until, "Reached wait_until before becoming ready, retry");
                self.retry = true;
                return FilterAction::Retry;
            }
        }

        let pid = packet.pid;

        if pid == PID_PAT {
            if self.options.pre_streaming {
                return FilterAction::Forward(vec![packet.clone()]);
            }
            if packet.payload_unit_start_indicator {
                self.last_pat_packets.clear();
            }
            self.last_pat_packets.push(packet.clone());
        } else if Some(pid) == self.pmt_pid && !self.allowlist_active() {
            // With an allow-list active, `handle_pmt` repacketizes the
            // filtered PMT into `last_pmt_packets` itself; raw packets for
            // this PID would just reintroduce the dropped streams.
            if packet.payload_unit_start_indicator {
                self.last_pmt_packets.clear();
            }
            self.last_pmt_packets.push(packet.clone());
        }

        if !self.pcr_pid_ready || !self.event_time_ready {
            return FilterAction::Drop;
        }

        if Some(pid) != self.pcr_pid {
            return FilterAction::Drop;
        }

        let Some(pcr) = packet.pcr42() else {
            trace!(pcr_pid = pid, "has no valid PCR...");
            return FilterAction::Drop;
        };

        if !self.clock.is_ready() {
            self.clock.update_pcr(pcr);
        }
        if !self.clock.is_ready() {
            return FilterAction::Drop;
        }

        let end_pcr = self.end_pcr.expect("event_time_ready implies end_pcr is set");
        if compare_pcr(pcr, end_pcr) != Ordering::Less {
            info!("Reached the end PCR");
            return FilterAction::Stop;
        }

        let start_pcr = self.start_pcr.expect("event_time_ready implies start_pcr is set");
        if compare_pcr(pcr, start_pcr) == Ordering::Less {
            return FilterAction::Drop;
        }

        info!("Reached the start PCR");

        let mut out = Vec::new();
        if !self.options.pre_streaming {
            out.append(&mut self.last_pat_packets);
        }
        out.append(&mut self.last_pmt_packets);
        out.push(packet.clone());

        self.state = State::Streaming;
        FilterAction::Forward(out)
    }

    fn do_streaming(&mut self, packet: &TsPacket) -> FilterAction {
        if self.stop {
            info!("Done");
            return FilterAction::Stop;
        }

        let pid = packet.pid;

        if Some(pid) == self.pcr_pid {
            let Some(pcr) = packet.pcr42() else {
                trace!(pcr_pid = pid, "has no valid PCR...");
                return FilterAction::Forward(vec![packet.clone()]);
            };

            if !self.clock.is_ready() {
                self.clock.update_pcr(pcr);
            }
            if !self.clock.is_ready() {
                // Postpone the stop until the clock synchronization is done.
                return FilterAction::Forward(vec![packet.clone()]);
            }

            let end_pcr = self.end_pcr.expect("clock.is_ready() implies end_pcr is set");
            if compare_pcr(pcr, end_pcr) != Ordering::Less {
                info!("Reached the end PCR");
                return FilterAction::Stop;
            }
        }

        FilterAction::Forward(vec![packet.clone()])
    }

    fn handle_section(&mut self, section: &RawSection) {
        match section.table_id {
            TABLE_ID_PAT => self.handle_pat(section),
            TABLE_ID_PMT => self.handle_pmt(section),
            TABLE_ID_EIT_PF_ACTUAL => self.handle_eit(section),
            TABLE_ID_TDT => self.handle_tdt(section),
            TABLE_ID_TOT => self.handle_tot(section),
            _ => {}
        }
    }

    fn handle_pat(&mut self, section: &RawSection) {
        let pat = match Pat::parse(section) {
            Ok(pat) => pat,
            Err(_) => {
                warn!("Broken PAT, skip");
                return;
            }
        };

        // A PAT delivered with ts_id 0 has been observed around midnight on
        // at least BS-NTV and BS11, with no NIT PID entry at all.
        if pat.transport_stream_id == 0 {
            warn!("PAT for TSID#0000, skip");
            return;
        }

        let Some(new_pmt_pid) = pat.pmt_pid_for(self.options.service_id) else {
            warn!(sid = self.options.service_id, "SID not found in PAT, skip");
            return;
        };

        if let Some(old_pmt_pid) = self.pmt_pid.take() {
            self.demux.remove_pid(old_pmt_pid);
            debug!(old_pmt_pid, "Demux -= PMT");
        }
        self.pmt_pid = Some(new_pmt_pid);
        self.pmt_packetizer = SectionPacketizer::new(new_pmt_pid);
        self.demux.add_pid(new_pmt_pid);
        debug!(pmt_pid = new_pmt_pid, "Demux += PMT");
    }

    fn allowlist_active(&self) -> bool {
        !self.options.video_component_tag_allowlist.is_empty() || !self.options.audio_component_tag_allowlist.is_empty()
    }

    fn handle_pmt(&mut self, section: &RawSection) {
        let mut pmt = match Pmt::parse(section) {
            Ok(pmt) => pmt,
            Err(_) => {
                warn!("Broken PMT, skip");
                return;
            }
        };

        if pmt.service_id != self.options.service_id {
            warn!(sid = pmt.service_id, "PMT.SID unmatched, skip");
            return;
        }

        self.pcr_pid = Some(pmt.pcr_pid);
        self.pcr_pid_ready = true;
        debug!(pcr_pid = pmt.pcr_pid, "PCR PID");

        if self.clock.pid() != Some(pmt.pcr_pid) {
            warn!(old = ?self.clock.pid(), new = pmt.pcr_pid, "PID of PCR has been changed, need resync");
            self.clock.set_pid(pmt.pcr_pid);
        }

        if self.allowlist_active() {
            pmt.retain_by_component_tag(
                &self.options.video_component_tag_allowlist,
                &self.options.audio_component_tag_allowlist,
            );
            let payload = pmt.serialize();
            let packets = self.pmt_packetizer.packetize(
                TABLE_ID_PMT,
                pmt.service_id,
                pmt.version_number,
                pmt.current_next_indicator,
                0,
                0,
                &payload,
            );
            debug!(streams = pmt.streams.len(), "Rewrote PMT for component-tag allow-list");
            self.last_pmt_packets = packets;
        }
    }

    fn handle_eit(&mut self, section: &RawSection) {
        let eit = match Eit::parse(section) {
            Ok(eit) => eit,
            Err(_) => {
                warn!("Broken EIT, skip");
                return;
            }
        };

        if eit.service_id != self.options.service_id {
            return;
        }

        if eit.events.is_empty() {
            error!("No event in EIT, stop");
            self.stop = true;
            return;
        }

        let present = &eit.events[0];
        if present.event_id == self.options.event_id {
            debug!(eid = self.options.event_id, "Event has started");
            self.update_event_time(present.clone());
            return;
        }

        if eit.events.len() < 2 {
            warn!("No following event in EIT");
            if self.state == State::Streaming {
                return;
            }
            error!(eid = self.options.event_id, "Event might have been canceled");
            self.stop = true;
            return;
        }

        let following = &eit.events[1];
        if following.event_id == self.options.event_id {
            debug!(eid = self.options.event_id, "Event will start soon");
            self.update_event_time(following.clone());
            return;
        }

        if self.state == State::Streaming {
            return;
        }
        error!(eid = self.options.event_id, "Event might have been canceled");
        self.stop = true;
    }

    fn update_event_time(&mut self, event: EitEvent) {
        let Some(start_time) = event.start_time else {
            warn!("Event has no start_time, skip");
            return;
        };
        let duration_ms = event.duration_ms.unwrap_or(0) + self.options.end_margin_ms;

        let event_start_time = start_time - chrono::Duration::milliseconds(self.options.start_margin_ms);
        let event_end_time = start_time + chrono::Duration::milliseconds(duration_ms);
        info!(?event_start_time, ?event_end_time, "Updated event time");

        self.event_start_time = Some(event_start_time);
        self.event_end_time = Some(event_end_time);
        self.event_time_ready = true;

        if self.clock.is_ready() {
            self.update_pcr_range();
        }
    }

    fn handle_tdt(&mut self, section: &RawSection) {
        match Tdt::parse(section) {
            Ok(tdt) => self.update_clock_time(tdt.jst_time),
            Err(_) => warn!("Broken TDT, skip"),
        }
    }

    fn handle_tot(&mut self, section: &RawSection) {
        match Tot::parse(section) {
            Ok(tot) => self.update_clock_time(tot.jst_time),
            Err(_) => warn!("Broken TOT, skip"),
        }
    }

    /// `Clock::update_time` is a no-op once its baseline is already set, so
    /// unlike the original's explicit `clock_time_ready_` guard this can be
    /// called unconditionally on every TDT/TOT.
    fn update_clock_time(&mut self, time: NaiveDateTime) {
        self.clock.update_time(time);
        trace!(?time, "Updated clock time");
        if self.event_time_ready && self.clock.is_ready() {
            self.update_pcr_range();
        }
    }

    fn update_pcr_range(&mut self) {
        let start_time = self.event_start_time.expect("event_time_ready implies event_start_time is set");
        let end_time = self.event_end_time.expect("event_time_ready implies event_end_time is set");
        self.start_pcr = self.clock.convert_time_to_pcr(start_time);
        self.end_pcr = self.clock.convert_time_to_pcr(end_time);
        info!(start_pcr = ?self.start_pcr, end_pcr = ?self.end_pcr, "Updated PCR range");
    }
}
