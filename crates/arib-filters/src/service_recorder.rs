//! Continuously records one service's filtered packet stream into a fixed
//! size ring file, emitting JSON lifecycle/event messages for
//! `record-service`.

use chrono::NaiveDateTime;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use ts::eit::{events_to_json, TABLE_ID_EIT_PF_ACTUAL};
use ts::pat::TABLE_ID_PAT;
use ts::packet::{PID_EIT, PID_PAT, PID_TDT_TOT};
use ts::pmt::TABLE_ID_PMT;
use ts::tdt_tot::{TABLE_ID_TDT, TABLE_ID_TOT};
use ts::{Eit, Pat, Pmt, RawSection, SectionDemux, Tdt, Tot, TsPacket};

use crate::clock::Clock;
use crate::ring_sink::{RingBackingFile, RingFileSink};

pub struct ServiceRecorderOptions {
    pub service_id: u16,
    /// Starting ring position, 0 to start fresh. Must satisfy the alignment
    /// preconditions of [`RingFileSink::set_position`].
    pub start_pos: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preparing,
    Recording,
    Done,
}

pub struct ServiceRecorder<F> {
    options: ServiceRecorderOptions,
    demux: SectionDemux,
    clock: Clock,
    sink: RingFileSink<F>,
    state: State,
    pmt_pid: Option<u16>,
    eit: Option<Eit>,
    new_eit: Option<Eit>,
    event_boundary_time: Option<NaiveDateTime>,
    event_boundary_pos: u64,
    event_started: bool,
    /// Set when the ring sink crossed a chunk boundary on a previous
    /// packet; the resulting `event-update`/`chunk` pair is sent at the
    /// start of the *next* `handle_packet` call, mirroring the one-packet
    /// delay of the original's `OnEndOfChunk` observer callback.
    pending_chunk: bool,
}

impl<F: RingBackingFile> ServiceRecorder<F> {
    /// Connects a recorder to its ring sink, seeking to `start_pos` if
    /// non-zero, and returns the recorder alongside the `start` message.
    pub fn new(options: ServiceRecorderOptions, mut sink: RingFileSink<F>) -> crate::Result<(Self, Value)> {
        if options.start_pos != 0 {
            sink.set_position(options.start_pos)?;
        }

        let mut demux = SectionDemux::new().with_crc_validation(true);
        demux.add_pid(PID_PAT);
        demux.add_pid(PID_EIT);
        demux.add_pid(PID_TDT_TOT);
        debug!("Demux += PAT EIT TDT/TOT");
        info!(sid = options.service_id, "Started recording");

        let recorder = ServiceRecorder {
            options,
            demux,
            clock: Clock::new(),
            sink,
            state: State::Preparing,
            pmt_pid: None,
            eit: None,
            new_eit: None,
            event_boundary_time: None,
            event_boundary_pos: 0,
            event_started: false,
            pending_chunk: false,
        };
        Ok((recorder, json!({"type": "start"})))
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub fn handle_packet(&mut self, packet: &TsPacket) -> Vec<Value> {
        if self.state == State::Done {
            return Vec::new();
        }

        if self.clock.has_pid() && self.clock.pid() == Some(packet.pid) {
            if let Some(pcr) = packet.pcr42() {
                self.clock.update_pcr(pcr);
            }
        }

        for section in self.demux.feed_packet(packet) {
            self.handle_section(&section);
        }

        match self.state {
            State::Preparing => self.on_preparing(),
            State::Recording => self.on_recording(packet),
            State::Done => Vec::new(),
        }
    }

    /// Ends the recording, emitting a final `stop` message. Returns `None`
    /// if a `stop` was already emitted (e.g. the sink broke mid-stream).
    pub fn end(&mut self) -> Option<Value> {
        if self.state == State::Done {
            return None;
        }
        self.state = State::Done;
        let success = !self.sink.is_broken();
        info!(sid = self.options.service_id, "Stopped recording");
        Some(json!({"type": "stop", "data": {"reset": !success}}))
    }

    fn on_preparing(&mut self) -> Vec<Value> {
        if !(self.clock.is_ready() && self.new_eit.is_some()) {
            return Vec::new();
        }

        self.eit = self.new_eit.take();
        self.state = State::Recording;
        info!("Ready for recording");

        let now = self.clock.now().expect("clock.is_ready() implies now()");
        let pos = self.sink.position();

        let mut messages = vec![self.chunk_message(now, pos)];
        self.pending_chunk = false;

        self.update_event_boundary(now, pos);

        let eit = self.eit.as_ref().expect("new_eit.is_some() implies eit is set");
        if now < Self::event_end_time(eit) {
            messages.push(self.event_message("event-start", eit, self.event_boundary_time.unwrap(), self.event_boundary_pos));
            self.event_started = true;
        } else {
            self.event_started = false;
        }
        messages
    }

    fn on_recording(&mut self, packet: &TsPacket) -> Vec<Value> {
        let now = self.clock.now().expect("Recording implies clock.is_ready()");
        let pos = self.sink.position();
        let mut messages = Vec::new();

        if self.pending_chunk {
            let eit = self.eit.clone().expect("Recording implies eit is set");
            messages.push(self.event_message("event-update", &eit, now, pos));
            messages.push(self.chunk_message(now, pos));
            self.pending_chunk = false;
        }

        let mut current_eit = self.eit.clone();
        let mut event_changed = false;
        if let Some(new_eit) = self.new_eit.take() {
            let old_event_id = self.eit.as_ref().map(|e| e.events[0].event_id);
            if old_event_id != Some(new_eit.events[0].event_id) {
                event_changed = true;
            } else {
                current_eit = Some(new_eit.clone());
            }
            self.eit = Some(new_eit);
        }

        if self.event_started {
            if event_changed {
                let ending = current_eit.expect("event_started implies eit was set");
                let starting = self.eit.clone().expect("event_changed implies eit was just replaced");
                warn!(old = ending.events[0].event_id, new = starting.events[0].event_id, "Event started before the previous one ended");
                self.update_event_boundary(now, pos);
                let time = self.event_boundary_time.unwrap();
                let boundary_pos = self.event_boundary_pos;
                messages.push(self.event_message("event-end", &ending, time, boundary_pos));
                messages.push(self.event_message("event-start", &starting, time, boundary_pos));
            } else if let Some(eit) = current_eit {
                let end_time = Self::event_end_time(&eit);
                if now >= end_time {
                    self.update_event_boundary(end_time, pos);
                    let time = self.event_boundary_time.unwrap();
                    let boundary_pos = self.event_boundary_pos;
                    messages.push(self.event_message("event-end", &eit, time, boundary_pos));
                    self.event_started = false;
                }
            }
        } else if event_changed {
            let starting = self.eit.clone().expect("event_changed implies eit was just replaced");
            let time = self.event_boundary_time.unwrap_or(now);
            let boundary_pos = self.event_boundary_pos;
            messages.push(self.event_message("event-start", &starting, time, boundary_pos));
            self.event_started = true;
        }

        match self.sink.write_bytes(packet.as_bytes()) {
            Ok(events) => {
                if !events.is_empty() {
                    self.pending_chunk = true;
                }
            }
            Err(()) => {
                warn!("Ring sink broken, stop");
                messages.push(json!({"type": "stop", "data": {"reset": true}}));
                self.state = State::Done;
            }
        }

        messages
    }

    fn update_event_boundary(&mut self, time: NaiveDateTime, pos: u64) {
        debug!(?time, pos, "Update event boundary");
        self.event_boundary_time = Some(time);
        self.event_boundary_pos = pos;
    }

    fn event_end_time(eit: &Eit) -> NaiveDateTime {
        let event = &eit.events[0];
        let start = event.start_time.unwrap_or_default();
        start + chrono::Duration::milliseconds(event.duration_ms.unwrap_or(0))
    }

    fn chunk_message(&self, time: NaiveDateTime, pos: u64) -> Value {
        json!({
            "type": "chunk",
            "data": { "chunk": { "timestamp": ts::time::jst_to_unix_ms(time), "pos": pos } },
        })
    }

    fn event_message(&self, kind: &str, eit: &Eit, time: NaiveDateTime, pos: u64) -> Value {
        let event = events_to_json(&eit.events).get(0).cloned().unwrap_or(Value::Null);
        json!({
            "type": kind,
            "data": {
                "originalNetworkId": eit.original_network_id,
                "transportStreamId": eit.transport_stream_id,
                "serviceId": eit.service_id,
                "event": event,
                "record": { "timestamp": ts::time::jst_to_unix_ms(time), "pos": pos },
            },
        })
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
        self.demux.add_pid(new_pmt_pid);
        debug!(pmt_pid = new_pmt_pid, "Demux += PMT");
    }

    fn handle_pmt(&mut self, section: &RawSection) {
        let pmt = match Pmt::parse(section) {
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

        if self.clock.pid() != Some(pmt.pcr_pid) {
            warn!(old = ?self.clock.pid(), new = pmt.pcr_pid, "PCR PID changed, need resync");
            self.clock.set_pid(pmt.pcr_pid);
        }
    }

    fn handle_eit(&mut self, section: &RawSection) {
        let mut eit = match Eit::parse(section) {
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
            warn!("No event in EIT, skip");
            return;
        }

        // Only the present event matters here; later messages serialize a
        // single-event EIT, matching `service_recorder.hh`'s practice of
        // erasing every event but the present one right after parsing.
        eit.events.truncate(1);
        debug!(eid = eit.events[0].event_id, "New EIT accepted");
        self.new_eit = Some(eit);
    }

    fn handle_tdt(&mut self, section: &RawSection) {
        match Tdt::parse(section) {
            Ok(tdt) => self.clock.update_time(tdt.jst_time),
            Err(_) => warn!("Broken TDT, skip"),
        }
    }

    fn handle_tot(&mut self, section: &RawSection) {
        match Tot::parse(section) {
            Ok(tot) => self.clock.update_time(tot.jst_time),
            Err(_) => warn!("Broken TOT, skip"),
        }
    }
}
