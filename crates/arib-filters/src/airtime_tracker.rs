//! Watches one service's present/following EIT until the tracked event
//! starts (or moves to "following"), then emits its airtime as JSON and
//! stops.

use tracing::{error, info, warn};

use ts::eit::TABLE_ID_EIT_PF_ACTUAL;
use ts::packet::PID_EIT;
use ts::time::jst_to_unix_ms;
use ts::{Eit, EitEvent, RawSection, SectionDemux, TsPacket};

pub struct AirtimeTrackerOptions {
    pub service_id: u16,
    pub event_id: u16,
}

pub struct AirtimeTracker {
    options: AirtimeTrackerOptions,
    demux: SectionDemux,
    done: bool,
    result: Option<serde_json::Value>,
}

impl AirtimeTracker {
    pub fn new(options: AirtimeTrackerOptions) -> Self {
        let mut demux = SectionDemux::new().with_crc_validation(true);
        demux.add_pid(PID_EIT);
        AirtimeTracker { options, demux, done: false, result: None }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the tracked event's airtime JSON once found, else `None`.
    pub fn take_result(&mut self) -> Option<serde_json::Value> {
        self.result.take()
    }

    pub fn handle_packet(&mut self, packet: &TsPacket) {
        for section in self.demux.feed_packet(packet) {
            self.handle_section(&section);
        }
    }

    fn handle_section(&mut self, section: &RawSection) {
        if self.done || section.table_id != TABLE_ID_EIT_PF_ACTUAL {
            return;
        }

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
            return;
        }

        let present = &eit.events[0];
        if present.event_id == self.options.event_id {
            info!(eid = self.options.event_id, "Event has started");
            self.emit(&eit, present);
            return;
        }

        if let Some(following) = eit.events.get(1) {
            if following.event_id == self.options.event_id {
                info!(eid = self.options.event_id, "Event will start soon");
                self.emit(&eit, following);
                return;
            }
        }

        error!(eid = self.options.event_id, "Event might have been canceled");
        self.done = true;
    }

    fn emit(&mut self, eit: &Eit, event: &EitEvent) {
        let Some(start_time) = event.start_time else {
            warn!("Event has no start_time, skip");
            return;
        };
        self.result = Some(serde_json::json!({
            "originalNetworkId": eit.original_network_id,
            "transportStreamId": eit.transport_stream_id,
            "serviceId": eit.service_id,
            "eventId": event.event_id,
            "startTime": jst_to_unix_ms(start_time),
            "duration": event.duration_ms.unwrap_or(0),
        }));
        self.done = true;
    }
}
