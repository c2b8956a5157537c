//! Waits for PAT, SDT, and NIT to all be ready, then emits one JSON
//! document per scanned service.

use tracing::{info, warn};

use ts::nit::{TABLE_ID_NIT_ACTUAL, TABLE_ID_NIT_OTHER};
use ts::pat::TABLE_ID_PAT;
use ts::packet::{PID_NIT, PID_NULL, PID_PAT, PID_SDT};
use ts::sdt::TABLE_ID_SDT_ACTUAL;
use ts::{Nit, Pat, RawSection, SectionDemux, SidSet, Sdt, TsPacket};

/// Service types counted as audio/video services worth listing.
///
/// The same digital-TV/digital-audio/"temporary" set used to filter SDT
/// services elsewhere.
const AUDIO_VIDEO_SERVICE_TYPES: [u8; 6] = [0x01, 0x02, 0xA1, 0xA2, 0xA5, 0xA6];

pub struct ServiceScannerOptions {
    pub sids: SidSet,
    pub xsids: SidSet,
}

pub struct ServiceScanner {
    options: ServiceScannerOptions,
    demux: SectionDemux,
    nit_pid: u16,
    pat: Option<Pat>,
    sdt: Option<Sdt>,
    nit: Option<Nit>,
}

impl ServiceScanner {
    pub fn new(options: ServiceScannerOptions) -> Self {
        let mut demux = SectionDemux::new().with_crc_validation(true);
        demux.add_pid(PID_PAT);
        demux.add_pid(PID_NIT);
        demux.add_pid(PID_SDT);
        ServiceScanner { options, demux, nit_pid: PID_NIT, pat: None, sdt: None, nit: None }
    }

    /// All three tables are ready; scanning is done.
    pub fn is_completed(&self) -> bool {
        self.pat.is_some() && self.sdt.is_some() && self.nit.is_some()
    }

    pub fn handle_packet(&mut self, packet: &TsPacket) {
        for section in self.demux.feed_packet(packet) {
            self.handle_section(&section);
        }
        if self.is_completed() {
            info!("Ready to collect services");
        }
    }

    fn handle_section(&mut self, section: &RawSection) {
        match section.table_id {
            TABLE_ID_PAT => self.handle_pat(section),
            TABLE_ID_NIT_ACTUAL => self.handle_nit(section),
            TABLE_ID_SDT_ACTUAL => self.handle_sdt(section),
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

        if pat.nit_pid != PID_NULL && pat.nit_pid != PID_NIT {
            info!(nit_pid = pat.nit_pid, "Non-standard NIT, reset NIT");
            self.nit = None;
            self.demux.remove_pid(self.nit_pid);
            self.nit_pid = pat.nit_pid;
            self.demux.add_pid(self.nit_pid);
        }

        self.pat = Some(pat);
        info!("PAT ready");
    }

    fn handle_nit(&mut self, section: &RawSection) {
        match Nit::parse(section) {
            Ok(nit) => {
                self.nit = Some(nit);
                info!("NIT ready");
            }
            Err(_) => warn!("Broken NIT, skip"),
        }
    }

    fn handle_sdt(&mut self, section: &RawSection) {
        let sdt = match Sdt::parse(section) {
            Ok(sdt) => sdt,
            Err(_) => {
                warn!("Broken SDT, skip");
                return;
            }
        };
        if sdt.transport_stream_id == 0 {
            warn!("SDT for TSID#0000, skip");
            return;
        }
        self.sdt = Some(sdt);
        info!("SDT ready");
    }

    /// The scanned services, once [`Self::is_completed`]; `None` otherwise.
    pub fn result(&self) -> Option<serde_json::Value> {
        let pat = self.pat.as_ref()?;
        let sdt = self.sdt.as_ref()?;
        let nit = self.nit.as_ref()?;

        let mut out = Vec::new();
        for program in &pat.programs {
            let sid = program.service_id;
            if !self.options.sids.is_empty() && !self.options.sids.contains(sid) {
                continue;
            }
            if !self.options.xsids.is_empty() && self.options.xsids.contains(sid) {
                continue;
            }

            let Some(service) = sdt.services.iter().find(|s| s.service_id == sid) else {
                continue;
            };
            if !AUDIO_VIDEO_SERVICE_TYPES.contains(&service.service_type) {
                continue;
            }

            let logo_id = service.logo_id.map(|id| id as i32).unwrap_or(-1);
            let remote_control_key_id = Self::remote_control_key_id(nit, sdt.transport_stream_id, sdt.original_network_id);

            let mut v = serde_json::json!({
                "nid": sdt.original_network_id,
                "tsid": sdt.transport_stream_id,
                "sid": sid,
                "name": service.service_name,
                "type": service.service_type,
                "logoId": logo_id,
            });
            if remote_control_key_id != 0 {
                v["remoteControlKeyId"] = serde_json::json!(remote_control_key_id);
            }
            out.push(v);
        }
        Some(serde_json::Value::Array(out))
    }

    fn remote_control_key_id(nit: &Nit, tsid: u16, nid: u16) -> u8 {
        nit.transports
            .iter()
            .find(|t| t.transport_stream_id == tsid && t.original_network_id == nid)
            .and_then(|t| t.remote_control_key_id)
            .unwrap_or(0)
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

    fn build_pat(ts_id: u16, programs: &[(u16, u16)], nit_pid: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&ts_id.to_be_bytes());
        body.push(0xC1);
        body.push(0);
        body.push(0);
        body.extend_from_slice(&(0xE000 | nit_pid).to_be_bytes());
        for (sid, pid) in programs {
            body.extend_from_slice(&sid.to_be_bytes());
            body.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        }
        let section_length = body.len() + 4;
        let mut section = vec![0x00, 0x80 | ((section_length >> 8) as u8 & 0x0F), section_length as u8];
        section.extend_from_slice(&body);
        let crc = mpeg2_crc32(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    fn build_sdt(nid: u16, tsid: u16, services: &[(u16, u8, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&nid.to_be_bytes());
        body.push(0xFF);
        for (sid, stype, name) in services {
            body.extend_from_slice(&sid.to_be_bytes());
            body.push(0xFC);
            let mut desc = Vec::new();
            desc.push(*stype);
            desc.push(0);
            desc.push(name.len() as u8);
            desc.extend_from_slice(name.as_bytes());
            let mut entry_tail = vec![0x48, desc.len() as u8];
            entry_tail.extend_from_slice(&desc);
            body.push(0x80 | (((entry_tail.len() >> 8) & 0x0F) as u8));
            body.push(entry_tail.len() as u8);
            body.extend_from_slice(&entry_tail);
        }
        let section_length = body.len() + 4;
        let mut section = vec![0x42, 0x80 | ((section_length >> 8) as u8 & 0x0F), section_length as u8];
        section.extend_from_slice(&tsid.to_be_bytes());
        section.push(0xC1);
        section.push(0);
        section.push(0);
        section.extend_from_slice(&body);
        let crc = mpeg2_crc32(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    fn build_nit(network_id: u16, tsid: u16, onid: u16, rc_key: u8) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0xF000u16.to_be_bytes());
        let mut entry = Vec::new();
        entry.extend_from_slice(&tsid.to_be_bytes());
        entry.extend_from_slice(&onid.to_be_bytes());
        let descriptors = vec![ts::descriptor::TAG_TS_INFORMATION, 2, rc_key << 2, 0];
        entry.push(0xF0 | (((descriptors.len() >> 8) & 0x0F) as u8));
        entry.push(descriptors.len() as u8);
        entry.extend_from_slice(&descriptors);
        payload.extend_from_slice(&(0xF000u16 | entry.len() as u16).to_be_bytes());
        payload.extend_from_slice(&entry);

        let section_length = payload.len() + 4;
        let mut section = vec![0x40, 0x80 | ((section_length >> 8) as u8 & 0x0F), section_length as u8];
        section.extend_from_slice(&network_id.to_be_bytes());
        section.push(0xC1);
        section.push(0);
        section.push(0);
        section.extend_from_slice(&payload);
        let crc = mpeg2_crc32(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    #[test]
    fn test_completes_and_emits_services() {
        let mut scanner =
            ServiceScanner::new(ServiceScannerOptions { sids: SidSet::new(), xsids: SidSet::new() });
        assert!(!scanner.is_completed());

        let pat = build_pat(0x1234, &[(1, 0x100)], PID_NIT);
        scanner.handle_packet(&section_packet(PID_PAT, &pat));
        assert!(!scanner.is_completed());

        let sdt = build_sdt(0x0001, 0x1234, &[(1, 0x01, "Test TV")]);
        scanner.handle_packet(&section_packet(PID_SDT, &sdt));
        assert!(!scanner.is_completed());

        let nit = build_nit(0x0004, 0x1234, 0x0001, 3);
        scanner.handle_packet(&section_packet(PID_NIT, &nit));
        assert!(scanner.is_completed());

        let result = scanner.result().unwrap();
        let arr = result.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["sid"], 1);
        assert_eq!(arr[0]["name"], "Test TV");
        assert_eq!(arr[0]["logoId"], -1);
        assert_eq!(arr[0]["remoteControlKeyId"], 3);
    }

    #[test]
    fn test_non_av_service_type_excluded() {
        let mut scanner =
            ServiceScanner::new(ServiceScannerOptions { sids: SidSet::new(), xsids: SidSet::new() });
        let pat = build_pat(0x1234, &[(1, 0x100)], PID_NIT);
        scanner.handle_packet(&section_packet(PID_PAT, &pat));
        let sdt = build_sdt(0x0001, 0x1234, &[(1, 0x0C, "Data")]);
        scanner.handle_packet(&section_packet(PID_SDT, &sdt));
        let nit = build_nit(0x0004, 0x1234, 0x0001, 0);
        scanner.handle_packet(&section_packet(PID_NIT, &nit));
        let result = scanner.result().unwrap();
        assert!(result.as_array().unwrap().is_empty());
    }

    #[test]
    fn test_remote_control_key_id_omitted_when_zero() {
        let mut scanner =
            ServiceScanner::new(ServiceScannerOptions { sids: SidSet::new(), xsids: SidSet::new() });
        let pat = build_pat(0x1234, &[(1, 0x100)], PID_NIT);
        scanner.handle_packet(&section_packet(PID_PAT, &pat));
        let sdt = build_sdt(0x0001, 0x1234, &[(1, 0x01, "Test TV")]);
        scanner.handle_packet(&section_packet(PID_SDT, &sdt));
        let nit = build_nit(0x0004, 0x1234, 0x0001, 0);
        scanner.handle_packet(&section_packet(PID_NIT, &nit));
        let result = scanner.result().unwrap();
        assert!(result.as_array().unwrap()[0].get("remoteControlKeyId").is_none());
    }
}
