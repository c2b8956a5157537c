//! Program Association Table (PAT): maps service IDs to their PMT PIDs.

use crate::error::TsError;
use crate::packet::PID_NIT;
use crate::section::RawSection;

pub const TABLE_ID_PAT: u8 = 0x00;

/// One `(service_id, pmt_pid)` mapping in a PAT. `program_number == 0`
/// entries are the NIT-PID redirect and are not represented here — see
/// [`Pat::nit_pid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    pub service_id: u16,
    pub pmt_pid: u16,
}

#[derive(Debug, Clone)]
pub struct Pat {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    /// PID carrying the NIT, redirected from the standard 0x0010 by a
    /// `program_number == 0` entry if present.
    pub nit_pid: u16,
    pub programs: Vec<PatProgram>,
}

impl Pat {
    pub fn parse(section: &RawSection) -> crate::Result<Self> {
        if section.table_id != TABLE_ID_PAT {
            return Err(TsError::UnexpectedTableId {
                expected: TABLE_ID_PAT,
                actual: section.table_id,
            });
        }
        let payload = &section.payload;
        if payload.len() % 4 != 0 {
            return Err(TsError::MalformedSection("PAT payload not a multiple of 4 bytes"));
        }

        let mut nit_pid = PID_NIT;
        let mut programs = Vec::with_capacity(payload.len() / 4);
        for chunk in payload.chunks_exact(4) {
            let number = u16::from_be_bytes([chunk[0], chunk[1]]);
            let pid = (((chunk[2] & 0x1F) as u16) << 8) | chunk[3] as u16;
            if number == 0 {
                nit_pid = pid;
            } else {
                programs.push(PatProgram {
                    service_id: number,
                    pmt_pid: pid,
                });
            }
        }

        Ok(Pat {
            transport_stream_id: section.table_id_extension,
            version_number: section.version_number,
            current_next_indicator: section.current_next_indicator,
            nit_pid,
            programs,
        })
    }

    pub fn pmt_pid_for(&self, service_id: u16) -> Option<u16> {
        self.programs
            .iter()
            .find(|p| p.service_id == service_id)
            .map(|p| p.pmt_pid)
    }

    /// Serialize a PAT section payload (everything after the 8-byte long
    /// section header, before the CRC) containing only `service_id`'s entry
    /// plus the NIT-PID redirect, for the service filter's rewritten PAT.
    pub fn serialize_single_service(&self, service_id: u16, pmt_pid: u16) -> Vec<u8> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&0u16.to_be_bytes());
        payload.extend_from_slice(&(0xE000 | self.nit_pid).to_be_bytes());
        payload.extend_from_slice(&service_id.to_be_bytes());
        payload.extend_from_slice(&(0xE000 | pmt_pid).to_be_bytes());
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc32::mpeg2_crc32;

    fn build_pat_section(ts_id: u16, nit_pid: Option<u16>, programs: &[(u16, u16)]) -> RawSection {
        let mut payload = Vec::new();
        if let Some(pid) = nit_pid {
            payload.extend_from_slice(&0u16.to_be_bytes());
            payload.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        }
        for (sid, pmt_pid) in programs {
            payload.extend_from_slice(&sid.to_be_bytes());
            payload.extend_from_slice(&(0xE000 | pmt_pid).to_be_bytes());
        }
        RawSection {
            table_id: TABLE_ID_PAT,
            table_id_extension: ts_id,
            version_number: 0,
            current_next_indicator: true,
            section_number: 0,
            last_section_number: 0,
            payload: payload.into(),
            pid: 0,
        }
    }

    #[test]
    fn test_parse_pat() {
        let section = build_pat_section(0x1234, Some(0x0020), &[(0x0001, 0x0101), (0x0002, 0x0102)]);
        let pat = Pat::parse(&section).unwrap();
        assert_eq!(pat.transport_stream_id, 0x1234);
        assert_eq!(pat.nit_pid, 0x0020);
        assert_eq!(pat.programs.len(), 2);
        assert_eq!(pat.pmt_pid_for(0x0001), Some(0x0101));
        assert_eq!(pat.pmt_pid_for(0x0002), Some(0x0102));
        assert_eq!(pat.pmt_pid_for(0x9999), None);
    }

    #[test]
    fn test_default_nit_pid() {
        let section = build_pat_section(1, None, &[(1, 0x100)]);
        let pat = Pat::parse(&section).unwrap();
        assert_eq!(pat.nit_pid, PID_NIT);
    }

    #[test]
    fn test_wrong_table_id() {
        let mut section = build_pat_section(1, None, &[(1, 0x100)]);
        section.table_id = 0x02;
        assert!(Pat::parse(&section).is_err());
    }

    #[test]
    fn test_serialize_single_service_roundtrips() {
        let section = build_pat_section(0x1234, Some(0x0020), &[(1, 0x100), (2, 0x200)]);
        let pat = Pat::parse(&section).unwrap();
        let payload = pat.serialize_single_service(2, 0x200);
        let rewritten = RawSection {
            table_id: TABLE_ID_PAT,
            table_id_extension: pat.transport_stream_id,
            version_number: 0,
            current_next_indicator: true,
            section_number: 0,
            last_section_number: 0,
            payload: payload.into(),
            pid: 0,
        };
        let reparsed = Pat::parse(&rewritten).unwrap();
        assert_eq!(reparsed.programs, vec![PatProgram { service_id: 2, pmt_pid: 0x200 }]);
        assert_eq!(reparsed.nit_pid, 0x0020);
        let _ = mpeg2_crc32(b""); // keep crc32 import exercised across tests
    }
}
