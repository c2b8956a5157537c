//! Service Description Table (SDT). Carries the service name and type used
//! by `scan-services`.

use bytes::{Buf, Bytes};

use crate::descriptor::{self, DescriptorIterator, TAG_LOGO_TRANSMISSION, TAG_SERVICE};
use crate::error::TsError;
use crate::section::RawSection;

pub const TABLE_ID_SDT_ACTUAL: u8 = 0x42;
pub const TABLE_ID_SDT_OTHER: u8 = 0x46;

#[derive(Debug, Clone)]
pub struct SdtService {
    pub service_id: u16,
    pub eit_schedule_flag: bool,
    pub eit_present_following_flag: bool,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub service_type: u8,
    pub service_name: String,
    /// Broadcaster logo id from this service's own logo transmission
    /// descriptor (type 0x01), trusted only when `logo_transmission_type`
    /// is 1 or 2. `None` when absent or untrusted; `scan-services` reports
    /// that as `-1` rather than omitting the field.
    pub logo_id: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct Sdt {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub version_number: u8,
    pub services: Vec<SdtService>,
}

impl Sdt {
    pub fn parse(section: &RawSection) -> crate::Result<Self> {
        if section.table_id != TABLE_ID_SDT_ACTUAL && section.table_id != TABLE_ID_SDT_OTHER {
            return Err(TsError::UnexpectedTableId {
                expected: TABLE_ID_SDT_ACTUAL,
                actual: section.table_id,
            });
        }
        let mut data = section.payload.clone();
        if data.remaining() < 3 {
            return Err(TsError::MalformedSection("SDT payload too short"));
        }
        let original_network_id = u16::from_be_bytes([data[0], data[1]]);
        data.advance(3); // original_network_id + reserved_future_use

        let mut services = Vec::new();
        while data.remaining() >= 5 {
            let service_id = u16::from_be_bytes([data[0], data[1]]);
            let eit_schedule_flag = (data[2] & 0x02) != 0;
            let eit_present_following_flag = (data[2] & 0x01) != 0;
            let running_status = (data[3] >> 5) & 0x07;
            let free_ca_mode = (data[3] & 0x10) != 0;
            let loop_length = (((data[3] & 0x0F) as usize) << 8) | data[4] as usize;
            data.advance(5);
            if data.remaining() < loop_length {
                return Err(TsError::MalformedSection("SDT descriptors_loop_length overruns payload"));
            }
            let descriptors: Bytes = data.split_to(loop_length);

            let mut service_type = 0;
            let mut service_name = String::new();
            let mut logo_id = None;
            for d in DescriptorIterator::new(descriptors) {
                match d.tag {
                    TAG_SERVICE => {
                        if let Some(sd) = descriptor::parse_service_descriptor(&d.data) {
                            service_type = sd.service_type;
                            service_name = sd.service_name;
                        }
                    }
                    TAG_LOGO_TRANSMISSION => {
                        logo_id = descriptor::parse_logo_id(&d.data);
                    }
                    _ => {}
                }
            }

            services.push(SdtService {
                service_id,
                eit_schedule_flag,
                eit_present_following_flag,
                running_status,
                free_ca_mode,
                service_type,
                service_name,
                logo_id,
            });
        }

        Ok(Sdt {
            transport_stream_id: section.table_id_extension,
            original_network_id,
            version_number: section.version_number,
            services,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_sdt_section(nid: u16, tsid: u16, services: &[(u16, u8, &str)]) -> RawSection {
        build_sdt_section_with_logo(nid, tsid, services, None)
    }

    fn build_sdt_section_with_logo(
        nid: u16,
        tsid: u16,
        services: &[(u16, u8, &str)],
        logo: Option<(u8, u16)>,
    ) -> RawSection {
        let mut payload = Vec::new();
        payload.extend_from_slice(&nid.to_be_bytes());
        payload.push(0xFF); // reserved

        for (sid, stype, name) in services {
            payload.extend_from_slice(&sid.to_be_bytes());
            payload.push(0xFC); // reserved(6)=111111, eit_schedule=0, eit_pf=0
            let mut desc = Vec::new();
            desc.push(*stype);
            desc.push(0); // provider name length
            desc.push(name.len() as u8);
            desc.extend_from_slice(name.as_bytes());
            let mut entry_tail = Vec::new();
            entry_tail.push(TAG_SERVICE);
            entry_tail.push(desc.len() as u8);
            entry_tail.extend_from_slice(&desc);
            if let Some((logo_transmission_type, logo_id)) = logo {
                entry_tail.push(descriptor::TAG_LOGO_TRANSMISSION);
                entry_tail.push(5);
                entry_tail.push(logo_transmission_type);
                entry_tail.extend_from_slice(&0u16.to_be_bytes());
                entry_tail.extend_from_slice(&logo_id.to_be_bytes());
            }
            payload.push(0x80 | (((entry_tail.len() >> 8) & 0x0F) as u8));
            payload.push(entry_tail.len() as u8);
            payload.extend_from_slice(&entry_tail);
        }

        RawSection {
            table_id: TABLE_ID_SDT_ACTUAL,
            table_id_extension: tsid,
            version_number: 0,
            current_next_indicator: true,
            section_number: 0,
            last_section_number: 0,
            payload: payload.into(),
            pid: 0x0011,
        }
    }

    #[test]
    fn test_parse_sdt() {
        let section = build_sdt_section(0x7FE1, 0x1234, &[(101, 0x01, "Test TV")]);
        let sdt = Sdt::parse(&section).unwrap();
        assert_eq!(sdt.original_network_id, 0x7FE1);
        assert_eq!(sdt.transport_stream_id, 0x1234);
        assert_eq!(sdt.services.len(), 1);
        assert_eq!(sdt.services[0].service_id, 101);
        assert_eq!(sdt.services[0].service_type, 0x01);
        assert_eq!(sdt.services[0].service_name, "Test TV");
        assert_eq!(sdt.services[0].logo_id, None);
    }

    #[test]
    fn test_trusted_logo_transmission_type_yields_logo_id() {
        let section = build_sdt_section_with_logo(1, 1, &[(101, 0x01, "Test TV")], Some((1, 0x0042)));
        let sdt = Sdt::parse(&section).unwrap();
        assert_eq!(sdt.services[0].logo_id, Some(0x0042));
    }

    #[test]
    fn test_untrusted_logo_transmission_type_is_ignored() {
        let section = build_sdt_section_with_logo(1, 1, &[(101, 0x01, "Test TV")], Some((3, 0x0042)));
        let sdt = Sdt::parse(&section).unwrap();
        assert_eq!(sdt.services[0].logo_id, None);
    }

    #[test]
    fn test_wrong_table_id() {
        let mut section = build_sdt_section(1, 1, &[(1, 1, "x")]);
        section.table_id = 0x02;
        assert!(Sdt::parse(&section).is_err());
    }
}
