//! Network Information Table (NIT). Carries the per-transport-stream
//! `remote_control_key_id` used by `scan-services`.

use bytes::{Buf, Bytes};

use crate::descriptor::{self, DescriptorIterator, TAG_TS_INFORMATION};
use crate::error::TsError;
use crate::section::RawSection;

pub const TABLE_ID_NIT_ACTUAL: u8 = 0x40;
pub const TABLE_ID_NIT_OTHER: u8 = 0x41;

#[derive(Debug, Clone)]
pub struct NitTransport {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub remote_control_key_id: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct Nit {
    pub network_id: u16,
    pub version_number: u8,
    pub transports: Vec<NitTransport>,
}

impl Nit {
    pub fn parse(section: &RawSection) -> crate::Result<Self> {
        if section.table_id != TABLE_ID_NIT_ACTUAL && section.table_id != TABLE_ID_NIT_OTHER {
            return Err(TsError::UnexpectedTableId {
                expected: TABLE_ID_NIT_ACTUAL,
                actual: section.table_id,
            });
        }
        let mut data = section.payload.clone();
        if data.remaining() < 2 {
            return Err(TsError::MalformedSection("NIT payload too short"));
        }
        let network_descriptors_length = (((data[0] & 0x0F) as usize) << 8) | data[1] as usize;
        data.advance(2);
        if data.remaining() < network_descriptors_length {
            return Err(TsError::MalformedSection("NIT network_descriptors_length overruns payload"));
        }
        data.advance(network_descriptors_length); // network-level descriptors are not needed downstream

        if data.remaining() < 2 {
            return Err(TsError::MalformedSection("NIT missing transport_stream_loop_length"));
        }
        let transport_stream_loop_length = (((data[0] & 0x0F) as usize) << 8) | data[1] as usize;
        data.advance(2);
        if data.remaining() < transport_stream_loop_length {
            return Err(TsError::MalformedSection("NIT transport_stream_loop_length overruns payload"));
        }
        let mut loop_data = data.split_to(transport_stream_loop_length);

        let mut transports = Vec::new();
        while loop_data.remaining() >= 6 {
            let transport_stream_id = u16::from_be_bytes([loop_data[0], loop_data[1]]);
            let original_network_id = u16::from_be_bytes([loop_data[2], loop_data[3]]);
            let descriptors_length = (((loop_data[4] & 0x0F) as usize) << 8) | loop_data[5] as usize;
            loop_data.advance(6);
            if loop_data.remaining() < descriptors_length {
                return Err(TsError::MalformedSection("NIT transport_descriptors_length overruns payload"));
            }
            let descriptors: Bytes = loop_data.split_to(descriptors_length);

            let mut remote_control_key_id = None;
            for d in DescriptorIterator::new(descriptors) {
                if d.tag == TAG_TS_INFORMATION {
                    remote_control_key_id = descriptor::parse_ts_information_remote_control_key_id(&d.data);
                }
            }

            transports.push(NitTransport {
                transport_stream_id,
                original_network_id,
                remote_control_key_id,
            });
        }

        Ok(Nit {
            network_id: section.table_id_extension,
            version_number: section.version_number,
            transports,
        })
    }
}
