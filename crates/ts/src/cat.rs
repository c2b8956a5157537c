//! Conditional Access Table (CAT). Carries the EMM (Entitlement Management
//! Message) PIDs for every CA system in use, one per CA descriptor.

use crate::descriptor::{self, DescriptorIterator, TAG_CA};
use crate::error::TsError;
use crate::section::RawSection;

pub const TABLE_ID_CAT: u8 = 0x01;

#[derive(Debug, Clone)]
pub struct Cat {
    pub version_number: u8,
    pub emm_pids: Vec<u16>,
}

impl Cat {
    pub fn parse(section: &RawSection) -> crate::Result<Self> {
        if section.table_id != TABLE_ID_CAT {
            return Err(TsError::UnexpectedTableId {
                expected: TABLE_ID_CAT,
                actual: section.table_id,
            });
        }
        let emm_pids = DescriptorIterator::new(section.payload.clone())
            .filter(|d| d.tag == TAG_CA)
            .filter_map(|d| descriptor::parse_ca_descriptor(&d.data))
            .map(|ca| ca.ca_pid)
            .collect();
        Ok(Cat {
            version_number: section.version_number,
            emm_pids,
        })
    }
}
