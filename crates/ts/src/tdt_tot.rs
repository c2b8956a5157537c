//! Time and Date Table (TDT) / Time Offset Table (TOT). Both carry a JST
//! wall-clock reference used by `sync-clocks`.

use chrono::NaiveDateTime;

use crate::error::TsError;
use crate::section::RawSection;
use crate::time::decode_start_time;

pub const TABLE_ID_TDT: u8 = 0x70;
pub const TABLE_ID_TOT: u8 = 0x73;

#[derive(Debug, Clone)]
pub struct Tdt {
    pub jst_time: NaiveDateTime,
}

impl Tdt {
    pub fn parse(section: &RawSection) -> crate::Result<Self> {
        if section.table_id != TABLE_ID_TDT {
            return Err(TsError::UnexpectedTableId {
                expected: TABLE_ID_TDT,
                actual: section.table_id,
            });
        }
        parse_utc_time(&section.payload).map(|jst_time| Tdt { jst_time })
    }
}

#[derive(Debug, Clone)]
pub struct Tot {
    pub jst_time: NaiveDateTime,
}

impl Tot {
    pub fn parse(section: &RawSection) -> crate::Result<Self> {
        if section.table_id != TABLE_ID_TOT {
            return Err(TsError::UnexpectedTableId {
                expected: TABLE_ID_TOT,
                actual: section.table_id,
            });
        }
        parse_utc_time(&section.payload).map(|jst_time| Tot { jst_time })
    }
}

fn parse_utc_time(payload: &[u8]) -> crate::Result<NaiveDateTime> {
    if payload.len() < 5 {
        return Err(TsError::MalformedSection("TDT/TOT payload too short"));
    }
    let mut buf = [0u8; 5];
    buf.copy_from_slice(&payload[..5]);
    decode_start_time(&buf).ok_or(TsError::MalformedSection("TDT/TOT time field undecodable"))
}
