//! ARIB/DVB wire time decoding: Modified Julian Date + BCD time, and the
//! JST → Unix-time-ms conversion performed at every JSON boundary.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

/// JST is UTC+9, with no daylight-saving rules.
pub const JST_OFFSET_MS: i64 = 9 * 3600 * 1000;

fn bcd_to_decimal(byte: u8) -> u32 {
    ((byte >> 4) as u32) * 10 + (byte & 0x0F) as u32
}

/// Decode a 16-bit Modified Julian Date into a `NaiveDate`, using the
/// standard ETSI EN 300 468 Annex C algorithm.
pub fn decode_mjd(mjd: u16) -> Option<NaiveDate> {
    let mjd = mjd as f64;
    let yy = ((mjd - 15078.2) / 365.25) as i64;
    let mm = ((mjd - 14956.1 - (yy as f64 * 365.25) as i64 as f64) / 30.6001) as i64;
    let day = mjd as i64 - 14956 - (yy as f64 * 365.25) as i64 - (mm as f64 * 30.6001) as i64;
    let k = if mm == 14 || mm == 15 { 1 } else { 0 };
    let year = yy + k + 1900;
    let month = mm - 1 - k * 12;
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
}

/// Decode a 40-bit ARIB `start_time` field (16-bit MJD + 3 BCD bytes for
/// hour/minute/second) into a naive JST datetime. Returns `None` if the
/// date/time is malformed (e.g. all-0xFF "undefined").
pub fn decode_start_time(data: &[u8; 5]) -> Option<NaiveDateTime> {
    let mjd = u16::from_be_bytes([data[0], data[1]]);
    let date = decode_mjd(mjd)?;
    let hour = bcd_to_decimal(data[2]);
    let minute = bcd_to_decimal(data[3]);
    let second = bcd_to_decimal(data[4]);
    date.and_hms_opt(hour, minute, second)
}

/// Decode a 24-bit BCD duration (hour/minute/second) into milliseconds.
/// An all-0xFF duration means "undefined" and decodes to `None`.
pub fn decode_duration_ms(data: &[u8; 3]) -> Option<i64> {
    if data[0] == 0xFF && data[1] == 0xFF && data[2] == 0xFF {
        return None;
    }
    let hour = bcd_to_decimal(data[0]) as i64;
    let minute = bcd_to_decimal(data[1]) as i64;
    let second = bcd_to_decimal(data[2]) as i64;
    Some(((hour * 3600) + (minute * 60) + second) * 1000)
}

/// Convert a naive JST datetime to Unix time in milliseconds (subtracting
/// the 9-hour JST offset at the JSON boundary, as spec'd).
pub fn jst_to_unix_ms(jst: NaiveDateTime) -> i64 {
    jst.and_utc().timestamp_millis() - JST_OFFSET_MS
}

/// Convert Unix time in milliseconds back to a naive JST datetime (inverse
/// of [`jst_to_unix_ms`], used when a configured `--clock-time`/`--wait-until`
/// unix-ms CLI option must be compared against wire JST times).
pub fn unix_ms_to_jst(unix_ms: i64) -> Option<NaiveDateTime> {
    let total = unix_ms + JST_OFFSET_MS;
    chrono::DateTime::from_timestamp_millis(total).map(|dt| dt.naive_utc())
}

/// Add milliseconds to a naive JST datetime.
pub fn add_ms(t: NaiveDateTime, ms: i64) -> NaiveDateTime {
    t + TimeDelta::milliseconds(ms)
}
