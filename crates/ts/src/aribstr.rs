//! Decoding of ARIB STD-B24 8-bit character strings (event names, service
//! names, extended event text, …) into UTF-8.
//!
//! ARIB text is an ISO/IEC 2022 code extension: escape sequences designate
//! which of several code sets (2-byte Kanji, 1-byte Alphanumeric, 1-byte
//! Hiragana, 1-byte Katakana, …) occupies the graphic code area, and bytes
//! are then interpreted against whichever set is current. This module
//! tracks that designation and decodes the common broadcast sets — Kanji
//! (JIS X 0208), Alphanumeric (ASCII-compatible), Hiragana and Katakana
//! (JIS X 0208 rows 4 and 5). Mosaic graphics, DRCS (downloadable custom
//! glyphs), and macro code sets are not broadcast station program-metadata
//! content and are skipped rather than decoded.
//!
//! The Kanji/Hiragana/Katakana sets are converted to Shift_JIS code points
//! and handed to `encoding_rs`, since this crate does not carry its own
//! JIS X 0208 → Unicode table.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeSet {
    Kanji,
    Alphanumeric,
    Hiragana,
    Katakana,
}

/// Decode an ARIB 8-bit character string into UTF-8, lossily.
pub fn decode(data: &[u8]) -> String {
    let mut out = String::new();
    let mut set = CodeSet::Kanji; // ARIB default invocation.
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        match b {
            0x1B => {
                let (new_set, consumed) = parse_escape(&data[i + 1..]);
                if let Some(new_set) = new_set {
                    set = new_set;
                }
                i += 1 + consumed;
            }
            0x00..=0x20 | 0x7F..=0xA0 => {
                // C0/C1 control codes and space; newlines occasionally appear
                // mid-text (e.g. extended event items) and are preserved.
                if b == 0x0A || b == 0x0D {
                    out.push('\n');
                } else if b == 0x20 {
                    out.push(' ');
                }
                i += 1;
            }
            _ => match set {
                CodeSet::Alphanumeric => {
                    out.push(b as char);
                    i += 1;
                }
                CodeSet::Kanji => {
                    if i + 1 >= data.len() {
                        break;
                    }
                    if let Some(ch) = decode_jis_pair(b, data[i + 1]) {
                        out.push(ch);
                    }
                    i += 2;
                }
                CodeSet::Hiragana => {
                    if let Some(ch) = decode_jis_pair(0x24, b) {
                        out.push(ch);
                    }
                    i += 1;
                }
                CodeSet::Katakana => {
                    if let Some(ch) = decode_jis_pair(0x25, b) {
                        out.push(ch);
                    }
                    i += 1;
                }
            },
        }
    }
    out
}

/// Parse the bytes following an ESC (0x1B); returns the designated code set
/// (if recognized) and how many bytes after ESC were consumed.
fn parse_escape(rest: &[u8]) -> (Option<CodeSet>, usize) {
    match rest.first() {
        Some(0x24) => match rest.get(1) {
            Some(0x42) | Some(0x40) => (Some(CodeSet::Kanji), 2),
            Some(0x28) => (Some(CodeSet::Kanji), 3), // ESC $ ( F -- extended Kanji plane
            _ => (None, 1),
        },
        Some(0x28) => match rest.get(1) {
            Some(0x4A) | Some(0x42) => (Some(CodeSet::Alphanumeric), 2),
            Some(0x39) => (Some(CodeSet::Hiragana), 2),
            Some(0x3A) => (Some(CodeSet::Katakana), 2),
            Some(0x49) => (Some(CodeSet::Katakana), 2),
            Some(0x20) => (None, 3), // DRCS designation, drawing set byte follows
            _ => (None, 2),
        },
        Some(_) => (None, 1),
        None => (None, 0),
    }
}

/// Convert a JIS X 0208 row/cell pair (each 0x21..=0x7E) to Shift_JIS bytes
/// and decode the resulting single character.
fn decode_jis_pair(row: u8, col: u8) -> Option<char> {
    if !(0x21..=0x7E).contains(&row) || !(0x21..=0x7E).contains(&col) {
        return None;
    }
    let (lead, trail) = jis0208_to_sjis(row, col);
    let (cow, _, had_errors) = encoding_rs::SHIFT_JIS.decode(&[lead, trail]);
    if had_errors {
        return None;
    }
    cow.chars().next()
}

fn jis0208_to_sjis(c1: u8, c2: u8) -> (u8, u8) {
    let mut lead: i32 = c1 as i32;
    let mut trail: i32 = c2 as i32;
    if lead & 1 == 1 {
        trail += 0x1F;
        if trail >= 0x7F {
            trail += 1;
        }
    } else {
        trail += 0x7E;
    }
    lead = ((lead - 0x21) >> 1) + if lead < 0x5F { 0x81 } else { 0xC1 };
    (lead as u8, trail as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_ascii_in_alphanumeric_mode() {
        // ESC ( J switches to Alphanumeric, then "NHK".
        let mut data = vec![0x1B, 0x28, 0x4A];
        data.extend_from_slice(b"NHK");
        assert_eq!(decode(&data), "NHK");
    }

    #[test]
    fn test_decode_kanji_pair() {
        // Row/col for U+65E5 ("日") in JIS X 0208 is ku=17,ten=54 -> bytes (0x31,0x56).
        let data = vec![0x1B, 0x24, 0x42, 0x31, 0x56];
        assert_eq!(decode(&data), "\u{65e5}");
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(decode(&[]), "");
    }

    #[test]
    fn test_decode_truncated_kanji_pair_ignored() {
        let data = vec![0x1B, 0x24, 0x42, 0x31];
        assert_eq!(decode(&data), "");
    }
}
