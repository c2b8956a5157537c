use bytes::{Buf, Bytes};

/// Registration descriptor (tag 0x05)
pub const TAG_REGISTRATION: u8 = 0x05;
/// ISO 639 language descriptor (tag 0x0A)
pub const TAG_ISO_639_LANGUAGE: u8 = 0x0A;
/// AC-3 audio descriptor (tag 0x6A)
pub const TAG_AC3: u8 = 0x6A;
/// Enhanced AC-3 audio descriptor (tag 0x7A)
pub const TAG_EAC3: u8 = 0x7A;
/// DTS audio descriptor (tag 0x7B)
pub const TAG_DTS: u8 = 0x7B;
/// AAC audio descriptor (tag 0x7C)
pub const TAG_AAC: u8 = 0x7C;
/// Subtitling descriptor (tag 0x59)
pub const TAG_SUBTITLING: u8 = 0x59;
/// CA descriptor (tag 0x09), used in CAT (EMM PIDs) and PMT (ECM PIDs)
pub const TAG_CA: u8 = 0x09;
/// Stream identifier descriptor (tag 0x52), carries the elementary
/// stream's `component_tag`
pub const TAG_STREAM_IDENTIFIER: u8 = 0x52;
/// Service descriptor (tag 0x48), used in SDT
pub const TAG_SERVICE: u8 = 0x48;
/// Short event descriptor (tag 0x4D)
pub const TAG_SHORT_EVENT: u8 = 0x4D;
/// Extended event descriptor (tag 0x4E)
pub const TAG_EXTENDED_EVENT: u8 = 0x4E;
/// Component descriptor (tag 0x50)
pub const TAG_COMPONENT: u8 = 0x50;
/// Content descriptor (tag 0x54)
pub const TAG_CONTENT: u8 = 0x54;
/// ARIB audio component descriptor (tag 0xC4)
pub const TAG_AUDIO_COMPONENT: u8 = 0xC4;
/// ARIB TS information descriptor (tag 0xCD), carries `remote_control_key_id`
pub const TAG_TS_INFORMATION: u8 = 0xCD;
/// ARIB logo transmission descriptor (tag 0xCF)
pub const TAG_LOGO_TRANSMISSION: u8 = 0xCF;

/// Zero-copy descriptor reference.
#[derive(Debug, Clone)]
pub struct DescriptorRef {
    pub tag: u8,
    pub data: Bytes,
}

/// Iterator over descriptors in a TLV descriptor loop.
///
/// Each descriptor is `[tag: u8][length: u8][data: length bytes]`.
#[derive(Debug, Clone)]
pub struct DescriptorIterator {
    data: Bytes,
}

impl DescriptorIterator {
    /// Create a new descriptor iterator from a descriptor loop byte sequence.
    pub fn new(data: Bytes) -> Self {
        DescriptorIterator { data }
    }
}

impl Iterator for DescriptorIterator {
    type Item = DescriptorRef;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.remaining() < 2 {
            return None;
        }
        let tag = self.data[0];
        let length = self.data[1] as usize;
        self.data.advance(2);

        if self.data.remaining() < length {
            // Malformed descriptor â€” consume remaining and stop
            self.data.advance(self.data.remaining());
            return None;
        }

        let data = self.data.split_to(length);
        Some(DescriptorRef { tag, data })
    }
}

/// Parse a registration descriptor (tag 0x05).
///
/// Returns the 4-byte format_identifier if the descriptor data is at least 4 bytes.
pub fn parse_registration_descriptor(data: &[u8]) -> Option<[u8; 4]> {
    if data.len() < 4 {
        return None;
    }
    Some([data[0], data[1], data[2], data[3]])
}

/// A single ISO 639 language entry.
#[derive(Debug, Clone)]
pub struct LanguageEntry {
    /// 3-character ISO 639-2/T language code (e.g., b"eng", b"fra")
    pub language_code: [u8; 3],
    /// Audio type: 0=undefined, 1=clean effects, 2=hearing impaired, 3=visual impaired commentary
    pub audio_type: u8,
}

/// Parse ISO 639 language descriptor (tag 0x0A).
///
/// Returns a list of (language_code, audio_type) entries.
pub fn parse_iso639_language(data: &[u8]) -> Vec<LanguageEntry> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset + 4 <= data.len() {
        entries.push(LanguageEntry {
            language_code: [data[offset], data[offset + 1], data[offset + 2]],
            audio_type: data[offset + 3],
        });
        offset += 4;
    }
    entries
}

/// Parsed AC-3 audio descriptor.
#[derive(Debug, Clone)]
pub struct Ac3Descriptor {
    pub component_type_flag: bool,
    pub bsid_flag: bool,
    pub mainid_flag: bool,
    pub asvc_flag: bool,
    pub component_type: Option<u8>,
    pub bsid: Option<u8>,
    pub mainid: Option<u8>,
    pub asvc: Option<u8>,
}

/// Parse AC-3 descriptor (tag 0x6A).
pub fn parse_ac3_descriptor(data: &[u8]) -> Option<Ac3Descriptor> {
    if data.is_empty() {
        return None;
    }

    let flags = data[0];
    let component_type_flag = (flags & 0x80) != 0;
    let bsid_flag = (flags & 0x40) != 0;
    let mainid_flag = (flags & 0x20) != 0;
    let asvc_flag = (flags & 0x10) != 0;

    let mut offset = 1;

    let component_type = if component_type_flag && offset < data.len() {
        let val = data[offset];
        offset += 1;
        Some(val)
    } else {
        None
    };

    let bsid = if bsid_flag && offset < data.len() {
        let val = data[offset];
        offset += 1;
        Some(val)
    } else {
        None
    };

    let mainid = if mainid_flag && offset < data.len() {
        let val = data[offset];
        offset += 1;
        Some(val)
    } else {
        None
    };

    let asvc = if asvc_flag && offset < data.len() {
        let val = data[offset];
        Some(val)
    } else {
        None
    };

    Some(Ac3Descriptor {
        component_type_flag,
        bsid_flag,
        mainid_flag,
        asvc_flag,
        component_type,
        bsid,
        mainid,
        asvc,
    })
}

/// Parsed CA descriptor (tag 0x09): a CA system's EMM PID (in a CAT) or ECM
/// PID (in a PMT's program-level or elementary-stream-level descriptor loop).
#[derive(Debug, Clone)]
pub struct CaDescriptor {
    pub ca_system_id: u16,
    pub ca_pid: u16,
}

pub fn parse_ca_descriptor(data: &[u8]) -> Option<CaDescriptor> {
    if data.len() < 4 {
        return None;
    }
    Some(CaDescriptor {
        ca_system_id: u16::from_be_bytes([data[0], data[1]]),
        ca_pid: (((data[2] & 0x1F) as u16) << 8) | data[3] as u16,
    })
}

/// Parse a stream identifier descriptor (tag 0x52), returning the
/// elementary stream's `component_tag`.
pub fn parse_stream_identifier_descriptor(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

/// Parsed service descriptor (tag 0x48), as carried in SDT.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub service_type: u8,
    pub service_provider_name: String,
    pub service_name: String,
}

pub fn parse_service_descriptor(data: &[u8]) -> Option<ServiceDescriptor> {
    if data.is_empty() {
        return None;
    }
    let service_type = data[0];
    let mut offset = 1;
    let provider_len = *data.get(offset)? as usize;
    offset += 1;
    let provider = data.get(offset..offset + provider_len)?;
    offset += provider_len;
    let name_len = *data.get(offset)? as usize;
    offset += 1;
    let name = data.get(offset..offset + name_len)?;
    Some(ServiceDescriptor {
        service_type,
        service_provider_name: crate::aribstr::decode(provider),
        service_name: crate::aribstr::decode(name),
    })
}

/// Parsed short event descriptor (tag 0x4D).
#[derive(Debug, Clone)]
pub struct ShortEventDescriptor {
    pub language_code: [u8; 3],
    pub event_name: String,
    pub text: String,
}

pub fn parse_short_event_descriptor(data: &[u8]) -> Option<ShortEventDescriptor> {
    if data.len() < 4 {
        return None;
    }
    let language_code = [data[0], data[1], data[2]];
    let mut offset = 3;
    let name_len = *data.get(offset)? as usize;
    offset += 1;
    let name = data.get(offset..offset + name_len)?;
    offset += name_len;
    let text_len = *data.get(offset)? as usize;
    offset += 1;
    let text = data.get(offset..offset + text_len)?;
    Some(ShortEventDescriptor {
        language_code,
        event_name: crate::aribstr::decode(name),
        text: crate::aribstr::decode(text),
    })
}

/// One `(item_description, item)` entry from an extended event descriptor,
/// pre-decode-concatenation (see [`concat_extended_event_fragments`]).
#[derive(Debug, Clone)]
pub struct ExtendedEventItem {
    pub item_description: Bytes,
    pub item: Bytes,
}

/// Parsed extended event descriptor (tag 0x4E), one fragment. A single
/// event's extended-event text is commonly split across multiple
/// descriptor instances sharing the same `descriptor_number` sequence up to
/// `last_descriptor_number`; raw item bytes are kept undecoded here so
/// fragments split mid-item can be concatenated before ARIB string decode
/// (see [`concat_extended_event_fragments`]).
#[derive(Debug, Clone)]
pub struct ExtendedEventDescriptor {
    pub descriptor_number: u8,
    pub last_descriptor_number: u8,
    pub language_code: [u8; 3],
    pub items: Vec<ExtendedEventItem>,
}

pub fn parse_extended_event_descriptor(data: &[u8]) -> Option<ExtendedEventDescriptor> {
    if data.len() < 5 {
        return None;
    }
    let descriptor_number = data[0] >> 4;
    let last_descriptor_number = data[0] & 0x0F;
    let language_code = [data[1], data[2], data[3]];
    let mut offset = 4;
    let items_len = *data.get(offset)? as usize;
    offset += 1;
    let items_end = offset + items_len;
    let mut items = Vec::new();
    while offset < items_end {
        let desc_len = *data.get(offset)? as usize;
        offset += 1;
        let item_description = Bytes::copy_from_slice(data.get(offset..offset + desc_len)?);
        offset += desc_len;
        let item_len = *data.get(offset)? as usize;
        offset += 1;
        let item = Bytes::copy_from_slice(data.get(offset..offset + item_len)?);
        offset += item_len;
        items.push(ExtendedEventItem { item_description, item });
    }
    Some(ExtendedEventDescriptor {
        descriptor_number,
        last_descriptor_number,
        language_code,
        items,
    })
}

/// Concatenate raw item bytes across a run of extended event descriptor
/// fragments (ordered by `descriptor_number`) before ARIB string decode, per
/// the wire schema's `ExtendedEvent` note that repeated fragments must be
/// joined first. An empty `item_description` continues the previous item.
pub fn concat_extended_event_fragments(
    fragments: &[ExtendedEventDescriptor],
) -> Vec<(String, String)> {
    let mut sorted: Vec<&ExtendedEventDescriptor> = fragments.iter().collect();
    sorted.sort_by_key(|f| f.descriptor_number);

    let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    for frag in sorted {
        for item in &frag.items {
            if item.item_description.is_empty() && !out.is_empty() {
                out.last_mut().unwrap().1.extend_from_slice(&item.item);
            } else {
                out.push((item.item_description.to_vec(), item.item.to_vec()));
            }
        }
    }
    out.into_iter()
        .map(|(desc, item)| (crate::aribstr::decode(&desc), crate::aribstr::decode(&item)))
        .collect()
}

/// Parsed component descriptor (tag 0x50).
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    pub stream_content: u8,
    pub component_type: u8,
    pub component_tag: u8,
    pub language_code: [u8; 3],
    pub text: String,
}

pub fn parse_component_descriptor(data: &[u8]) -> Option<ComponentDescriptor> {
    if data.len() < 6 {
        return None;
    }
    Some(ComponentDescriptor {
        stream_content: data[0] & 0x0F,
        component_type: data[1],
        component_tag: data[2],
        language_code: [data[3], data[4], data[5]],
        text: crate::aribstr::decode(&data[6..]),
    })
}

/// Parsed content descriptor (tag 0x54): a list of
/// `(content_nibble_level_1, content_nibble_level_2, user_nibble_1, user_nibble_2)`.
#[derive(Debug, Clone)]
pub struct ContentDescriptor {
    pub nibbles: Vec<(u8, u8, u8, u8)>,
}

pub fn parse_content_descriptor(data: &[u8]) -> Option<ContentDescriptor> {
    let mut nibbles = Vec::new();
    for chunk in data.chunks_exact(2) {
        nibbles.push((chunk[0] >> 4, chunk[0] & 0x0F, chunk[1] >> 4, chunk[1] & 0x0F));
    }
    Some(ContentDescriptor { nibbles })
}

/// Parsed ARIB audio component descriptor (tag 0xC4).
#[derive(Debug, Clone)]
pub struct AudioComponentDescriptor {
    pub stream_content: u8,
    pub component_type: u8,
    pub component_tag: u8,
    pub stream_type: u8,
    pub sampling_rate: u8,
    pub language_code: [u8; 3],
}

pub fn parse_audio_component_descriptor(data: &[u8]) -> Option<AudioComponentDescriptor> {
    if data.len() < 9 {
        return None;
    }
    Some(AudioComponentDescriptor {
        stream_content: data[0] & 0x0F,
        component_type: data[1],
        component_tag: data[2],
        stream_type: data[3],
        sampling_rate: (data[5] >> 4) & 0x07,
        language_code: [data[6], data[7], data[8]],
    })
}

/// Parsed ARIB TS information descriptor (tag 0xCD); only the leading
/// `remote_control_key_id` field is needed.
pub fn parse_ts_information_remote_control_key_id(data: &[u8]) -> Option<u8> {
    data.first().map(|b| b >> 2)
}

/// Parsed ARIB logo transmission descriptor (tag 0xCF). Only
/// `logo_transmission_type` 0x01 (full form, carrying the owning
/// network/TS/service triple) and 0x02 (the short "same logo as" form) carry
/// a trustworthy `logo_id`; type 0x03 (inline character data) and anything
/// else return `None`, matching `service_scanner.hh`'s
/// `logo_transmission_type ∈ {1,2}` trust condition.
pub fn parse_logo_id(data: &[u8]) -> Option<u16> {
    match data.first()? {
        0x01 => {
            if data.len() < 5 {
                return None;
            }
            Some(u16::from_be_bytes([data[3], data[4]]) & 0x01FF)
        }
        0x02 => {
            if data.len() < 3 {
                return None;
            }
            Some(u16::from_be_bytes([data[1], data[2]]) & 0x01FF)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_iterator_empty() {
        let iter = DescriptorIterator::new(Bytes::new());
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn test_descriptor_iterator_single() {
        // One descriptor: tag=0x05, length=4, data="CUEI"
        let data = Bytes::from_static(&[0x05, 0x04, b'C', b'U', b'E', b'I']);
        let descriptors: Vec<_> = DescriptorIterator::new(data).collect();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].tag, TAG_REGISTRATION);
        assert_eq!(&descriptors[0].data[..], b"CUEI");
    }

    #[test]
    fn test_descriptor_iterator_multiple() {
        let mut data = Vec::new();
        // Registration descriptor
        data.extend_from_slice(&[0x05, 0x04, b'C', b'U', b'E', b'I']);
        // ISO 639 language descriptor
        data.extend_from_slice(&[0x0A, 0x04, b'e', b'n', b'g', 0x00]);
        let descriptors: Vec<_> = DescriptorIterator::new(Bytes::from(data)).collect();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].tag, TAG_REGISTRATION);
        assert_eq!(descriptors[1].tag, TAG_ISO_639_LANGUAGE);
    }

    #[test]
    fn test_descriptor_iterator_malformed() {
        // Tag + length that exceeds remaining data
        let data = Bytes::from_static(&[0x05, 0xFF]);
        let descriptors: Vec<_> = DescriptorIterator::new(data).collect();
        assert_eq!(descriptors.len(), 0);
    }

    #[test]
    fn test_parse_registration_descriptor() {
        let data = b"CUEI";
        let id = parse_registration_descriptor(data).unwrap();
        assert_eq!(&id, b"CUEI");
    }

    #[test]
    fn test_parse_registration_descriptor_too_short() {
        assert!(parse_registration_descriptor(&[0x01, 0x02]).is_none());
    }

    #[test]
    fn test_parse_iso639_language() {
        let data = [b'e', b'n', b'g', 0x00, b'f', b'r', b'a', 0x01];
        let entries = parse_iso639_language(&data);
        assert_eq!(entries.len(), 2);
        assert_eq!(&entries[0].language_code, b"eng");
        assert_eq!(entries[0].audio_type, 0);
        assert_eq!(&entries[1].language_code, b"fra");
        assert_eq!(entries[1].audio_type, 1);
    }

    #[test]
    fn test_parse_iso639_language_empty() {
        let entries = parse_iso639_language(&[]);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_parse_ac3_descriptor() {
        // flags: component_type=1, bsid=1, mainid=0, asvc=0
        // component_type=0x48, bsid=0x08
        let data = [0xC0, 0x48, 0x08];
        let desc = parse_ac3_descriptor(&data).unwrap();
        assert!(desc.component_type_flag);
        assert!(desc.bsid_flag);
        assert!(!desc.mainid_flag);
        assert!(!desc.asvc_flag);
        assert_eq!(desc.component_type, Some(0x48));
        assert_eq!(desc.bsid, Some(0x08));
        assert!(desc.mainid.is_none());
        assert!(desc.asvc.is_none());
    }

    #[test]
    fn test_parse_ac3_descriptor_empty() {
        assert!(parse_ac3_descriptor(&[]).is_none());
    }
}
