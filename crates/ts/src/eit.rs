//! Event Information Table (EIT): present/following (table_id 0x4E/0x4F)
//! and schedule (table_id 0x50-0x5F) forms share this payload shape, and
//! differ only in which sections the sub-table's numbering scheme picks
//! out — see `table_index`/`is_basic_table`, used by the schedule
//! collector's per-table progress bitmap.

use bytes::{Buf, Bytes};
use chrono::NaiveDateTime;

use crate::descriptor::{
    self, DescriptorIterator, ExtendedEventDescriptor, TAG_AUDIO_COMPONENT, TAG_COMPONENT, TAG_CONTENT,
    TAG_EXTENDED_EVENT, TAG_SHORT_EVENT,
};
use crate::error::TsError;
use crate::section::RawSection;
use crate::time::{decode_duration_ms, decode_start_time};

pub const TABLE_ID_EIT_PF_ACTUAL: u8 = 0x4E;
pub const TABLE_ID_EIT_PF_OTHER: u8 = 0x4F;
pub const TABLE_ID_EIT_SCHEDULE_ACTUAL_FIRST: u8 = 0x50;
pub const TABLE_ID_EIT_SCHEDULE_ACTUAL_LAST: u8 = 0x57;
pub const TABLE_ID_EIT_SCHEDULE_OTHER_FIRST: u8 = 0x58;
pub const TABLE_ID_EIT_SCHEDULE_OTHER_LAST: u8 = 0x5F;

pub fn is_eit_table_id(table_id: u8) -> bool {
    table_id == TABLE_ID_EIT_PF_ACTUAL
        || table_id == TABLE_ID_EIT_PF_OTHER
        || (TABLE_ID_EIT_SCHEDULE_ACTUAL_FIRST..=TABLE_ID_EIT_SCHEDULE_OTHER_LAST).contains(&table_id)
}

pub fn is_schedule_table_id(table_id: u8) -> bool {
    (TABLE_ID_EIT_SCHEDULE_ACTUAL_FIRST..=TABLE_ID_EIT_SCHEDULE_OTHER_LAST).contains(&table_id)
}

/// The low 4 bits of `table_id` select one of 16 schedule sub-tables
/// (0..15); bit 3 distinguishes basic (0-7) from extra (8-15) sections
/// within the 32 segments a sub-table's `section_number` addresses.
pub fn schedule_sub_table(table_id: u8) -> u8 {
    table_id & 0x0F
}

/// Index (0..8) of the per-table progress bitmap a schedule section
/// belongs to within its basic/extra `TableGroupProgress`.
pub fn table_index(table_id: u8) -> usize {
    (table_id & 0x07) as usize
}

/// True when `table_id` is one of the 8 "basic" schedule sub-tables
/// (today and the next 3 days); false for the 8 "extra" sub-tables.
pub fn is_basic_table(table_id: u8) -> bool {
    (table_id & 0x0F) < 8
}

#[derive(Debug, Clone)]
pub enum EitDescriptor {
    ShortEvent { event_name: String, text: String },
    Component { stream_content: u8, component_type: u8 },
    Content { nibbles: Vec<(u8, u8, u8, u8)> },
    AudioComponent { component_type: u8, sampling_rate: u8 },
    ExtendedEvent { items: Vec<(String, String)> },
}

#[derive(Debug, Clone)]
pub struct EitEvent {
    pub event_id: u16,
    pub start_time: Option<NaiveDateTime>,
    pub duration_ms: Option<i64>,
    pub running_status: u8,
    pub scrambled: bool,
    pub descriptors: Vec<EitDescriptor>,
}

#[derive(Debug, Clone)]
pub struct Eit {
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub table_id: u8,
    pub section_number: u8,
    pub last_section_number: u8,
    pub segment_last_section_number: u8,
    pub last_table_id: u8,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub events: Vec<EitEvent>,
}

impl Eit {
    /// Serializes this section's events to the wire JSON schema shared by
    /// `collect-eits`, `collect-eitpf` and `collect-program-metadata` —
    /// `service_recorder.hh`'s event-update messages reuse the same
    /// per-event shape, which is why this lives on `Eit` rather than in any
    /// one collector.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "originalNetworkId": self.original_network_id,
            "transportStreamId": self.transport_stream_id,
            "serviceId": self.service_id,
            "tableId": self.table_id,
            "sectionNumber": self.section_number,
            "lastSectionNumber": self.last_section_number,
            "segmentLastSectionNumber": self.segment_last_section_number,
            "versionNumber": self.version_number,
            "events": events_to_json(&self.events),
        })
    }

    pub fn parse(section: &RawSection) -> crate::Result<Self> {
        if !is_eit_table_id(section.table_id) {
            return Err(TsError::UnexpectedTableId {
                expected: TABLE_ID_EIT_PF_ACTUAL,
                actual: section.table_id,
            });
        }
        let mut data = section.payload.clone();
        if data.remaining() < 6 {
            return Err(TsError::MalformedSection("EIT payload too short"));
        }
        let transport_stream_id = u16::from_be_bytes([data[0], data[1]]);
        let original_network_id = u16::from_be_bytes([data[2], data[3]]);
        let segment_last_section_number = data[4];
        let last_table_id = data[5];
        data.advance(6);

        let mut events = Vec::new();
        while data.remaining() >= 12 {
            let event_id = u16::from_be_bytes([data[0], data[1]]);
            let mut time_field = [0u8; 5];
            time_field.copy_from_slice(&data[2..7]);
            let start_time = decode_start_time(&time_field);
            let mut dur_field = [0u8; 3];
            dur_field.copy_from_slice(&data[7..10]);
            let duration_ms = decode_duration_ms(&dur_field);
            let running_status = (data[10] >> 5) & 0x07;
            let scrambled = (data[10] & 0x10) != 0;
            let descriptors_loop_length = (((data[10] & 0x0F) as usize) << 8) | data[11] as usize;
            data.advance(12);
            if data.remaining() < descriptors_loop_length {
                return Err(TsError::MalformedSection("EIT descriptors_loop_length overruns payload"));
            }
            let raw_descriptors: Bytes = data.split_to(descriptors_loop_length);
            let descriptors = parse_event_descriptors(raw_descriptors);

            events.push(EitEvent {
                event_id,
                start_time,
                duration_ms,
                running_status,
                scrambled,
                descriptors,
            });
        }

        Ok(Eit {
            service_id: section.table_id_extension,
            transport_stream_id,
            original_network_id,
            table_id: section.table_id,
            section_number: section.section_number,
            last_section_number: section.last_section_number,
            segment_last_section_number,
            last_table_id,
            version_number: section.version_number,
            current_next_indicator: section.current_next_indicator,
            events,
        })
    }
}

/// Serializes a list of events to the JSON array shape used by every EIT
/// collector: each event carries its decoded start time as Unix milliseconds
/// (JST, per `crate::time::jst_to_unix_ms`), its duration, and its
/// descriptors tagged by `$type`.
pub fn events_to_json(events: &[EitEvent]) -> serde_json::Value {
    serde_json::Value::Array(events.iter().map(event_to_json).collect())
}

fn event_to_json(event: &EitEvent) -> serde_json::Value {
    serde_json::json!({
        "eventId": event.event_id,
        "startTime": event.start_time.map(crate::time::jst_to_unix_ms),
        "duration": event.duration_ms,
        "runningStatus": event.running_status,
        "scrambled": event.scrambled,
        "descriptors": event.descriptors.iter().map(descriptor_to_json).collect::<Vec<_>>(),
    })
}

fn descriptor_to_json(descriptor: &EitDescriptor) -> serde_json::Value {
    match descriptor {
        EitDescriptor::ShortEvent { event_name, text } => serde_json::json!({
            "$type": "ShortEvent",
            "eventName": event_name,
            "text": text,
        }),
        EitDescriptor::Component { stream_content, component_type } => serde_json::json!({
            "$type": "Component",
            "streamContent": stream_content,
            "componentType": component_type,
        }),
        EitDescriptor::Content { nibbles } => serde_json::json!({
            "$type": "Content",
            "nibbles": nibbles.iter().map(|(a, b, c, d)| serde_json::json!([a, b, c, d])).collect::<Vec<_>>(),
        }),
        EitDescriptor::AudioComponent { component_type, sampling_rate } => serde_json::json!({
            "$type": "AudioComponent",
            "componentType": component_type,
            "samplingRate": sampling_rate,
        }),
        EitDescriptor::ExtendedEvent { items } => serde_json::json!({
            "$type": "ExtendedEvent",
            "items": items.iter().map(|(d, i)| serde_json::json!([d, i])).collect::<Vec<_>>(),
        }),
    }
}

fn parse_event_descriptors(raw: Bytes) -> Vec<EitDescriptor> {
    let mut out = Vec::new();
    let mut extended_fragments: Vec<ExtendedEventDescriptor> = Vec::new();
    let mut extended_slot: Option<usize> = None;

    for d in DescriptorIterator::new(raw) {
        match d.tag {
            TAG_SHORT_EVENT => {
                if let Some(se) = descriptor::parse_short_event_descriptor(&d.data) {
                    out.push(EitDescriptor::ShortEvent {
                        event_name: se.event_name,
                        text: se.text,
                    });
                }
            }
            TAG_COMPONENT => {
                if let Some(c) = descriptor::parse_component_descriptor(&d.data) {
                    out.push(EitDescriptor::Component {
                        stream_content: c.stream_content,
                        component_type: c.component_type,
                    });
                }
            }
            TAG_CONTENT => {
                if let Some(c) = descriptor::parse_content_descriptor(&d.data) {
                    out.push(EitDescriptor::Content { nibbles: c.nibbles });
                }
            }
            TAG_AUDIO_COMPONENT => {
                if let Some(a) = descriptor::parse_audio_component_descriptor(&d.data) {
                    out.push(EitDescriptor::AudioComponent {
                        component_type: a.component_type,
                        sampling_rate: a.sampling_rate,
                    });
                }
            }
            TAG_EXTENDED_EVENT => {
                if let Some(e) = descriptor::parse_extended_event_descriptor(&d.data) {
                    if extended_slot.is_none() {
                        extended_slot = Some(out.len());
                        out.push(EitDescriptor::ExtendedEvent { items: Vec::new() });
                    }
                    extended_fragments.push(e);
                }
            }
            _ => {}
        }
    }

    if let Some(slot) = extended_slot {
        let items = descriptor::concat_extended_event_fragments(&extended_fragments);
        out[slot] = EitDescriptor::ExtendedEvent { items };
    }

    out
}
