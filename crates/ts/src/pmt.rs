//! Program Map Table (PMT): the stream list and descriptors a service
//! filter needs to decide which PIDs belong to a program.

use bytes::{Buf, Bytes};

use crate::descriptor::{self, DescriptorIterator, TAG_CA, TAG_STREAM_IDENTIFIER};
use crate::error::TsError;
use crate::section::RawSection;

pub const TABLE_ID_PMT: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Mpeg2Video,
    Mpeg1Audio,
    Mpeg2Audio,
    Aac,
    H264,
    H265,
    /// Stream type 0x06, "private data"; carries ARIB captions/data
    /// broadcasting unless a subtitling/data-component descriptor says
    /// otherwise.
    PrivateData,
    Other(u8),
}

impl StreamType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x01 | 0x02 => StreamType::Mpeg2Video,
            0x03 => StreamType::Mpeg1Audio,
            0x04 => StreamType::Mpeg2Audio,
            0x0F => StreamType::Aac,
            0x1B => StreamType::H264,
            0x24 => StreamType::H265,
            0x06 => StreamType::PrivateData,
            other => StreamType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            StreamType::Mpeg2Video => 0x02,
            StreamType::Mpeg1Audio => 0x03,
            StreamType::Mpeg2Audio => 0x04,
            StreamType::Aac => 0x0F,
            StreamType::H264 => 0x1B,
            StreamType::H265 => 0x24,
            StreamType::PrivateData => 0x06,
            StreamType::Other(v) => v,
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, StreamType::Mpeg2Video | StreamType::H264 | StreamType::H265)
    }

    pub fn is_audio(self) -> bool {
        matches!(self, StreamType::Mpeg1Audio | StreamType::Mpeg2Audio | StreamType::Aac)
    }

    /// ARIB captions and data-broadcasting content both ride on stream type
    /// 0x06; the service filter keeps both (it cannot cheaply distinguish
    /// them without inspecting the data-component descriptor, and both are
    /// legitimate "subtitles" in the broad sense this filter cares about).
    pub fn is_subtitle_or_data(self) -> bool {
        matches!(self, StreamType::PrivateData)
    }
}

#[derive(Debug, Clone)]
pub struct PmtStream {
    pub stream_type: StreamType,
    pub elementary_pid: u16,
    pub component_tag: Option<u8>,
    pub ca_pids: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct Pmt {
    pub service_id: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub pcr_pid: u16,
    pub ca_pids: Vec<u16>,
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    pub fn parse(section: &RawSection) -> crate::Result<Self> {
        if section.table_id != TABLE_ID_PMT {
            return Err(TsError::UnexpectedTableId {
                expected: TABLE_ID_PMT,
                actual: section.table_id,
            });
        }
        let mut data = section.payload.clone();
        if data.remaining() < 4 {
            return Err(TsError::MalformedSection("PMT payload too short"));
        }
        let pcr_pid = (((data[0] & 0x1F) as u16) << 8) | data[1] as u16;
        let program_info_length = (((data[2] & 0x0F) as usize) << 8) | data[3] as usize;
        data.advance(4);
        if data.remaining() < program_info_length {
            return Err(TsError::MalformedSection("PMT program_info_length overruns payload"));
        }
        let program_info = data.split_to(program_info_length);
        let ca_pids = extract_ca_pids(program_info);

        let mut streams = Vec::new();
        while data.remaining() >= 5 {
            let stream_type = StreamType::from_u8(data[0]);
            let elementary_pid = (((data[1] & 0x1F) as u16) << 8) | data[2] as u16;
            let es_info_length = (((data[3] & 0x0F) as usize) << 8) | data[4] as usize;
            data.advance(5);
            if data.remaining() < es_info_length {
                return Err(TsError::MalformedSection("PMT ES_info_length overruns payload"));
            }
            let es_info = data.split_to(es_info_length);
            let mut component_tag = None;
            let mut stream_ca_pids = Vec::new();
            for d in DescriptorIterator::new(es_info) {
                match d.tag {
                    TAG_STREAM_IDENTIFIER => {
                        component_tag = descriptor::parse_stream_identifier_descriptor(&d.data);
                    }
                    TAG_CA => {
                        if let Some(ca) = descriptor::parse_ca_descriptor(&d.data) {
                            stream_ca_pids.push(ca.ca_pid);
                        }
                    }
                    _ => {}
                }
            }
            streams.push(PmtStream {
                stream_type,
                elementary_pid,
                component_tag,
                ca_pids: stream_ca_pids,
            });
        }

        Ok(Pmt {
            service_id: section.table_id_extension,
            version_number: section.version_number,
            current_next_indicator: section.current_next_indicator,
            pcr_pid,
            ca_pids,
            streams,
        })
    }

    /// Drop every elementary stream that is neither video, audio, nor
    /// subtitle/data-broadcasting content, in place. Mirrors the original
    /// `HandlePmt`'s content filter, which is rebuilt from a PMT containing
    /// only streams of interest.
    pub fn retain_av_subtitle_streams(&mut self) {
        self.streams
            .retain(|s| s.stream_type.is_video() || s.stream_type.is_audio() || s.stream_type.is_subtitle_or_data());
    }

    /// Further drop elementary streams whose `component_tag` is not in the
    /// relevant allow-list (video/audio tag allow-lists configured on a
    /// program filter). A stream without a `component_tag` is kept only if
    /// the corresponding allow-list is empty.
    pub fn retain_by_component_tag(&mut self, video_allow: &[u8], audio_allow: &[u8]) {
        self.streams.retain(|s| {
            if s.stream_type.is_video() {
                video_allow.is_empty() || s.component_tag.is_some_and(|t| video_allow.contains(&t))
            } else if s.stream_type.is_audio() {
                audio_allow.is_empty() || s.component_tag.is_some_and(|t| audio_allow.contains(&t))
            } else {
                true
            }
        });
    }

    /// Serialize a rewritten PMT section payload (after the 12-byte header,
    /// before the CRC) from this PMT's current stream list, with an empty
    /// program-info descriptor loop.
    pub fn serialize(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(0xE000 | self.pcr_pid).to_be_bytes());
        payload.extend_from_slice(&0xF000u16.to_be_bytes()); // program_info_length = 0
        for stream in &self.streams {
            payload.push(stream.stream_type.as_u8());
            payload.extend_from_slice(&(0xE000 | stream.elementary_pid).to_be_bytes());
            let mut es_info = Vec::new();
            if let Some(tag) = stream.component_tag {
                es_info.push(TAG_STREAM_IDENTIFIER);
                es_info.push(1);
                es_info.push(tag);
            }
            payload.extend_from_slice(&(0xF000u16 | es_info.len() as u16).to_be_bytes());
            payload.extend_from_slice(&es_info);
        }
        payload
    }
}

fn extract_ca_pids(program_info: Bytes) -> Vec<u16> {
    DescriptorIterator::new(program_info)
        .filter(|d| d.tag == TAG_CA)
        .filter_map(|d| descriptor::parse_ca_descriptor(&d.data))
        .map(|ca| ca.ca_pid)
        .collect()
}
