//! Length-prefixed to start-code bitstream conversion
//!
//! MP4-family containers store H.264/HEVC access units as NAL units with
//! big-endian length prefixes, and keep the parameter sets in the codec
//! configuration record. Decoders fed raw buffers expect Annex B: every NAL
//! preceded by a start code, parameter sets in-band ahead of keyframes.

use super::{BitstreamReformatter, Packet};
use crate::utils::error::{PipelineError, Result};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Rewrites `avcC` / `hvcC` packets to Annex B
#[derive(Debug, Clone)]
pub struct AnnexBReformatter {
    /// Bytes per NAL length prefix (1, 2 or 4); 0 means packets pass through
    length_size: usize,

    /// Parameter sets in Annex B form, prepended to keyframes
    parameter_sets: Vec<u8>,
}

impl AnnexBReformatter {
    /// Build from an `avcC` configuration record
    pub fn h264(extradata: &[u8]) -> Result<Self> {
        if is_annexb(extradata) {
            return Ok(Self::passthrough());
        }

        let mut reader = Reader::new(extradata);
        let version = reader.u8()?;
        if version != 1 {
            return Err(PipelineError::reformat_error(format!(
                "unsupported avcC version {}",
                version
            )));
        }
        reader.skip(3)?;
        let length_size = usize::from(reader.u8()? & 0x03) + 1;

        let mut parameter_sets = Vec::new();
        let sps_count = reader.u8()? & 0x1f;
        for _ in 0..sps_count {
            append_nal(&mut parameter_sets, reader.sized()?);
        }
        let pps_count = reader.u8()?;
        for _ in 0..pps_count {
            append_nal(&mut parameter_sets, reader.sized()?);
        }

        Self::with_length_size(length_size, parameter_sets)
    }

    /// Build from an `hvcC` configuration record
    pub fn hevc(extradata: &[u8]) -> Result<Self> {
        if is_annexb(extradata) {
            return Ok(Self::passthrough());
        }

        let mut reader = Reader::new(extradata);
        reader.skip(21)?;
        let length_size = usize::from(reader.u8()? & 0x03) + 1;

        let mut parameter_sets = Vec::new();
        let array_count = reader.u8()?;
        for _ in 0..array_count {
            reader.skip(1)?;
            let nal_count = reader.u16()?;
            for _ in 0..nal_count {
                append_nal(&mut parameter_sets, reader.sized()?);
            }
        }

        Self::with_length_size(length_size, parameter_sets)
    }

    /// Reformatter that leaves packets untouched
    pub fn passthrough() -> Self {
        Self {
            length_size: 0,
            parameter_sets: Vec::new(),
        }
    }

    fn with_length_size(length_size: usize, parameter_sets: Vec<u8>) -> Result<Self> {
        if length_size == 3 {
            return Err(PipelineError::reformat_error("3-byte NAL length prefixes are invalid"));
        }
        Ok(Self {
            length_size,
            parameter_sets,
        })
    }

    /// Convert one length-prefixed access unit
    pub fn convert(&self, data: &[u8], keyframe: bool) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(PipelineError::reformat_error("empty packet"));
        }

        let mut out = Vec::with_capacity(data.len() + self.parameter_sets.len() + 16);
        if keyframe {
            out.extend_from_slice(&self.parameter_sets);
        }

        let mut offset = 0;
        while offset < data.len() {
            if data.len() - offset < self.length_size {
                return Err(PipelineError::reformat_error(format!(
                    "truncated NAL length at offset {}",
                    offset
                )));
            }

            let nal_len = data[offset..offset + self.length_size]
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
            offset += self.length_size;

            if nal_len > data.len() - offset {
                return Err(PipelineError::reformat_error(format!(
                    "NAL length {} exceeds remaining {} bytes",
                    nal_len,
                    data.len() - offset
                )));
            }

            append_nal(&mut out, &data[offset..offset + nal_len]);
            offset += nal_len;
        }

        Ok(out)
    }
}

impl BitstreamReformatter for AnnexBReformatter {
    fn reformat(&mut self, mut packet: Packet) -> Result<Packet> {
        if self.length_size == 0 {
            return Ok(packet);
        }
        packet.data = self.convert(&packet.data, packet.keyframe)?;
        Ok(packet)
    }
}

fn is_annexb(extradata: &[u8]) -> bool {
    extradata.is_empty() || extradata.starts_with(&[0, 0, 1]) || extradata.starts_with(&START_CODE)
}

fn append_nal(out: &mut Vec<u8>, nal: &[u8]) {
    out.extend_from_slice(&START_CODE);
    out.extend_from_slice(nal);
}

/// Bounds-checked big-endian reader over a configuration record
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                PipelineError::reformat_error(format!(
                    "configuration record truncated at offset {}",
                    self.offset
                ))
            })?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn sized(&mut self) -> Result<&'a [u8]> {
        let len = usize::from(self.u16()?);
        self.take(len)
    }
}
