//! Basic and extended header decoding.
//!
//! All multi-byte fields are little-endian. The 2.2+ basic header is 314
//! bytes; every channel then has a 66-byte `CC` extended header.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use crate::error::NsxError;

/// Sample clock shared by all Blackrock front ends.
pub const MAIN_CLOCK_HZ: f64 = 30_000.0;
pub const BASIC_HEADER_BYTES: u64 = 314;
pub const EXT_HEADER_BYTES: u64 = 66;
/// Fixed part of the 2.1 header (magic + label + period + channel count).
pub const V21_HEADER_BYTES: u64 = 32;

pub const MAGIC_V21: &[u8; 8] = b"NEURALSG";
pub const MAGIC_V22: &[u8; 8] = b"NEURALCD";
pub const MAGIC_V30: &[u8; 8] = b"BRSMPGRP";

/// File specification revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSpec {
    V21,
    V22,
    V23,
    V30,
}

impl FileSpec {
    /// Width of the timestamp field in a data packet header.
    pub fn timestamp_bytes(&self) -> u64 {
        match self {
            FileSpec::V30 => 8,
            _ => 4,
        }
    }

    pub fn has_packets(&self) -> bool {
        *self != FileSpec::V21
    }
}

impl fmt::Display for FileSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSpec::V21 => write!(f, "2.1"),
            FileSpec::V22 => write!(f, "2.2"),
            FileSpec::V23 => write!(f, "2.3"),
            FileSpec::V30 => write!(f, "3.0"),
        }
    }
}

/// Wall-clock start of the recording (Windows SYSTEMTIME layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeOrigin {
    pub year: u16,
    pub month: u16,
    pub day_of_week: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub millisecond: u16,
}

impl fmt::Display for TimeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.millisecond
        )
    }
}

/// Per-channel description from a `CC` extended header
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub electrode_id: u16,
    pub label: String,
    pub physical_connector: u8,
    pub connector_pin: u8,
    pub min_digital: i16,
    pub max_digital: i16,
    pub min_analog: i16,
    pub max_analog: i16,
    pub units: String,
    pub hi_freq_corner: u32,
    pub hi_freq_order: u32,
    pub hi_freq_type: u16,
    pub lo_freq_corner: u32,
    pub lo_freq_order: u32,
    pub lo_freq_type: u16,
}

impl ChannelInfo {
    /// Channel as described by a 2.1 file: raw values already in µV.
    pub fn v21(electrode_id: u32) -> Self {
        Self {
            electrode_id: electrode_id as u16,
            label: format!("chan{}", electrode_id),
            physical_connector: 0,
            connector_pin: 0,
            min_digital: -8192,
            max_digital: 8192,
            min_analog: -8192,
            max_analog: 8192,
            units: "uV".to_string(),
            hi_freq_corner: 0,
            hi_freq_order: 0,
            hi_freq_type: 0,
            lo_freq_corner: 0,
            lo_freq_order: 0,
            lo_freq_type: 0,
        }
    }

    /// Multiplier that takes the declared analog unit to microvolts.
    pub fn unit_factor(&self) -> f64 {
        match self.units.trim().to_lowercase().as_str() {
            "mv" => 1e3,
            "v" => 1e6,
            "nv" => 1e-3,
            _ => 1.0,
        }
    }

    /// Analog units per digital step.
    pub fn gain(&self) -> f64 {
        let dig_span = self.max_digital as f64 - self.min_digital as f64;
        if dig_span == 0.0 {
            return 1.0;
        }
        (self.max_analog as f64 - self.min_analog as f64) / dig_span
    }

    /// Convert one raw sample to microvolts.
    pub fn to_microvolts(&self, raw: i16) -> f64 {
        let analog =
            (raw as f64 - self.min_digital as f64) * self.gain() + self.min_analog as f64;
        analog * self.unit_factor()
    }
}

/// Decoded file header
#[derive(Debug, Clone, PartialEq)]
pub struct NsxHeader {
    pub spec: FileSpec,
    pub label: String,
    pub comment: String,
    /// Sample period in ticks of the 30 kHz main clock
    pub period: u32,
    pub timestamp_resolution: u32,
    pub time_origin: Option<TimeOrigin>,
    pub channels: Vec<ChannelInfo>,
    /// Byte offset where the data section begins
    pub data_offset: u64,
}

impl NsxHeader {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Sampling rate in Hz.
    pub fn sampling_rate(&self) -> Result<f64, NsxError> {
        if self.period == 0 {
            return Err(NsxError::ZeroPeriod);
        }
        Ok(MAIN_CLOCK_HZ / self.period as f64)
    }

    /// Timestamp ticks between two consecutive samples.
    pub fn ticks_per_sample(&self) -> f64 {
        self.period as f64 * self.timestamp_resolution as f64 / MAIN_CLOCK_HZ
    }

    /// Timestamp of sample `sample` in a segment starting at `segment_timestamp`.
    pub fn sample_timestamp(&self, segment_timestamp: u64, sample: u64) -> u64 {
        segment_timestamp + (sample as f64 * self.ticks_per_sample()).round() as u64
    }

    /// Bytes per frame (one i16 per channel).
    pub fn frame_bytes(&self) -> u64 {
        self.channels.len() as u64 * 2
    }
}

/// Read a fixed-width, NUL-padded text field.
fn read_fixed_str<R: Read>(reader: &mut R, len: usize) -> Result<String, NsxError> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&buf[..end]).trim().to_string())
}

/// Read and decode the header from the start of `reader`.
pub fn read_header<R: Read + Seek>(reader: &mut R) -> Result<NsxHeader, NsxError> {
    reader.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;

    match &magic {
        m if m == MAGIC_V21 => read_v21_header(reader),
        m if m == MAGIC_V22 || m == MAGIC_V30 => read_v22_header(reader, &magic),
        _ => Err(NsxError::UnknownMagic(
            String::from_utf8_lossy(&magic).to_string(),
        )),
    }
}

fn read_v21_header<R: Read>(reader: &mut R) -> Result<NsxHeader, NsxError> {
    let label = read_fixed_str(reader, 16)?;
    let period = reader.read_u32::<LittleEndian>()?;
    let channel_count = reader.read_u32::<LittleEndian>()?;
    if channel_count == 0 {
        return Err(NsxError::NoChannels);
    }

    let mut channels = Vec::with_capacity(channel_count as usize);
    for _ in 0..channel_count {
        channels.push(ChannelInfo::v21(reader.read_u32::<LittleEndian>()?));
    }

    Ok(NsxHeader {
        spec: FileSpec::V21,
        label,
        comment: String::new(),
        period,
        timestamp_resolution: MAIN_CLOCK_HZ as u32,
        time_origin: None,
        channels,
        data_offset: V21_HEADER_BYTES + 4 * channel_count as u64,
    })
}

fn read_v22_header<R: Read>(reader: &mut R, magic: &[u8; 8]) -> Result<NsxHeader, NsxError> {
    let major = reader.read_u8()?;
    let minor = reader.read_u8()?;
    let spec = match (magic == MAGIC_V30, major, minor) {
        (false, 2, 2) => FileSpec::V22,
        (false, 2, 3) => FileSpec::V23,
        (true, 3, _) => FileSpec::V30,
        _ => return Err(NsxError::UnsupportedVersion { major, minor }),
    };

    let bytes_in_headers = reader.read_u32::<LittleEndian>()?;
    let label = read_fixed_str(reader, 16)?;
    let comment = read_fixed_str(reader, 256)?;
    let period = reader.read_u32::<LittleEndian>()?;
    let timestamp_resolution = reader.read_u32::<LittleEndian>()?;

    let mut origin = [0u16; 8];
    for v in origin.iter_mut() {
        *v = reader.read_u16::<LittleEndian>()?;
    }
    let time_origin = TimeOrigin {
        year: origin[0],
        month: origin[1],
        day_of_week: origin[2],
        day: origin[3],
        hour: origin[4],
        minute: origin[5],
        second: origin[6],
        millisecond: origin[7],
    };

    let channel_count = reader.read_u32::<LittleEndian>()? as usize;
    if channel_count == 0 {
        return Err(NsxError::NoChannels);
    }

    let mut channels = Vec::with_capacity(channel_count);
    for index in 0..channel_count {
        channels.push(read_extended_header(reader, index)?);
    }

    // Trust the declared size; some writers pad the header block.
    let computed = BASIC_HEADER_BYTES + EXT_HEADER_BYTES * channel_count as u64;
    let data_offset = if (bytes_in_headers as u64) >= computed {
        bytes_in_headers as u64
    } else {
        log::warn!(
            "Header declares {} bytes but {} channels need {}; using computed size",
            bytes_in_headers,
            channel_count,
            computed
        );
        computed
    };

    Ok(NsxHeader {
        spec,
        label,
        comment,
        period,
        timestamp_resolution,
        time_origin: Some(time_origin),
        channels,
        data_offset,
    })
}

fn read_extended_header<R: Read>(reader: &mut R, index: usize) -> Result<ChannelInfo, NsxError> {
    let mut tag = [0u8; 2];
    reader.read_exact(&mut tag)?;
    if &tag != b"CC" {
        return Err(NsxError::BadExtendedHeader {
            index,
            found: String::from_utf8_lossy(&tag).to_string(),
        });
    }

    Ok(ChannelInfo {
        electrode_id: reader.read_u16::<LittleEndian>()?,
        label: read_fixed_str(reader, 16)?,
        physical_connector: reader.read_u8()?,
        connector_pin: reader.read_u8()?,
        min_digital: reader.read_i16::<LittleEndian>()?,
        max_digital: reader.read_i16::<LittleEndian>()?,
        min_analog: reader.read_i16::<LittleEndian>()?,
        max_analog: reader.read_i16::<LittleEndian>()?,
        units: read_fixed_str(reader, 16)?,
        hi_freq_corner: reader.read_u32::<LittleEndian>()?,
        hi_freq_order: reader.read_u32::<LittleEndian>()?,
        hi_freq_type: reader.read_u16::<LittleEndian>()?,
        lo_freq_corner: reader.read_u32::<LittleEndian>()?,
        lo_freq_order: reader.read_u32::<LittleEndian>()?,
        lo_freq_type: reader.read_u16::<LittleEndian>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(min_d: i16, max_d: i16, min_a: i16, max_a: i16, units: &str) -> ChannelInfo {
        ChannelInfo {
            min_digital: min_d,
            max_digital: max_d,
            min_analog: min_a,
            max_analog: max_a,
            units: units.to_string(),
            ..ChannelInfo::v21(1)
        }
    }

    #[test]
    fn test_v21_channel_is_identity() {
        let ch = ChannelInfo::v21(7);
        assert_eq!(ch.label, "chan7");
        assert_eq!(ch.to_microvolts(123), 123.0);
        assert_eq!(ch.to_microvolts(-4000), -4000.0);
    }

    #[test]
    fn test_quarter_microvolt_gain() {
        let ch = channel(-1000, 1000, -250, 250, "uV");
        assert_eq!(ch.gain(), 0.25);
        assert_eq!(ch.to_microvolts(400), 100.0);
        assert_eq!(ch.to_microvolts(-1000), -250.0);
    }

    #[test]
    fn test_millivolt_units_scaled() {
        let ch = channel(-1000, 1000, -5, 5, "mV");
        // 1000 digital steps span 5 mV = 5000 µV
        assert!((ch.to_microvolts(1000) - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_digital_range() {
        let ch = channel(0, 0, 0, 0, "uV");
        assert_eq!(ch.gain(), 1.0);
        assert_eq!(ch.to_microvolts(12), 12.0);
    }

    #[test]
    fn test_sampling_rate_from_period() {
        let mut header = NsxHeader {
            spec: FileSpec::V23,
            label: String::new(),
            comment: String::new(),
            period: 1,
            timestamp_resolution: 30000,
            time_origin: None,
            channels: vec![ChannelInfo::v21(1)],
            data_offset: 0,
        };
        assert_eq!(header.sampling_rate().unwrap(), 30000.0);
        header.period = 30;
        assert_eq!(header.sampling_rate().unwrap(), 1000.0);
        header.period = 0;
        assert!(matches!(header.sampling_rate(), Err(NsxError::ZeroPeriod)));
    }

    fn v23_bytes() -> Vec<u8> {
        let header = NsxHeader {
            spec: FileSpec::V23,
            label: "30 kS/s".to_string(),
            comment: String::new(),
            period: 1,
            timestamp_resolution: 30000,
            time_origin: None,
            channels: vec![ChannelInfo::v21(1), ChannelInfo::v21(2)],
            data_offset: 0,
        };
        let mut bytes = Vec::new();
        crate::writer::write_header(&mut bytes, &header).unwrap();
        bytes
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = v23_bytes();
        bytes[9] = 9;
        let err = read_header(&mut std::io::Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, NsxError::UnsupportedVersion { major: 2, minor: 9 }));
    }

    #[test]
    fn test_bad_extended_header_tag() {
        let mut bytes = v23_bytes();
        let second = (BASIC_HEADER_BYTES + EXT_HEADER_BYTES) as usize;
        bytes[second..second + 2].copy_from_slice(b"XX");
        let err = read_header(&mut std::io::Cursor::new(bytes)).unwrap_err();
        match err {
            NsxError::BadExtendedHeader { index, found } => {
                assert_eq!(index, 1);
                assert_eq!(found, "XX");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_sample_timestamp_uses_resolution() {
        let mut header = NsxHeader {
            spec: FileSpec::V30,
            label: String::new(),
            comment: String::new(),
            period: 30,
            timestamp_resolution: 1_000_000_000,
            time_origin: None,
            channels: vec![ChannelInfo::v21(1)],
            data_offset: 0,
        };
        assert_eq!(header.ticks_per_sample(), 1_000_000.0);
        assert_eq!(header.sample_timestamp(500, 10), 10_000_500);
        header.timestamp_resolution = 30000;
        assert_eq!(header.sample_timestamp(500, 10), 800);
    }

    #[test]
    fn test_time_origin_display() {
        let t = TimeOrigin {
            year: 2024,
            month: 3,
            day_of_week: 2,
            day: 5,
            hour: 14,
            minute: 7,
            second: 9,
            millisecond: 42,
        };
        assert_eq!(t.to_string(), "2024-03-05 14:07:09.042");
    }
}
