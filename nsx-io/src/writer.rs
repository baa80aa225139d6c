//! `.nsX` writer: header + data packets.
//!
//! Used by `nsxinfo --extract` to cut a window out of a recording, and by
//! tests to build synthetic files.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

use crate::error::NsxError;
use crate::header::*;
use crate::reader::PACKET_HEADER_ID;

fn write_fixed_str<W: Write>(writer: &mut W, text: &str, len: usize) -> Result<(), NsxError> {
    let mut buf = vec![0u8; len];
    let bytes = text.as_bytes();
    let n = bytes.len().min(len);
    buf[..n].copy_from_slice(&bytes[..n]);
    writer.write_all(&buf)?;
    Ok(())
}

/// Write the basic and extended headers. `header.data_offset` is ignored;
/// the size written is always the minimal one for the channel count.
pub fn write_header<W: Write>(writer: &mut W, header: &NsxHeader) -> Result<(), NsxError> {
    if header.channels.is_empty() {
        return Err(NsxError::NoChannels);
    }

    if header.spec == FileSpec::V21 {
        writer.write_all(MAGIC_V21)?;
        write_fixed_str(writer, &header.label, 16)?;
        writer.write_u32::<LittleEndian>(header.period)?;
        writer.write_u32::<LittleEndian>(header.channels.len() as u32)?;
        for ch in &header.channels {
            writer.write_u32::<LittleEndian>(ch.electrode_id as u32)?;
        }
        return Ok(());
    }

    let (magic, major, minor) = match header.spec {
        FileSpec::V22 => (MAGIC_V22, 2u8, 2u8),
        FileSpec::V23 => (MAGIC_V22, 2, 3),
        _ => (MAGIC_V30, 3, 0),
    };
    writer.write_all(magic)?;
    writer.write_u8(major)?;
    writer.write_u8(minor)?;
    let bytes_in_headers = BASIC_HEADER_BYTES + EXT_HEADER_BYTES * header.channels.len() as u64;
    writer.write_u32::<LittleEndian>(bytes_in_headers as u32)?;
    write_fixed_str(writer, &header.label, 16)?;
    write_fixed_str(writer, &header.comment, 256)?;
    writer.write_u32::<LittleEndian>(header.period)?;
    writer.write_u32::<LittleEndian>(header.timestamp_resolution)?;

    let t = header.time_origin.unwrap_or_default();
    for v in [
        t.year,
        t.month,
        t.day_of_week,
        t.day,
        t.hour,
        t.minute,
        t.second,
        t.millisecond,
    ] {
        writer.write_u16::<LittleEndian>(v)?;
    }
    writer.write_u32::<LittleEndian>(header.channels.len() as u32)?;

    for ch in &header.channels {
        writer.write_all(b"CC")?;
        writer.write_u16::<LittleEndian>(ch.electrode_id)?;
        write_fixed_str(writer, &ch.label, 16)?;
        writer.write_u8(ch.physical_connector)?;
        writer.write_u8(ch.connector_pin)?;
        writer.write_i16::<LittleEndian>(ch.min_digital)?;
        writer.write_i16::<LittleEndian>(ch.max_digital)?;
        writer.write_i16::<LittleEndian>(ch.min_analog)?;
        writer.write_i16::<LittleEndian>(ch.max_analog)?;
        write_fixed_str(writer, &ch.units, 16)?;
        writer.write_u32::<LittleEndian>(ch.hi_freq_corner)?;
        writer.write_u32::<LittleEndian>(ch.hi_freq_order)?;
        writer.write_u16::<LittleEndian>(ch.hi_freq_type)?;
        writer.write_u32::<LittleEndian>(ch.lo_freq_corner)?;
        writer.write_u32::<LittleEndian>(ch.lo_freq_order)?;
        writer.write_u16::<LittleEndian>(ch.lo_freq_type)?;
    }
    Ok(())
}

/// Write one data packet of interleaved samples.
///
/// For 2.1 files there is no packet header; the samples are appended as-is.
pub fn write_packet<W: Write>(
    writer: &mut W,
    spec: FileSpec,
    timestamp: u64,
    channel_count: usize,
    samples: &[i16],
) -> Result<(), NsxError> {
    if channel_count == 0 {
        return Err(NsxError::NoChannels);
    }
    if spec.has_packets() {
        writer.write_u8(PACKET_HEADER_ID)?;
        if spec == FileSpec::V30 {
            writer.write_u64::<LittleEndian>(timestamp)?;
        } else {
            writer.write_u32::<LittleEndian>(timestamp as u32)?;
        }
        writer.write_u32::<LittleEndian>((samples.len() / channel_count) as u32)?;
    }
    for &s in samples {
        writer.write_i16::<LittleEndian>(s)?;
    }
    Ok(())
}
