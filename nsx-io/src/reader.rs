//! Data-packet index and windowed sample reads.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::NsxError;
use crate::header::*;

/// First byte of every 2.2+ data packet.
pub const PACKET_HEADER_ID: u8 = 0x01;

/// Packets of equal size laid out back to back inside a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRun {
    /// Index within the segment of the run's first sample
    pub first_sample: u64,
    /// Samples per channel across the whole run
    pub num_samples: u64,
    /// Samples per packet; only the last packet may hold fewer
    pub packet_samples: u64,
    /// Byte offset of the first sample
    pub data_offset: u64,
    /// Bytes from the first sample of one packet to that of the next
    pub stride: u64,
}

impl PacketRun {
    fn is_full(&self) -> bool {
        self.num_samples % self.packet_samples == 0
    }

    /// Byte offset of sample `i`, counted from the start of the run.
    fn offset_of(&self, i: u64, frame_bytes: u64) -> u64 {
        let (packet, within) = (i / self.packet_samples, i % self.packet_samples);
        self.data_offset + packet * self.stride + within * frame_bytes
    }
}

/// One stretch of uninterrupted recording
///
/// A segment usually maps to one data packet. Files that write a packet
/// per sample (3.0 with PTP clocking) have their packets joined back
/// together while their timestamps stay contiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub index: usize,
    /// Timestamp of the first sample, in `timestamp_resolution` ticks
    pub timestamp: u64,
    /// Samples per channel
    pub num_samples: u64,
    /// Byte offset of the first sample
    pub data_offset: u64,
    /// Data packets merged into this segment
    pub packets: u64,
    pub runs: Vec<PacketRun>,
    /// Timestamp of the last packet and its length, for the contiguity test
    last_timestamp: u64,
    last_samples: u64,
}

impl DataSegment {
    /// Start of the segment in seconds relative to the recording clock.
    pub fn start_time_s(&self, timestamp_resolution: u32) -> f64 {
        if timestamp_resolution == 0 {
            return 0.0;
        }
        self.timestamp as f64 / timestamp_resolution as f64
    }

    fn new(
        index: usize,
        timestamp: u64,
        num_samples: u64,
        data_offset: u64,
        header_bytes: u64,
        frame_bytes: u64,
    ) -> Self {
        Self {
            index,
            timestamp,
            num_samples,
            data_offset,
            packets: 1,
            runs: vec![PacketRun {
                first_sample: 0,
                num_samples,
                packet_samples: num_samples.max(1),
                data_offset,
                stride: num_samples * frame_bytes + header_bytes,
            }],
            last_timestamp: timestamp,
            last_samples: num_samples,
        }
    }

    /// Whether a packet stamped `timestamp` carries on where this segment stops.
    fn continues_at(&self, timestamp: u64, ticks_per_sample: f64) -> bool {
        if ticks_per_sample <= 0.0 {
            return false;
        }
        let expected = self.last_timestamp as f64 + self.last_samples as f64 * ticks_per_sample;
        (timestamp as f64 - expected).abs() < ticks_per_sample
    }

    fn append(
        &mut self,
        timestamp: u64,
        num_samples: u64,
        data_offset: u64,
        header_bytes: u64,
        frame_bytes: u64,
    ) {
        let first_sample = self.num_samples;
        let extends = match self.runs.last() {
            Some(run) => {
                run.is_full()
                    && num_samples <= run.packet_samples
                    && run.offset_of(run.num_samples, frame_bytes) == data_offset
            }
            None => false,
        };
        match (extends, self.runs.last_mut()) {
            (true, Some(run)) => run.num_samples += num_samples,
            _ => self.runs.push(PacketRun {
                first_sample,
                num_samples,
                packet_samples: num_samples,
                data_offset,
                stride: num_samples * frame_bytes + header_bytes,
            }),
        }
        self.num_samples += num_samples;
        self.packets += 1;
        self.last_timestamp = timestamp;
        self.last_samples = num_samples;
    }
}

/// Move past `bytes` of sample data. Short payloads are read through so a
/// buffered reader keeps its buffer.
fn skip<R: Read + Seek>(reader: &mut R, bytes: u64) -> Result<(), NsxError> {
    const READ_THROUGH: u64 = 64 * 1024;
    if bytes <= READ_THROUGH {
        let copied = io::copy(&mut reader.by_ref().take(bytes), &mut io::sink())?;
        if copied < bytes {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
    } else {
        reader.seek(SeekFrom::Current(bytes as i64))?;
    }
    Ok(())
}

/// Walk the data section and record every packet without reading samples.
///
/// Consecutive packets whose timestamps follow on without a gap are joined
/// into one segment. An empty packet marks a pause and always ends the
/// current segment.
pub fn scan_segments<R: Read + Seek>(
    reader: &mut R,
    header: &NsxHeader,
    file_len: u64,
) -> Result<Vec<DataSegment>, NsxError> {
    let frame_bytes = header.frame_bytes();

    if !header.spec.has_packets() {
        let available = file_len.saturating_sub(header.data_offset);
        if available % frame_bytes != 0 {
            log::warn!(
                "Data section has {} trailing bytes; ignoring partial frame",
                available % frame_bytes
            );
        }
        return Ok(vec![DataSegment::new(
            0,
            0,
            available / frame_bytes,
            header.data_offset,
            0,
            frame_bytes,
        )]);
    }

    let packet_header_bytes = 1 + header.spec.timestamp_bytes() + 4;
    let ticks_per_sample = header.ticks_per_sample();
    let mut segments: Vec<DataSegment> = Vec::new();
    let mut paused = true;
    let mut pos = header.data_offset;
    reader.seek(SeekFrom::Start(pos))?;

    while pos < file_len {
        if file_len - pos < packet_header_bytes {
            log::warn!(
                "Ignoring {} trailing bytes after the last data packet",
                file_len - pos
            );
            break;
        }

        let id = reader.read_u8()?;
        if id != PACKET_HEADER_ID {
            return Err(NsxError::BadPacket { offset: pos, found: id });
        }
        let timestamp = if header.spec == FileSpec::V30 {
            reader.read_u64::<LittleEndian>()?
        } else {
            reader.read_u32::<LittleEndian>()? as u64
        };
        let declared = reader.read_u32::<LittleEndian>()? as u64;

        let data_offset = pos + packet_header_bytes;
        let available = (file_len - data_offset) / frame_bytes;
        let num_samples = if declared > available {
            log::warn!(
                "Packet at byte {} declares {} samples but only {} are present",
                pos,
                declared,
                available
            );
            available
        } else {
            declared
        };

        if num_samples == 0 {
            log::debug!("Empty packet at byte {} (pause marker)", pos);
            paused = true;
        } else {
            match segments.last_mut() {
                Some(seg) if !paused && seg.continues_at(timestamp, ticks_per_sample) => {
                    seg.append(timestamp, num_samples, data_offset, packet_header_bytes, frame_bytes)
                }
                _ => segments.push(DataSegment::new(
                    segments.len(),
                    timestamp,
                    num_samples,
                    data_offset,
                    packet_header_bytes,
                    frame_bytes,
                )),
            }
            paused = false;
        }
        if num_samples < declared {
            break;
        }
        pos = data_offset + num_samples * frame_bytes;
        skip(reader, num_samples * frame_bytes)?;
    }

    if let Some(merged) = segments.iter().map(|s| s.packets).max().filter(|&n| n > 1) {
        log::debug!("Joined up to {} contiguous packets per segment", merged);
    }
    Ok(segments)
}

/// An opened `.nsX` file: decoded header plus packet index
#[derive(Debug, Clone)]
pub struct NsxFile {
    path: PathBuf,
    header: NsxHeader,
    segments: Vec<DataSegment>,
}

impl NsxFile {
    /// Open a file and index its data packets.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, NsxError> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let file = Self::from_reader(path.to_path_buf(), &mut reader)?;
        log::info!(
            "Opened {} (spec {}, {} channels, {} segment(s), period {})",
            path.display(),
            file.header.spec,
            file.header.channel_count(),
            file.segments.len(),
            file.header.period
        );
        Ok(file)
    }

    /// Index a file from any seekable source. `path` is kept for later reads.
    pub fn from_reader<R: Read + Seek>(path: PathBuf, reader: &mut R) -> Result<Self, NsxError> {
        let header = read_header(reader)?;
        let file_len = reader.seek(SeekFrom::End(0))?;
        let segments = scan_segments(reader, &header, file_len)?;
        Ok(Self {
            path,
            header,
            segments,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &NsxHeader {
        &self.header
    }

    pub fn segments(&self) -> &[DataSegment] {
        &self.segments
    }

    pub fn channels(&self) -> &[ChannelInfo] {
        &self.header.channels
    }

    pub fn sampling_rate(&self) -> Result<f64, NsxError> {
        self.header.sampling_rate()
    }

    pub fn segment(&self, index: usize) -> Result<&DataSegment, NsxError> {
        self.segments.get(index).ok_or(NsxError::SegmentOutOfRange {
            index,
            count: self.segments.len(),
        })
    }

    /// Samples per channel in a segment.
    pub fn segment_len(&self, index: usize) -> Result<u64, NsxError> {
        Ok(self.segment(index)?.num_samples)
    }

    /// Read interleaved raw frames `[start, end)` of a segment from the file on disk.
    pub fn read_frames(&self, segment: usize, start: u64, end: u64) -> Result<Vec<i16>, NsxError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        self.read_frames_from(&mut reader, segment, start, end)
    }

    /// Read interleaved raw frames from an already opened source.
    ///
    /// The range is clamped to the segment the way a slice would be:
    /// `start >= len` or `end <= start` gives an empty vector.
    pub fn read_frames_from<R: Read + Seek>(
        &self,
        reader: &mut R,
        segment: usize,
        start: u64,
        end: u64,
    ) -> Result<Vec<i16>, NsxError> {
        let seg = self.segment(segment)?;
        let end = end.min(seg.num_samples);
        if start >= end {
            return Ok(Vec::new());
        }

        let frame_bytes = self.header.frame_bytes() as usize;
        let mut samples = Vec::with_capacity((end - start) as usize * frame_bytes / 2);
        for run in &seg.runs {
            let run_end = run.first_sample + run.num_samples;
            if run_end <= start || run.first_sample >= end {
                continue;
            }
            let lo = start.max(run.first_sample) - run.first_sample;
            let hi = end.min(run_end) - run.first_sample;

            // One read spans every packet header between the wanted frames
            let byte_lo = run.offset_of(lo, frame_bytes as u64);
            let byte_hi = run.offset_of(hi - 1, frame_bytes as u64) + frame_bytes as u64;
            reader.seek(SeekFrom::Start(byte_lo))?;
            let mut buf = vec![0u8; (byte_hi - byte_lo) as usize];
            reader.read_exact(&mut buf)?;

            let mut frame = vec![0i16; frame_bytes / 2];
            for i in lo..hi {
                let at = (run.offset_of(i, frame_bytes as u64) - byte_lo) as usize;
                LittleEndian::read_i16_into(&buf[at..at + frame_bytes], &mut frame);
                samples.extend_from_slice(&frame);
            }
        }
        Ok(samples)
    }

    /// Read one channel over `[start, end)` samples, in microvolts.
    pub fn read_channel(
        &self,
        segment: usize,
        channel: usize,
        start: u64,
        end: u64,
    ) -> Result<Vec<f64>, NsxError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        self.read_channel_from(&mut reader, segment, channel, start, end)
    }

    pub fn read_channel_from<R: Read + Seek>(
        &self,
        reader: &mut R,
        segment: usize,
        channel: usize,
        start: u64,
        end: u64,
    ) -> Result<Vec<f64>, NsxError> {
        let count = self.header.channel_count();
        let info = self
            .header
            .channels
            .get(channel)
            .ok_or(NsxError::ChannelOutOfRange { index: channel, count })?;

        let frames = self.read_frames_from(reader, segment, start, end)?;
        Ok(frames
            .chunks_exact(count)
            .map(|frame| info.to_microvolts(frame[channel]))
            .collect())
    }
}
