use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NsxError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Unrecognized file type identifier {0:?}")]
    UnknownMagic(String),
    #[error("Unsupported file spec {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("Invalid extended header for channel {index}: expected \"CC\", found {found:?}")]
    BadExtendedHeader { index: usize, found: String },
    #[error("Invalid data packet header 0x{found:02x} at byte {offset}")]
    BadPacket { offset: u64, found: u8 },
    #[error("Sampling period is zero")]
    ZeroPeriod,
    #[error("File declares no channels")]
    NoChannels,
    #[error("Channel {index} out of range ({count} channels)")]
    ChannelOutOfRange { index: usize, count: usize },
    #[error("Segment {index} out of range ({count} segments)")]
    SegmentOutOfRange { index: usize, count: usize },
}
