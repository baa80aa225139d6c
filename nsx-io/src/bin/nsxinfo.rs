//! nsxinfo: inspect a Blackrock .nsX recording, dump a window as CSV,
//! or cut a window into a new .nsX file.

use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use nsx_io::{time_to_sample, write_header, write_packet, NsxError, NsxFile};

#[derive(Parser)]
#[command(
    name = "nsxinfo",
    version,
    about = "Inspect Blackrock .nsX recordings and dump sample windows"
)]
struct Cli {
    /// Input .nsX file
    input: PathBuf,

    /// Channel index (0-based) for CSV output
    #[arg(short, long, default_value_t = 0)]
    channel: usize,

    /// Data segment index (0-based)
    #[arg(short, long, default_value_t = 0)]
    segment: usize,

    /// Window start in seconds
    #[arg(long)]
    start: Option<f64>,

    /// Window end in seconds
    #[arg(long)]
    end: Option<f64>,

    /// CSV output file (or - for stdout)
    #[arg(short, long, default_value = "-")]
    out: String,

    /// Write the window, all channels, as a new .nsX file instead of CSV
    #[arg(long)]
    extract: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long, default_value_t = false)]
    verb: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let file = NsxFile::open(&cli.input)?;
    let rate = file.sampling_rate()?;

    let (start, end) = match (cli.start, cli.end) {
        (Some(s), Some(e)) => {
            if s < 0.0 || e <= s {
                return Err(format!("invalid time range {}..{}", s, e).into());
            }
            (s, e)
        }
        (None, None) => {
            print_summary(&file, rate)?;
            return Ok(());
        }
        _ => return Err("--start and --end must be given together".into()),
    };

    let first = time_to_sample(start, rate);
    let last = time_to_sample(end, rate);

    if let Some(path) = &cli.extract {
        let frames = file.read_frames(cli.segment, first, last)?;
        let mut out = BufWriter::new(File::create(path)?);
        write_extract(&mut out, &file, cli.segment, first, &frames)?;
        out.flush()?;
        if cli.verb {
            eprintln!(
                "Extracted {} samples x {} channels to {}",
                frames.len() / file.header().channel_count(),
                file.header().channel_count(),
                path.display()
            );
        }
        return Ok(());
    }

    let voltages = file.read_channel(cli.segment, cli.channel, first, last)?;
    if cli.verb {
        eprintln!(
            "Channel {} samples {}..{} ({} read) at {} Hz",
            cli.channel,
            first,
            last,
            voltages.len(),
            rate
        );
    }

    if cli.out == "-" {
        let stdout = io::stdout();
        write_csv(&mut BufWriter::new(stdout.lock()), first, rate, &voltages)?;
    } else {
        write_csv(&mut BufWriter::new(File::create(&cli.out)?), first, rate, &voltages)?;
    }
    Ok(())
}

fn print_summary(file: &NsxFile, rate: f64) -> io::Result<()> {
    let h = file.header();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "File:        {}", file.path().display())?;
    writeln!(out, "Spec:        {}", h.spec)?;
    writeln!(out, "Label:       {}", h.label)?;
    if !h.comment.is_empty() {
        writeln!(out, "Comment:     {}", h.comment)?;
    }
    if let Some(origin) = &h.time_origin {
        writeln!(out, "Started:     {}", origin)?;
    }
    writeln!(out, "Sample rate: {} Hz (period {})", rate, h.period)?;
    writeln!(out, "Channels:    {}", h.channel_count())?;
    for (i, ch) in h.channels.iter().enumerate() {
        writeln!(
            out,
            "  [{:3}] id={:<4} {:<16} {:.4} {}/bit",
            i,
            ch.electrode_id,
            ch.label,
            ch.gain(),
            ch.units
        )?;
    }
    writeln!(out, "Segments:    {}", file.segments().len())?;
    for seg in file.segments() {
        writeln!(
            out,
            "  [{:3}] start={:.4} s  samples={}  packets={}  duration={:.2} s",
            seg.index,
            seg.start_time_s(h.timestamp_resolution),
            seg.num_samples,
            seg.packets,
            seg.num_samples as f64 / rate
        )?;
    }
    Ok(())
}

/// Write `frames`, cut from `segment` starting at sample `first`, as a
/// single-packet file stamped with the time of its first sample.
fn write_extract<W: Write>(
    out: &mut W,
    file: &NsxFile,
    segment: usize,
    first: u64,
    frames: &[i16],
) -> Result<(), NsxError> {
    let header = file.header();
    let seg = file.segment(segment)?;
    write_header(out, header)?;
    write_packet(
        out,
        header.spec,
        header.sample_timestamp(seg.timestamp, first),
        header.channel_count(),
        frames,
    )
}

fn write_csv<W: Write>(out: &mut W, first: u64, rate: f64, voltages: &[f64]) -> io::Result<()> {
    writeln!(out, "time_s,voltage_uv")?;
    for (i, v) in voltages.iter().enumerate() {
        writeln!(out, "{:.6},{:.4}", (first + i as u64) as f64 / rate, v)?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsx_io::{ChannelInfo, FileSpec, NsxHeader};
    use std::io::Cursor;

    #[test]
    fn test_csv_rows() {
        let mut buf = Vec::new();
        write_csv(&mut buf, 1000, 1000.0, &[0.5, -1.25]).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "time_s,voltage_uv\n1.000000,0.5000\n1.001000,-1.2500\n"
        );
    }

    #[test]
    fn test_extract_stamps_first_sample_time() {
        let header = NsxHeader {
            spec: FileSpec::V30,
            label: "1 kS/s".to_string(),
            comment: String::new(),
            period: 30,
            timestamp_resolution: 1_000_000_000,
            time_origin: None,
            channels: vec![ChannelInfo::v21(1)],
            data_offset: 0,
        };
        let samples: Vec<i16> = (0..20).collect();
        let mut src = Vec::new();
        write_header(&mut src, &header).unwrap();
        write_packet(&mut src, FileSpec::V30, 7_000, 1, &samples).unwrap();
        let mut cur = Cursor::new(src);
        let file = NsxFile::from_reader(PathBuf::from("mem.ns2"), &mut cur).unwrap();

        let frames = file.read_frames_from(&mut cur, 0, 5, 10).unwrap();
        let mut out = Vec::new();
        write_extract(&mut out, &file, 0, 5, &frames).unwrap();

        let cut = NsxFile::from_reader(PathBuf::from("cut.ns2"), &mut Cursor::new(out)).unwrap();
        assert_eq!(cut.header().timestamp_resolution, 1_000_000_000);
        assert_eq!(cut.segments()[0].timestamp, 7_000 + 5 * 1_000_000);
        assert_eq!(cut.segment_len(0).unwrap(), 5);
    }
}
