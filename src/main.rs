use std::fmt::Debug;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use media_probe::{
    BmpDecoder, ChunkRecord, FmtChunk, Pixel, SampleStats, SampleStatsScanner, WaveFile,
};

/// Inspect uncompressed BMP images and PCM WAVE files.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// BMP image tools.
    #[command(subcommand)]
    Bmp(BmpCommand),
    /// RIFF/WAVE audio tools.
    #[command(subcommand)]
    Wav(WavCommand),
}

#[derive(Subcommand, Debug)]
enum BmpCommand {
    /// Print the file and info headers.
    Info(FileArg),
    /// Print one pixel. (0, 0) is the top-left corner.
    Pixel {
        file: PathBuf,
        x: u32,
        y: u32,
    },
    /// Print every pixel in on-disk row order.
    Dump(FileArg),
    /// Write a grayscale copy of a 24- or 32-bit image.
    Gray { file: PathBuf, out: PathBuf },
}

#[derive(Subcommand, Debug)]
enum WavCommand {
    /// List chunks and print the format.
    Info(FileArg),
    /// Format plus peak, zero crossings and RMS per channel.
    Stats(FileArg),
    /// Print the frame at a point in time.
    Sample { file: PathBuf, seconds: f64 },
    /// Print the frames from START up to END seconds.
    Range {
        file: PathBuf,
        start: f64,
        end: f64,
        /// Print at most this many frames.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct FileArg {
    file: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut out = BufWriter::new(io::stdout().lock());
    match cli.command {
        Command::Bmp(cmd) => run_bmp(cmd, &mut out)?,
        Command::Wav(cmd) => run_wav(cmd, &mut out)?,
    }
    out.flush()?;
    Ok(())
}

// --- BMP ---

fn open_bmp(path: &Path) -> Result<BmpDecoder<std::fs::File>> {
    BmpDecoder::open(path).with_context(|| format!("Unable to decode BMP file: {}", path.display()))
}

fn run_bmp<W: Write>(cmd: BmpCommand, out: &mut W) -> Result<()> {
    match cmd {
        BmpCommand::Info(arg) => {
            let bmp = open_bmp(&arg.file)?;
            write_bmp_info(out, &bmp)?;
        }
        BmpCommand::Pixel { file, x, y } => {
            let mut bmp = open_bmp(&file)?;
            let pixel = bmp
                .get_pixel(x, y)
                .with_context(|| format!("Unable to read pixel ({x}, {y})"))?;
            write_pixel(out, x, y, pixel)?;
        }
        BmpCommand::Dump(arg) => {
            let mut bmp = open_bmp(&arg.file)?;
            writeln!(out, "=== All Pixels ===")?;
            let mut write_result = Ok(());
            bmp.for_each_pixel(|x, y, p| {
                if write_result.is_ok() {
                    write_result = writeln!(out, "({x}, {y}): R={} G={} B={}", p.red, p.green, p.blue);
                }
            })
            .context("Failed while reading pixel data")?;
            write_result?;
        }
        BmpCommand::Gray { file, out: dest } => {
            let mut bmp = open_bmp(&file)?;
            bmp.save_grayscale(&dest)
                .with_context(|| format!("Unable to write grayscale image: {}", dest.display()))?;
            writeln!(out, "Grayscale image written to {}", dest.display())?;
        }
    }
    Ok(())
}

fn write_bmp_info<W: Write, R: io::Read + io::Seek + Debug>(out: &mut W, bmp: &BmpDecoder<R>) -> io::Result<()> {
    let file = bmp.file_header();
    let info = bmp.info_header();
    let layout = bmp.row_layout();
    let (x_ppm, y_ppm) = info.resolution();
    writeln!(out, "=== BMP File Information ===")?;
    writeln!(out, "File size: {} bytes", file.file_size())?;
    writeln!(out, "Dimensions: {} x {} pixels", bmp.width(), bmp.height())?;
    writeln!(out, "Bit per pixels: {}", bmp.bit_depth())?;
    writeln!(out, "Compression: {}", info.compression())?;
    writeln!(out, "Data offset: {} bytes", file.pixel_data_offset())?;
    writeln!(out, "Image size: {} bytes", info.image_size())?;
    writeln!(out, "Resolution: {x_ppm} x {y_ppm} pixels/meter")?;
    writeln!(
        out,
        "Row size: {} bytes + {} padding",
        layout.row_size, layout.padding
    )
}

fn write_pixel<W: Write>(out: &mut W, x: u32, y: u32, p: Pixel) -> io::Result<()> {
    writeln!(out, "Pixel at ({x}, {y}):")?;
    writeln!(out, "  Red:   {:3} (0x{:02X})", p.red, p.red)?;
    writeln!(out, "  Green: {:3} (0x{:02X})", p.green, p.green)?;
    writeln!(out, "  Blue:  {:3} (0x{:02X})", p.blue, p.blue)
}

// --- WAV ---

fn open_wav(path: &Path) -> Result<WaveFile<std::fs::File>> {
    WaveFile::open(path).with_context(|| format!("Unable to parse WAVE file: {}", path.display()))
}

fn run_wav<W: Write>(cmd: WavCommand, out: &mut W) -> Result<()> {
    match cmd {
        WavCommand::Info(arg) => {
            let wave = open_wav(&arg.file)?;
            write_chunks(out, wave.chunks())?;
            write_wav_info(out, wave.fmt(), wave.data().size, wave.duration_seconds())?;
        }
        WavCommand::Stats(arg) => {
            let wave = open_wav(&arg.file)?;
            write_wav_info(out, wave.fmt(), wave.data().size, wave.duration_seconds())?;
            let pcm = wave.validate().context("Sample statistics need mono or stereo PCM")?;
            let stats = SampleStatsScanner::new(pcm)
                .scan()
                .context("Failed while scanning samples")?;
            write_stats(out, &stats)?;
        }
        WavCommand::Sample { file, seconds } => {
            let mut pcm = open_wav(&file)?
                .validate()
                .context("Sample access needs mono or stereo PCM")?;
            let frame = pcm
                .frame_at(seconds)
                .with_context(|| format!("Unable to read the sample at {seconds}s"))?;
            write!(out, "Sample at {seconds}s:")?;
            write_frame(out, &frame)?;
        }
        WavCommand::Range {
            file,
            start,
            end,
            limit,
        } => {
            let mut pcm = open_wav(&file)?
                .validate()
                .context("Sample access needs mono or stereo PCM")?;
            let first = (start * f64::from(pcm.format().sample_rate)).floor() as u64;
            let last = (end * f64::from(pcm.format().sample_rate)).floor() as u64;
            let frames = pcm
                .frames_between(start, end, limit)
                .with_context(|| format!("Unable to read samples from {start}s to {end}s"))?;
            writeln!(out, "=== Samples {start}s to {end}s ===")?;
            for (index, frame) in (first..).zip(&frames) {
                write!(out, "Frame {index}:")?;
                write_frame(out, frame)?;
            }
            let total = last.saturating_sub(first);
            if total > frames.len() as u64 {
                writeln!(out, "({} of {total} frames shown, raise --limit for more)", frames.len())?;
            }
        }
    }
    Ok(())
}

fn write_frame<W: Write>(out: &mut W, frame: &[i32]) -> io::Result<()> {
    for (label, value) in channel_labels(frame.len()).iter().zip(frame) {
        write!(out, " {label}={value}")?;
    }
    writeln!(out)
}

fn channel_labels(channels: usize) -> &'static [&'static str] {
    match channels {
        1 => &["M"],
        _ => &["L", "R"],
    }
}

fn write_chunks<W: Write>(out: &mut W, chunks: &[ChunkRecord]) -> io::Result<()> {
    for chunk in chunks {
        writeln!(
            out,
            "Found chunk: {} (size: {} bytes, offset: {})",
            String::from_utf8_lossy(&chunk.id),
            chunk.size,
            chunk.offset
        )?;
    }
    Ok(())
}

fn write_wav_info<W: Write>(
    out: &mut W,
    fmt: &FmtChunk,
    data_size: u32,
    duration: f64,
) -> io::Result<()> {
    let codec = if fmt.audio_format() == FmtChunk::PCM { "PCM" } else { "non-PCM" };
    let layout = match fmt.channel_num() {
        1 => "Mono",
        2 => "Stereo",
        _ => "Multichannel",
    };
    writeln!(out, "=== WAV File Information ===")?;
    writeln!(out, "Audio format: {} ({codec})", fmt.audio_format())?;
    writeln!(out, "Channels: {} ({layout})", fmt.channel_num())?;
    writeln!(out, "Sample rate: {} Hz", fmt.sample_rate())?;
    writeln!(out, "Bits per sample: {}", fmt.bit_depth())?;
    writeln!(out, "Byte rate: {} bytes/s", fmt.byte_rate())?;
    if !fmt.is_byte_rate_consistent() {
        writeln!(out, "  (expected {} bytes/s)", fmt.expected_byte_rate())?;
    }
    writeln!(out, "Block align: {} bytes", fmt.block_align())?;
    writeln!(out, "Data size: {data_size} bytes")?;
    writeln!(out, "Duration: {duration:.2} seconds")
}

fn write_stats<W: Write>(out: &mut W, stats: &SampleStats) -> io::Result<()> {
    let labels = channel_labels(stats.channels.len());
    writeln!(out, "Frames: {}", stats.frames)?;
    for (label, ch) in labels.iter().zip(&stats.channels) {
        writeln!(out, "Max sample {label}: {}", ch.peak)?;
    }
    for (label, ch) in labels.iter().zip(&stats.channels) {
        writeln!(out, "Zero cross count {label}: {}", ch.zero_crossings)?;
    }
    for (label, ch) in labels.iter().zip(&stats.channels) {
        writeln!(out, "RMS {label}: {:.2}", ch.rms)?;
    }
    Ok(())
}
