//! Random-access decoding of uncompressed BMP images and RIFF/WAVE audio.
//!
//! Each decoder owns its stream: [`BmpDecoder`] reads both bitmap headers once and
//! then seeks straight to any pixel, [`RiffChunkWalker`] walks a WAVE container
//! until it has the "fmt " and "data" chunks, and [`SampleStatsScanner`] makes one
//! pass over the PCM payload.
//!
//! ```no_run
//! use media_probe::{RiffChunkWalker, SampleStatsScanner};
//!
//! # fn main() -> media_probe::Result<()> {
//! let wave = RiffChunkWalker::open("input.wav")?.walk()?;
//! let stats = SampleStatsScanner::new(wave.validate()?).scan()?;
//! println!("peak L: {}", stats.channels[0].peak);
//! # Ok(())
//! # }
//! ```

pub mod bmp;
pub mod error;
pub mod riff;
pub mod source;
pub mod stats;

pub use bmp::{to_grayscale, BmpDecoder, BmpFileHeader, BmpInfoHeader, Pixel, RowLayout};
pub use error::{Error, MissingChunks, Position, Result};
pub use fallible_streaming_iterator::FallibleStreamingIterator;
pub use riff::{
    ChunkRecord, DataChunk, FmtChunk, PcmFormat, RiffChunkWalker, RiffHeader, WalkState,
    WaveFile,
};
pub use source::SourceStream;
pub use stats::{
    ChannelStats, Frames, PcmDecoder, PcmWave, SampleDecode, SampleStats, SampleStatsScanner,
};
