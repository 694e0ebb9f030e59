use std::fmt::Debug;
use std::fs::File;
use std::io::{Read, Seek};
use std::mem::size_of;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, warn};

use crate::error::{Error, FourCc, MissingChunks, Result};
use crate::source::SourceStream;
use crate::stats::PcmWave;

/// The 12-byte header opening every RIFF/WAVE file.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct RiffHeader {
    chunk_id: [u8; 4],
    chunk_size: u32,
    format: [u8; 4],
}

/// Generic 8-byte chunk header. The declared size excludes these 8 bytes.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct ChunkHeader {
    chunk_id: [u8; 4],
    chunk_size: u32,
}

/// The "fmt " chunk, header included, as laid out on disk.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct FmtChunk {
    chunk_id: [u8; 4],
    chunk_size: u32,
    audio_format: u16,
    channel_num: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bit_depth: u16,
}

const _: () = assert!(size_of::<RiffHeader>() == 12);
const _: () = assert!(size_of::<ChunkHeader>() == 8);
const _: () = assert!(size_of::<FmtChunk>() == 24);

impl RiffHeader {
    pub const SIZE: usize = size_of::<Self>();
    pub const RIFF_ID: [u8; 4] = *b"RIFF";
    pub const WAVE_ID: [u8; 4] = *b"WAVE";

    pub fn chunk_id(&self) -> [u8; 4] {
        self.chunk_id
    }

    /// File size minus the 8 bytes of "RIFF" and this field.
    pub fn chunk_size(&self) -> u32 {
        u32::from_le(self.chunk_size)
    }

    pub fn format(&self) -> [u8; 4] {
        self.format
    }
}

impl ChunkHeader {
    pub const SIZE: usize = size_of::<Self>();

    pub fn chunk_id(&self) -> [u8; 4] {
        self.chunk_id
    }

    pub fn chunk_size(&self) -> u32 {
        u32::from_le(self.chunk_size)
    }
}

impl FmtChunk {
    pub const SIZE: usize = size_of::<Self>();
    pub const ID: [u8; 4] = *b"fmt ";
    /// Bytes of the canonical PCM payload that follow the chunk header.
    pub const PAYLOAD_SIZE: u32 = (Self::SIZE - ChunkHeader::SIZE) as u32;
    pub const PCM: u16 = 1;

    pub fn chunk_size(&self) -> u32 {
        u32::from_le(self.chunk_size)
    }

    pub fn audio_format(&self) -> u16 {
        u16::from_le(self.audio_format)
    }

    pub fn channel_num(&self) -> u16 {
        u16::from_le(self.channel_num)
    }

    pub fn sample_rate(&self) -> u32 {
        u32::from_le(self.sample_rate)
    }

    /// Byte rate as stored in the header, not recomputed.
    pub fn byte_rate(&self) -> u32 {
        u32::from_le(self.byte_rate)
    }

    pub fn block_align(&self) -> u16 {
        u16::from_le(self.block_align)
    }

    pub fn bit_depth(&self) -> u16 {
        u16::from_le(self.bit_depth)
    }

    /// `sample_rate * channel_num * bit_depth / 8`.
    pub fn expected_byte_rate(&self) -> u64 {
        u64::from(self.sample_rate()) * u64::from(self.expected_block_align())
    }

    /// `channel_num * bit_depth / 8`.
    pub fn expected_block_align(&self) -> u32 {
        u32::from(self.channel_num()) * u32::from(self.bit_depth() / 8)
    }

    pub fn is_byte_rate_consistent(&self) -> bool {
        u64::from(self.byte_rate()) == self.expected_byte_rate()
    }

    /// Seconds of audio in `data_size` bytes, using the stored byte rate.
    /// A zero stored rate falls back to the recomputed one; if that is zero too
    /// the duration is zero.
    pub fn duration_seconds(&self, data_size: u32) -> f64 {
        let byte_rate = match self.byte_rate() {
            0 => self.expected_byte_rate(),
            stored => u64::from(stored),
        };
        if byte_rate == 0 {
            return 0.0;
        }
        f64::from(data_size) / byte_rate as f64
    }
}

/// Where the audio payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChunk {
    /// Declared payload length in bytes.
    pub size: u32,
    /// Absolute offset of the first sample byte.
    pub file_offset: u64,
}

impl DataChunk {
    pub const ID: [u8; 4] = *b"data";
}

/// One chunk met during the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: [u8; 4],
    pub size: u32,
    /// Absolute offset of the chunk's 8-byte header.
    pub offset: u64,
}

/// Progress of a [`RiffChunkWalker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    /// Nothing read yet.
    Start,
    /// RIFF header accepted, neither required chunk seen.
    SeekingChunks,
    /// "fmt " seen, "data" still missing.
    FmtFound,
    /// "data" seen, "fmt " still missing.
    DataFound,
    /// Both required chunks seen.
    Done,
    /// A step returned an error. Terminal.
    Failed,
}

/// Walks a RIFF/WAVE container chunk by chunk until both "fmt " and "data" are found.
#[derive(Debug)]
pub struct RiffChunkWalker<R: Read + Seek + Debug> {
    stream: SourceStream<R>,
    state: WalkState,
    riff: Option<RiffHeader>,
    fmt: Option<FmtChunk>,
    data: Option<DataChunk>,
    chunks: Vec<ChunkRecord>,
}

impl RiffChunkWalker<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }
}

impl<R: Read + Seek + Debug> RiffChunkWalker<R> {
    /// Wraps `reader`; nothing is read until the first [`advance`](Self::advance).
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut stream = SourceStream::new(reader)?;
        stream.seek_to(0)?;
        Ok(Self {
            stream,
            state: WalkState::Start,
            riff: None,
            fmt: None,
            data: None,
            chunks: Vec::new(),
        })
    }

    pub fn state(&self) -> WalkState {
        self.state
    }

    /// Chunks visited so far, in file order.
    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    /// Performs one transition of the walk and returns the new state.
    ///
    /// Any error moves the walker to `Failed`, after which `advance` keeps
    /// returning `Ok(WalkState::Failed)` without touching the stream.
    pub fn advance(&mut self) -> Result<WalkState> {
        let step = match self.state {
            WalkState::Start => self.read_riff_header(),
            WalkState::SeekingChunks | WalkState::FmtFound | WalkState::DataFound => {
                self.read_next_chunk()
            }
            WalkState::Done | WalkState::Failed => return Ok(self.state),
        };
        match step {
            Ok(next) => {
                self.state = next;
                Ok(next)
            }
            Err(e) => {
                self.state = WalkState::Failed;
                Err(e)
            }
        }
    }

    /// Runs the walk to completion.
    ///
    /// # Errors
    /// - `NotRiffWave` if the file does not open with "RIFF" ... "WAVE".
    /// - `TruncatedChunk` if a chunk header or the fmt payload is cut short.
    /// - `MissingChunk` if the stream ends before both required chunks are seen.
    pub fn walk(mut self) -> Result<WaveFile<R>> {
        while self.advance()? != WalkState::Done {
            if self.state == WalkState::Failed {
                // Only reachable when walk is called on an already failed walker.
                return Err(Error::MissingChunk(self.missing().unwrap_or(MissingChunks::Both)));
            }
        }

        let (Some(riff), Some(fmt), Some(data)) = (self.riff, self.fmt, self.data) else {
            return Err(Error::MissingChunk(self.missing().unwrap_or(MissingChunks::Both)));
        };
        Ok(WaveFile {
            stream: self.stream,
            riff,
            fmt,
            data,
            chunks: self.chunks,
        })
    }

    fn missing(&self) -> Option<MissingChunks> {
        MissingChunks::from_flags(self.fmt.is_some(), self.data.is_some())
    }

    fn read_riff_header(&mut self) -> Result<WalkState> {
        let riff: RiffHeader = self.stream.read_pod(|expected, actual| Error::TruncatedChunk {
            chunk_id: RiffHeader::RIFF_ID,
            expected,
            actual,
        })?;
        if riff.chunk_id() != RiffHeader::RIFF_ID || riff.format() != RiffHeader::WAVE_ID {
            return Err(Error::NotRiffWave {
                chunk_id: riff.chunk_id(),
                format: riff.format(),
            });
        }
        debug!(riff_size = riff.chunk_size(), "RIFF/WAVE header accepted");
        self.riff = Some(riff);
        Ok(WalkState::SeekingChunks)
    }

    /// Reads one chunk header and dispatches on its id.
    fn read_next_chunk(&mut self) -> Result<WalkState> {
        let offset = self.stream.position();
        let mut raw = [0u8; ChunkHeader::SIZE];
        let read = self.stream.read_fill(&mut raw)?;
        if read == 0 {
            let missing = self.missing().unwrap_or(MissingChunks::Both);
            debug!(%missing, "end of stream before required chunks");
            return Err(Error::MissingChunk(missing));
        }
        if read < ChunkHeader::SIZE {
            let mut chunk_id = [0u8; 4];
            let id_len = read.min(4);
            chunk_id[..id_len].copy_from_slice(&raw[..id_len]);
            return Err(Error::TruncatedChunk {
                chunk_id,
                expected: ChunkHeader::SIZE,
                actual: read,
            });
        }

        let header: ChunkHeader = bytemuck::cast(raw);
        let (chunk_id, chunk_size) = (header.chunk_id(), header.chunk_size());
        self.chunks.push(ChunkRecord {
            id: chunk_id,
            size: chunk_size,
            offset,
        });
        self.check_riff_bounds(&chunk_id, chunk_size);

        match &chunk_id {
            b"fmt " if self.fmt.is_none() => self.read_fmt_chunk(chunk_size)?,
            b"data" if self.data.is_none() => self.record_data_chunk(chunk_size)?,
            b"fmt " | b"data" => {
                warn!(chunk = ?FourCc(&chunk_id), "duplicate chunk skipped, keeping the first");
                self.skip_payload(chunk_size, 0)?;
            }
            _ => {
                debug!(chunk = ?FourCc(&chunk_id), size = chunk_size, "unknown chunk skipped");
                self.skip_payload(chunk_size, 0)?;
            }
        }

        Ok(match (self.fmt.is_some(), self.data.is_some()) {
            (true, true) => WalkState::Done,
            (true, false) => WalkState::FmtFound,
            (false, true) => WalkState::DataFound,
            (false, false) => WalkState::SeekingChunks,
        })
    }

    fn read_fmt_chunk(&mut self, chunk_size: u32) -> Result<()> {
        if chunk_size < FmtChunk::PAYLOAD_SIZE {
            return Err(Error::TruncatedChunk {
                chunk_id: FmtChunk::ID,
                expected: FmtChunk::PAYLOAD_SIZE as usize,
                actual: chunk_size as usize,
            });
        }

        // Re-read from the chunk id so the whole struct comes in one piece.
        self.stream.rewind_by(ChunkHeader::SIZE as u64)?;
        let fmt: FmtChunk = self.stream.read_pod(|expected, actual| Error::TruncatedChunk {
            chunk_id: FmtChunk::ID,
            expected,
            actual,
        })?;
        debug!(
            audio_format = fmt.audio_format(),
            channels = fmt.channel_num(),
            sample_rate = fmt.sample_rate(),
            byte_rate = fmt.byte_rate(),
            block_align = fmt.block_align(),
            bit_depth = fmt.bit_depth(),
            "fmt chunk read"
        );
        if !fmt.is_byte_rate_consistent() {
            warn!(
                stored = fmt.byte_rate(),
                expected = fmt.expected_byte_rate(),
                "fmt byte rate disagrees with sample_rate * block size"
            );
        }

        self.fmt = Some(fmt);
        self.skip_payload(chunk_size, FmtChunk::PAYLOAD_SIZE)
    }

    fn record_data_chunk(&mut self, chunk_size: u32) -> Result<()> {
        let data = DataChunk {
            size: chunk_size,
            file_offset: self.stream.position(),
        };
        debug!(size = data.size, offset = data.file_offset, "data chunk found");
        self.data = Some(data);

        // The payload only has to be stepped over if "fmt " is still ahead of us.
        if self.fmt.is_none() {
            self.skip_payload(chunk_size, 0)?;
        }
        Ok(())
    }

    /// Skips what is left of a chunk after `consumed` payload bytes, plus the
    /// pad byte that follows odd-sized chunks.
    fn skip_payload(&mut self, chunk_size: u32, consumed: u32) -> Result<()> {
        let remaining = u64::from(chunk_size.saturating_sub(consumed));
        let pad = u64::from(chunk_size & 1);
        self.stream.skip(remaining + pad)
    }

    fn check_riff_bounds(&self, chunk_id: &[u8; 4], chunk_size: u32) {
        let Some(riff) = &self.riff else { return };
        let riff_end = 8 + u64::from(riff.chunk_size());
        let chunk_end = self.stream.position() + u64::from(chunk_size);
        if chunk_end > riff_end {
            warn!(
                chunk = ?FourCc(chunk_id),
                chunk_end,
                riff_end,
                "chunk runs past the declared RIFF size"
            );
        }
    }
}

/// Mono or stereo integer PCM the sample scanner accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u16,
    pub bit_depth: u16,
    pub sample_rate: u32,
    /// Stored header value.
    pub byte_rate: u32,
}

impl PcmFormat {
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bit_depth / 8)
    }

    /// Bytes per frame, computed rather than taken from `block_align`.
    pub fn frame_len(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }
}

/// A successfully walked RIFF/WAVE file. Owns the stream.
#[derive(Debug)]
pub struct WaveFile<R: Read + Seek + Debug> {
    stream: SourceStream<R>,
    riff: RiffHeader,
    fmt: FmtChunk,
    data: DataChunk,
    chunks: Vec<ChunkRecord>,
}

impl WaveFile<File> {
    /// Opens `path` and walks it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        RiffChunkWalker::open(path)?.walk()
    }
}

impl<R: Read + Seek + Debug> WaveFile<R> {
    const SUPPORTED_BIT_DEPTHS: [u16; 3] = [8, 16, 32];

    pub fn riff(&self) -> &RiffHeader {
        &self.riff
    }

    pub fn fmt(&self) -> &FmtChunk {
        &self.fmt
    }

    pub fn data(&self) -> DataChunk {
        self.data
    }

    /// Chunks visited during the walk, in file order.
    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    /// `data_size / byte_rate`, see [`FmtChunk::duration_seconds`].
    pub fn duration_seconds(&self) -> f64 {
        self.fmt.duration_seconds(self.data.size)
    }

    /// Checks the format without giving up the stream.
    ///
    /// # Errors
    /// - `UnsupportedCodec` unless the audio is PCM with 8, 16 or 32 bits per sample.
    /// - `UnsupportedChannelLayout` unless there are 1 or 2 channels.
    pub fn pcm_format(&self) -> Result<PcmFormat> {
        let fmt = &self.fmt;
        if fmt.audio_format() != FmtChunk::PCM
            || !Self::SUPPORTED_BIT_DEPTHS.contains(&fmt.bit_depth())
        {
            return Err(Error::UnsupportedCodec {
                audio_format: fmt.audio_format(),
                bit_depth: fmt.bit_depth(),
            });
        }
        if !matches!(fmt.channel_num(), 1 | 2) {
            return Err(Error::UnsupportedChannelLayout(fmt.channel_num()));
        }
        Ok(PcmFormat {
            channels: fmt.channel_num(),
            bit_depth: fmt.bit_depth(),
            sample_rate: fmt.sample_rate(),
            byte_rate: fmt.byte_rate(),
        })
    }

    /// Validates the format and hands the stream over for sample access.
    pub fn validate(self) -> Result<PcmWave<R>> {
        let format = self.pcm_format()?;
        if self.data.size as usize % format.frame_len() != 0 {
            warn!(
                data_size = self.data.size,
                frame_len = format.frame_len(),
                "data size is not a whole number of frames"
            );
        }
        PcmWave::new(self.stream, format, self.data, self.fmt)
    }
}
