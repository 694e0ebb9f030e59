use std::fmt::Debug;
use std::io::{self, Read, Seek};

use aligned_vec::{avec, AVec};
use enum_dispatch::enum_dispatch;
use fallible_streaming_iterator::FallibleStreamingIterator;
use tracing::{debug, warn};

use crate::error::{Error, Position, Result};
use crate::riff::{DataChunk, FmtChunk, PcmFormat};
use crate::source::SourceStream;

/// Frames decoded per buffer refill.
pub const FRAMES_PER_BATCH: usize = 1024;

// --- Sample Decoding ---

/// Decodes little-endian PCM bytes into signed, zero-centred samples.
#[enum_dispatch]
pub trait SampleDecode {
    fn bytes_per_sample(&self) -> usize;

    /// `raw.len()` must equal `out.len() * bytes_per_sample()`.
    fn decode(&self, raw: &[u8], out: &mut [i32]);
}

/// Unsigned 8-bit PCM, 128 is silence.
#[derive(Debug, Clone, Copy)]
pub struct Unsigned8;

#[derive(Debug, Clone, Copy)]
pub struct Signed16;

#[derive(Debug, Clone, Copy)]
pub struct Signed32;

impl SampleDecode for Unsigned8 {
    fn bytes_per_sample(&self) -> usize {
        1
    }

    #[inline]
    fn decode(&self, raw: &[u8], out: &mut [i32]) {
        debug_assert_eq!(raw.len(), out.len());
        for (dst, &byte) in out.iter_mut().zip(raw) {
            *dst = i32::from(byte) - 128;
        }
    }
}

impl SampleDecode for Signed16 {
    fn bytes_per_sample(&self) -> usize {
        2
    }

    #[inline]
    fn decode(&self, raw: &[u8], out: &mut [i32]) {
        debug_assert_eq!(raw.len(), out.len() * 2);
        for (dst, src) in out.iter_mut().zip(raw.chunks_exact(2)) {
            *dst = i32::from(i16::from_le_bytes([src[0], src[1]]));
        }
    }
}

impl SampleDecode for Signed32 {
    fn bytes_per_sample(&self) -> usize {
        4
    }

    #[inline]
    fn decode(&self, raw: &[u8], out: &mut [i32]) {
        debug_assert_eq!(raw.len(), out.len() * 4);
        for (dst, src) in out.iter_mut().zip(raw.chunks_exact(4)) {
            *dst = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        }
    }
}

#[enum_dispatch(SampleDecode)]
#[derive(Debug, Clone, Copy)]
pub enum PcmDecoder {
    Unsigned8,
    Signed16,
    Signed32,
}

impl PcmDecoder {
    pub fn for_bit_depth(bit_depth: u16) -> Option<Self> {
        match bit_depth {
            8 => Some(Unsigned8.into()),
            16 => Some(Signed16.into()),
            32 => Some(Signed32.into()),
            _ => None,
        }
    }
}

// --- Validated Wave ---

/// A walked and validated PCM wave file. Owns the stream for sample access.
#[derive(Debug)]
pub struct PcmWave<R: Read + Seek + Debug> {
    stream: SourceStream<R>,
    format: PcmFormat,
    data: DataChunk,
    fmt: FmtChunk,
    decoder: PcmDecoder,
}

impl<R: Read + Seek + Debug> PcmWave<R> {
    pub(crate) fn new(
        stream: SourceStream<R>,
        format: PcmFormat,
        data: DataChunk,
        fmt: FmtChunk,
    ) -> Result<Self> {
        let decoder =
            PcmDecoder::for_bit_depth(format.bit_depth).ok_or(Error::UnsupportedCodec {
                audio_format: fmt.audio_format(),
                bit_depth: format.bit_depth,
            })?;
        Ok(Self {
            stream,
            format,
            data,
            fmt,
            decoder,
        })
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn data(&self) -> DataChunk {
        self.data
    }

    pub fn fmt(&self) -> &FmtChunk {
        &self.fmt
    }

    /// Whole frames declared by the data chunk. A trailing partial frame is ignored.
    pub fn frame_count(&self) -> u64 {
        u64::from(self.data.size) / self.format.frame_len() as u64
    }

    pub fn duration_seconds(&self) -> f64 {
        self.fmt.duration_seconds(self.data.size)
    }

    /// Streams every frame of the data chunk in file order.
    pub fn frames(&mut self) -> Result<Frames<'_, R>> {
        self.stream.seek_to(self.data.file_offset)?;
        Ok(Frames::new(
            &mut self.stream,
            self.decoder,
            self.format,
            u64::from(self.data.size),
        ))
    }

    /// Reads the frame at `floor(seconds * sample_rate)`.
    ///
    /// # Errors
    /// `OutOfRange` if `seconds` is negative, not finite, or at or past the end
    /// of the data. A data chunk that claims more bytes than the file holds gives
    /// an `Io` error of kind `UnexpectedEof`.
    pub fn frame_at(&mut self, seconds: f64) -> Result<Vec<i32>> {
        let index = self.frame_index(seconds)?;
        if index >= self.frame_count() {
            return Err(self.time_out_of_range(seconds));
        }
        self.read_frames(index, 1)
    }

    /// Reads the frames from `start` up to, not including, `end`, keeping at most
    /// `limit` of them.
    ///
    /// Both times map to frame indices with `floor(seconds * sample_rate)`, so
    /// `start == end` is an empty range.
    ///
    /// # Errors
    /// `OutOfRange` if either time is negative or not finite, if `start > end`,
    /// or if `end` lies past the end of the data.
    pub fn frames_between(&mut self, start: f64, end: f64, limit: usize) -> Result<Vec<Vec<i32>>> {
        let first = self.frame_index(start)?;
        let last = self.frame_index(end)?;
        if start > end {
            return Err(self.time_out_of_range(start));
        }
        if last > self.frame_count() {
            return Err(self.time_out_of_range(end));
        }

        let count = (last - first).min(limit as u64);
        let samples = self.read_frames(first, count)?;
        Ok(samples
            .chunks_exact(usize::from(self.format.channels))
            .map(<[i32]>::to_vec)
            .collect())
    }

    fn time_out_of_range(&self, seconds: f64) -> Error {
        Error::OutOfRange(Position::Time {
            seconds,
            duration: self.duration_seconds(),
        })
    }

    fn frame_index(&self, seconds: f64) -> Result<u64> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(self.time_out_of_range(seconds));
        }
        Ok((seconds * f64::from(self.format.sample_rate)).floor() as u64)
    }

    /// Decodes `count` consecutive frames starting at frame `index`, interleaved.
    fn read_frames(&mut self, index: u64, count: u64) -> Result<Vec<i32>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let frame_len = self.format.frame_len();
        self.stream
            .seek_to(self.data.file_offset + index * frame_len as u64)?;

        let mut raw = vec![0u8; count as usize * frame_len];
        if self.stream.read_fill(&mut raw)? < raw.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "data chunk ends before the requested frame",
            )
            .into());
        }

        let mut samples = vec![0i32; count as usize * usize::from(self.format.channels)];
        self.decoder.decode(&raw, &mut samples);
        Ok(samples)
    }
}

// --- Frame Iterator ---

/// Streams frames as `[i32]` slices of normalized samples, one per channel.
///
/// Raw bytes are read in batches of [`FRAMES_PER_BATCH`] frames. The iterator
/// ends at the declared end of the data chunk or at end of stream, whichever
/// comes first.
pub struct Frames<'a, R: Read + Seek + Debug> {
    stream: &'a mut SourceStream<R>,
    decoder: PcmDecoder,
    channels: usize,
    frame_len: usize,
    raw: AVec<u8>,
    samples: AVec<i32>,
    // Frames decoded into `samples` by the last refill.
    batch_frames: usize,
    cursor: Option<usize>,
    remaining: u64,
    exhausted: bool,
}

impl<'a, R: Read + Seek + Debug> Frames<'a, R> {
    fn new(
        stream: &'a mut SourceStream<R>,
        decoder: PcmDecoder,
        format: PcmFormat,
        data_size: u64,
    ) -> Self {
        let channels = usize::from(format.channels);
        let frame_len = decoder.bytes_per_sample() * channels;
        Self {
            stream,
            decoder,
            channels,
            frame_len,
            raw: avec![0u8; FRAMES_PER_BATCH * frame_len],
            samples: avec![0i32; FRAMES_PER_BATCH * channels],
            batch_frames: 0,
            cursor: None,
            remaining: data_size,
            exhausted: false,
        }
    }

    fn refill(&mut self) -> Result<()> {
        self.batch_frames = 0;
        if self.exhausted {
            return Ok(());
        }

        let wanted = self.remaining.min(self.raw.len() as u64) as usize;
        let wanted = wanted - wanted % self.frame_len;
        if wanted == 0 {
            self.exhausted = true;
            return Ok(());
        }

        let got = self.stream.read_fill(&mut self.raw[..wanted])?;
        self.remaining -= wanted as u64;
        if got < wanted {
            warn!(
                missing_bytes = self.remaining + (wanted - got) as u64,
                "stream ended before the declared end of the data chunk"
            );
            self.exhausted = true;
        }

        let frames = got / self.frame_len;
        let samples = frames * self.channels;
        self.decoder
            .decode(&self.raw[..frames * self.frame_len], &mut self.samples[..samples]);
        self.batch_frames = frames;
        Ok(())
    }
}

impl<'a, R: Read + Seek + Debug> FallibleStreamingIterator for Frames<'a, R> {
    type Item = [i32];
    type Error = Error;

    fn advance(&mut self) -> std::result::Result<(), Self::Error> {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next < self.batch_frames {
            self.cursor = Some(next);
            return Ok(());
        }

        self.refill()?;
        self.cursor = (self.batch_frames > 0).then_some(0);
        Ok(())
    }

    fn get(&self) -> Option<&Self::Item> {
        let cursor = self.cursor?;
        let start = cursor * self.channels;
        Some(&self.samples[start..start + self.channels])
    }
}

// --- Statistics ---

/// `true` when the signal changes sign between two consecutive samples.
///
/// Landing on zero counts once and leaving zero does not, so `-1, 0, 1` is one
/// crossing and `0, 0` is none.
#[inline]
pub fn is_zero_crossing(previous: i32, current: i32) -> bool {
    (previous < 0 && current >= 0) || (previous > 0 && current <= 0)
}

#[derive(Debug, Default, Clone, Copy)]
struct ChannelAccumulator {
    peak: u32,
    zero_crossings: u64,
    sum_squares: f64,
    previous: i32,
}

impl ChannelAccumulator {
    #[inline]
    fn push(&mut self, sample: i32) {
        self.peak = self.peak.max(sample.unsigned_abs());
        if is_zero_crossing(self.previous, sample) {
            self.zero_crossings += 1;
        }
        let s = f64::from(sample);
        self.sum_squares += s * s;
        self.previous = sample;
    }

    fn finish(self, frames: u64) -> ChannelStats {
        let rms = if frames == 0 {
            0.0
        } else {
            (self.sum_squares / frames as f64).sqrt()
        };
        ChannelStats {
            peak: self.peak,
            zero_crossings: self.zero_crossings,
            rms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    /// Largest absolute normalized sample.
    pub peak: u32,
    pub zero_crossings: u64,
    pub rms: f64,
}

/// Result of one full pass over the data chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStats {
    /// One entry per channel, left first.
    pub channels: Vec<ChannelStats>,
    /// Frames actually read.
    pub frames: u64,
    pub duration_seconds: f64,
    /// Declared data chunk size.
    pub data_size: u32,
}

/// Computes peak, zero crossings and RMS per channel in a single pass.
#[derive(Debug)]
pub struct SampleStatsScanner<R: Read + Seek + Debug> {
    wave: PcmWave<R>,
}

impl<R: Read + Seek + Debug> SampleStatsScanner<R> {
    pub fn new(wave: PcmWave<R>) -> Self {
        Self { wave }
    }

    /// Scans the whole data chunk. Any I/O error discards what was accumulated.
    pub fn scan(&mut self) -> Result<SampleStats> {
        let channels = usize::from(self.wave.format().channels);
        let mut accumulators = vec![ChannelAccumulator::default(); channels];
        let mut frame_count = 0u64;

        let mut frames = self.wave.frames()?;
        while let Some(frame) = frames.next()? {
            for (acc, &sample) in accumulators.iter_mut().zip(frame) {
                acc.push(sample);
            }
            frame_count += 1;
        }

        let expected = self.wave.frame_count();
        if frame_count < expected {
            debug!(frame_count, expected, "scan stopped at end of stream");
        }

        Ok(SampleStats {
            channels: accumulators
                .into_iter()
                .map(|acc| acc.finish(frame_count))
                .collect(),
            frames: frame_count,
            duration_seconds: self.wave.duration_seconds(),
            data_size: self.wave.data().size,
        })
    }

    pub fn wave_mut(&mut self) -> &mut PcmWave<R> {
        &mut self.wave
    }

    pub fn into_inner(self) -> PcmWave<R> {
        self.wave
    }
}
