use std::fmt;
use std::io;

/// General errors for this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Open, read, seek or write failure at the OS boundary.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The BMP file header does not start with "BM".
    #[error("invalid BMP signature: expected 0x4D42, found {found:#06X}")]
    InvalidMagic { found: u16 },
    /// The container does not open with a "RIFF" ... "WAVE" header.
    #[error("not a RIFF/WAVE file (chunk id {:?}, format {:?})", FourCc(.chunk_id), FourCc(.format))]
    NotRiffWave { chunk_id: [u8; 4], format: [u8; 4] },
    /// Structurally valid bitmap this decoder does not handle.
    #[error("unsupported BMP format: {0}")]
    UnsupportedFormat(&'static str),
    /// Non-PCM audio or a PCM bit depth outside {8, 16, 32}.
    #[error("unsupported codec: audio format {audio_format}, {bit_depth} bits per sample")]
    UnsupportedCodec { audio_format: u16, bit_depth: u16 },
    /// Anything other than mono or stereo.
    #[error("unsupported channel layout: {0} channels")]
    UnsupportedChannelLayout(u16),
    /// Fewer bytes available than a fixed-size header requires.
    #[error("truncated header: expected {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },
    /// A chunk header or fmt payload ended early.
    #[error("truncated {:?} chunk: expected {expected} bytes, got {actual}", FourCc(.chunk_id))]
    TruncatedChunk {
        chunk_id: [u8; 4],
        expected: usize,
        actual: usize,
    },
    /// Caller-supplied coordinate outside the decoded file.
    #[error("out of range: {0}")]
    OutOfRange(Position),
    /// The stream ended before every required chunk was seen.
    #[error("missing required chunk(s): {0}")]
    MissingChunk(MissingChunks),
}

/// Specialized Result type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Location a caller asked for that lies outside the file's bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Position {
    Pixel {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Time {
        seconds: f64,
        duration: f64,
    },
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Pixel {
                x,
                y,
                width,
                height,
            } => write!(f, "pixel ({x}, {y}) outside {width}x{height} image"),
            Position::Time { seconds, duration } => {
                write!(f, "time {seconds}s outside {duration}s of audio")
            }
        }
    }
}

/// Which of the required WAVE chunks never showed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingChunks {
    Fmt,
    Data,
    Both,
}

impl MissingChunks {
    /// Returns `None` when both chunks were found.
    pub fn from_flags(fmt_seen: bool, data_seen: bool) -> Option<Self> {
        match (fmt_seen, data_seen) {
            (true, true) => None,
            (false, true) => Some(MissingChunks::Fmt),
            (true, false) => Some(MissingChunks::Data),
            (false, false) => Some(MissingChunks::Both),
        }
    }
}

impl fmt::Display for MissingChunks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingChunks::Fmt => f.write_str("'fmt '"),
            MissingChunks::Data => f.write_str("'data'"),
            MissingChunks::Both => f.write_str("'fmt ', 'data'"),
        }
    }
}

/// Debug view of a four-character code, printable bytes shown as text.
pub(crate) struct FourCc<'a>(pub &'a [u8; 4]);

impl fmt::Debug for FourCc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = self
            .0
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        write!(f, "{text:?}")
    }
}
