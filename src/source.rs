use std::fmt::Debug;
use std::io::{self, BufReader, Read, Seek, SeekFrom};

use bytemuck::Pod;

use crate::error::{Error, Result};

/// A buffered, exclusively owned source stream that tracks its absolute position.
///
/// Every decoder in this crate takes ownership of one of these, so no caller can
/// move the cursor between a decoder's seeks and reads.
#[derive(Debug)]
pub struct SourceStream<R: Read + Seek + Debug> {
    reader: BufReader<R>,
    abs_pos: u64,
}

impl<R: Read + Seek + Debug> SourceStream<R> {
    /// Buffer size for the underlying `BufReader`.
    pub const BUFFER_CAPACITY: usize = 1024 * 16;

    /// Wraps `reader`, recording its current position as the starting point.
    pub fn new(mut reader: R) -> Result<Self> {
        let abs_pos = reader.stream_position()?;
        Ok(Self {
            reader: BufReader::with_capacity(Self::BUFFER_CAPACITY, reader),
            abs_pos,
        })
    }

    /// Reads until `buf` is full or the stream is exhausted.
    /// Returns the number of bytes read; fewer than `buf.len()` means end of stream.
    pub fn read_fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.abs_pos += filled as u64;
        Ok(filled)
    }

    /// Reads a fixed-layout structure straight from the stream.
    ///
    /// A short read is turned into an error by `on_short(expected, actual)`, which
    /// lets each caller pick the truncation variant that fits what it was reading.
    pub fn read_pod<T, F>(&mut self, on_short: F) -> Result<T>
    where
        T: Pod,
        F: FnOnce(usize, usize) -> Error,
    {
        let mut value = T::zeroed();
        let bytes = bytemuck::bytes_of_mut(&mut value);
        let expected = bytes.len();
        let actual = self.read_fill(bytes)?;
        if actual < expected {
            return Err(on_short(expected, actual));
        }
        Ok(value)
    }

    /// Skips `n` bytes forward. Zero is a no-op.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let offset = i64::try_from(n)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "skip distance overflows i64"))?;
        self.reader.seek_relative(offset)?;
        self.abs_pos += n;
        Ok(())
    }

    /// Steps back `n` bytes over data that was just read.
    pub fn rewind_by(&mut self, n: u64) -> Result<()> {
        if n > self.abs_pos {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot seek before the start of the stream",
            )
            .into());
        }
        self.reader.seek_relative(-(n as i64))?;
        self.abs_pos -= n;
        Ok(())
    }

    /// Seeks to an absolute offset from the start of the stream.
    pub fn seek_to(&mut self, offset: u64) -> Result<u64> {
        let new_pos = self.reader.seek(SeekFrom::Start(offset))?;
        self.abs_pos = new_pos;
        Ok(new_pos)
    }

    /// Total length of the underlying stream. The read position is left unchanged.
    pub fn stream_len(&mut self) -> Result<u64> {
        let len = self.reader.seek(SeekFrom::End(0))?;
        self.reader.seek(SeekFrom::Start(self.abs_pos))?;
        Ok(len)
    }

    /// Returns the current absolute position in the stream.
    pub fn position(&self) -> u64 {
        self.abs_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Debug, Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
    #[repr(C, packed)]
    struct Pair {
        tag: [u8; 2],
        value: u32,
    }

    #[test]
    fn read_pod_reads_packed_struct() {
        let mut bytes = b"ok".to_vec();
        bytes.extend_from_slice(&0x0102_0304u32.to_le_bytes());
        let mut stream = SourceStream::new(Cursor::new(bytes)).unwrap();

        let pair: Pair = stream
            .read_pod(|expected, actual| Error::TruncatedHeader { expected, actual })
            .unwrap();
        assert_eq!(pair.tag, *b"ok");
        assert_eq!(u32::from_le(pair.value), 0x0102_0304);
        assert_eq!(stream.position(), 6);
    }

    #[test]
    fn read_pod_reports_short_read() {
        let mut stream = SourceStream::new(Cursor::new(b"ok\x01".to_vec())).unwrap();
        let err = stream
            .read_pod::<Pair, _>(|expected, actual| Error::TruncatedHeader { expected, actual })
            .unwrap_err();
        match err {
            Error::TruncatedHeader { expected, actual } => {
                assert_eq!(expected, 6);
                assert_eq!(actual, 3);
            }
            e => panic!("Expected TruncatedHeader, got {:?}", e),
        }
    }

    #[test]
    fn skip_and_rewind_track_position() {
        let mut stream = SourceStream::new(Cursor::new((0u8..32).collect::<Vec<_>>())).unwrap();
        stream.skip(0).unwrap();
        assert_eq!(stream.position(), 0);

        stream.skip(10).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(stream.read_fill(&mut buf).unwrap(), 2);
        assert_eq!(buf, [10, 11]);

        stream.rewind_by(2).unwrap();
        assert_eq!(stream.position(), 10);
        assert_eq!(stream.read_fill(&mut buf).unwrap(), 2);
        assert_eq!(buf, [10, 11]);

        assert!(stream.rewind_by(100).is_err());
    }

    #[test]
    fn read_fill_stops_at_end_of_stream() {
        let mut stream = SourceStream::new(Cursor::new(vec![7u8; 5])).unwrap();
        stream.seek_to(3).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read_fill(&mut buf).unwrap(), 2);
        assert_eq!(stream.position(), 5);
        assert_eq!(stream.read_fill(&mut buf).unwrap(), 0);
    }

    #[test]
    fn stream_len_keeps_position() {
        let mut stream = SourceStream::new(Cursor::new((0u8..20).collect::<Vec<_>>())).unwrap();
        stream.skip(5).unwrap();
        assert_eq!(stream.stream_len().unwrap(), 20);
        assert_eq!(stream.position(), 5);
        let mut buf = [0u8; 1];
        stream.read_fill(&mut buf).unwrap();
        assert_eq!(buf, [5]);
    }
}
