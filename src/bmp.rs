use std::fmt::Debug;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, Write};
use std::mem::size_of;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::error::{Error, Position, Result};
use crate::source::SourceStream;

/// 14-byte BMP file header, little-endian on disk.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct BmpFileHeader {
    file_type: u16,
    file_size: u32,
    reserved1: u16,
    reserved2: u16,
    pixel_data_offset: u32,
}

/// 40-byte BITMAPINFOHEADER. The trailing fields are carried but unused.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct BmpInfoHeader {
    header_size: u32,
    width: i32,
    height: i32, // negative means top-down rows
    planes: u16,
    bit_depth: u16,
    compression: u32,
    image_size: u32,
    x_pixels_per_meter: i32,
    y_pixels_per_meter: i32,
    colors_used: u32,
    colors_important: u32,
}

const _: () = assert!(size_of::<BmpFileHeader>() == 14);
const _: () = assert!(size_of::<BmpInfoHeader>() == 40);

impl BmpFileHeader {
    pub const SIZE: usize = size_of::<Self>();
    /// "BM" read as a little-endian u16.
    pub const MAGIC: u16 = 0x4D42;

    pub fn file_type(&self) -> u16 {
        u16::from_le(self.file_type)
    }

    pub fn file_size(&self) -> u32 {
        u32::from_le(self.file_size)
    }

    pub fn reserved(&self) -> (u16, u16) {
        (u16::from_le(self.reserved1), u16::from_le(self.reserved2))
    }

    pub fn pixel_data_offset(&self) -> u32 {
        u32::from_le(self.pixel_data_offset)
    }
}

impl BmpInfoHeader {
    pub const SIZE: usize = size_of::<Self>();

    pub fn header_size(&self) -> u32 {
        u32::from_le(self.header_size)
    }

    pub fn width(&self) -> i32 {
        i32::from_le(self.width)
    }

    pub fn height(&self) -> i32 {
        i32::from_le(self.height)
    }

    pub fn planes(&self) -> u16 {
        u16::from_le(self.planes)
    }

    pub fn bit_depth(&self) -> u16 {
        u16::from_le(self.bit_depth)
    }

    pub fn compression(&self) -> u32 {
        u32::from_le(self.compression)
    }

    pub fn image_size(&self) -> u32 {
        u32::from_le(self.image_size)
    }

    /// Horizontal and vertical resolution in pixels per meter.
    pub fn resolution(&self) -> (i32, i32) {
        (
            i32::from_le(self.x_pixels_per_meter),
            i32::from_le(self.y_pixels_per_meter),
        )
    }

    /// Color table entry counts: (used, important).
    pub fn color_table(&self) -> (u32, u32) {
        (u32::from_le(self.colors_used), u32::from_le(self.colors_important))
    }
}

/// Offset of the pixel array when nothing sits between the headers and the pixels.
pub const MIN_PIXEL_DATA_OFFSET: u32 = (BmpFileHeader::SIZE + BmpInfoHeader::SIZE) as u32;

/// A pixel as callers see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// A pixel as it is stored on disk.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct Bgr {
    blue: u8,
    green: u8,
    red: u8,
}

impl From<Bgr> for Pixel {
    fn from(bgr: Bgr) -> Self {
        Pixel {
            red: bgr.red,
            green: bgr.green,
            blue: bgr.blue,
        }
    }
}

impl From<Pixel> for Bgr {
    fn from(px: Pixel) -> Self {
        Bgr {
            blue: px.blue,
            green: px.green,
            red: px.red,
        }
    }
}

/// Converts a pixel to its luma, `0.299 R + 0.587 G + 0.114 B`, on all three channels.
pub fn to_grayscale(pixel: Pixel) -> Pixel {
    let luma = 0.299 * f64::from(pixel.red)
        + 0.587 * f64::from(pixel.green)
        + 0.114 * f64::from(pixel.blue);
    let gray = luma.round() as u8;
    Pixel {
        red: gray,
        green: gray,
        blue: gray,
    }
}

/// Byte geometry of one pixel row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLayout {
    pub bytes_per_pixel: u64,
    /// Bytes of pixel data in a row, without padding.
    pub row_size: u64,
    /// Bytes added to reach the next multiple of 4.
    pub padding: u64,
    pub padded_row: u64,
}

impl RowLayout {
    pub fn new(width: u32, bit_depth: u16) -> Self {
        let bytes_per_pixel = u64::from(bit_depth / 8);
        let row_size = u64::from(width) * bytes_per_pixel;
        let padding = (4 - row_size % 4) % 4;
        Self {
            bytes_per_pixel,
            row_size,
            padding,
            padded_row: row_size + padding,
        }
    }
}

/// Random-access reader for uncompressed, bottom-up BMP files.
#[derive(Debug)]
pub struct BmpDecoder<R: Read + Seek + Debug> {
    stream: SourceStream<R>,
    file_header: BmpFileHeader,
    info_header: BmpInfoHeader,
    width: u32,
    height: u32,
    layout: RowLayout,
}

impl BmpDecoder<File> {
    /// Opens the file at `path` and validates both headers.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }
}

impl<R: Read + Seek + Debug> BmpDecoder<R> {
    const SUPPORTED_BIT_DEPTHS: [u16; 4] = [8, 16, 24, 32];

    /// Reads and validates the file and info headers from the start of `reader`.
    ///
    /// # Errors
    /// - `TruncatedHeader` if either header is cut short, or the pixel data offset
    ///   points inside the headers.
    /// - `InvalidMagic` if the file does not start with "BM".
    /// - `UnsupportedFormat` for anything but a single-plane, uncompressed,
    ///   bottom-up image of 8, 16, 24 or 32 bits per pixel.
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut stream = SourceStream::new(reader)?;
        stream.seek_to(0)?;

        let file_header: BmpFileHeader =
            stream.read_pod(|expected, actual| Error::TruncatedHeader { expected, actual })?;
        if file_header.file_type() != BmpFileHeader::MAGIC {
            return Err(Error::InvalidMagic {
                found: file_header.file_type(),
            });
        }

        let info_header: BmpInfoHeader = stream.read_pod(|expected, actual| {
            Error::TruncatedHeader {
                expected: BmpFileHeader::SIZE + expected,
                actual: BmpFileHeader::SIZE + actual,
            }
        })?;
        debug!(
            file_size = file_header.file_size(),
            pixel_data_offset = file_header.pixel_data_offset(),
            header_size = info_header.header_size(),
            width = info_header.width(),
            height = info_header.height(),
            bit_depth = info_header.bit_depth(),
            "BMP headers read"
        );

        if (info_header.header_size() as usize) < BmpInfoHeader::SIZE {
            return Err(Error::UnsupportedFormat(
                "info header older than BITMAPINFOHEADER",
            ));
        }
        if info_header.planes() != 1 {
            return Err(Error::UnsupportedFormat("color planes must be 1"));
        }
        if info_header.compression() != 0 {
            return Err(Error::UnsupportedFormat("compressed pixel data"));
        }
        let width = u32::try_from(info_header.width())
            .map_err(|_| Error::UnsupportedFormat("negative width"))?;
        let height = u32::try_from(info_header.height())
            .map_err(|_| Error::UnsupportedFormat("top-down row order (negative height)"))?;
        if !Self::SUPPORTED_BIT_DEPTHS.contains(&info_header.bit_depth()) {
            return Err(Error::UnsupportedFormat(
                "bit depth must be 8, 16, 24 or 32",
            ));
        }
        if file_header.pixel_data_offset() < MIN_PIXEL_DATA_OFFSET {
            return Err(Error::TruncatedHeader {
                expected: MIN_PIXEL_DATA_OFFSET as usize,
                actual: file_header.pixel_data_offset() as usize,
            });
        }

        let layout = RowLayout::new(width, info_header.bit_depth());
        Ok(Self {
            stream,
            file_header,
            info_header,
            width,
            height,
            layout,
        })
    }

    pub fn file_header(&self) -> &BmpFileHeader {
        &self.file_header
    }

    pub fn info_header(&self) -> &BmpInfoHeader {
        &self.info_header
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bit_depth(&self) -> u16 {
        self.info_header.bit_depth()
    }

    pub fn row_layout(&self) -> RowLayout {
        self.layout
    }

    /// Absolute file offset of pixel `(x, y)`. Rows are stored bottom-up, so
    /// `y == height - 1` lives in the first row on disk.
    pub fn pixel_offset(&self, x: u32, y: u32) -> Result<u64> {
        if x >= self.width || y >= self.height {
            return Err(Error::OutOfRange(Position::Pixel {
                x,
                y,
                width: self.width,
                height: self.height,
            }));
        }
        let inverted_y = u64::from(self.height - 1 - y);
        Ok(u64::from(self.file_header.pixel_data_offset())
            + inverted_y * self.layout.padded_row
            + u64::from(x) * self.layout.bytes_per_pixel)
    }

    /// Reads the pixel at `(x, y)` with one absolute seek and a 3-byte read.
    ///
    /// An `OutOfRange` error leaves the decoder usable for later calls.
    pub fn get_pixel(&mut self, x: u32, y: u32) -> Result<Pixel> {
        let offset = self.pixel_offset(x, y)?;
        self.stream.seek_to(offset)?;

        let bgr: Bgr = self.stream.read_pod(|expected, actual| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("pixel data ends early: wanted {expected} bytes, got {actual}"),
            )
            .into()
        })?;
        Ok(bgr.into())
    }

    /// Visits every pixel, `y` from `height - 1` down to 0 and `x` left to right,
    /// stopping at the first read error.
    pub fn for_each_pixel<F>(&mut self, mut visitor: F) -> Result<()>
    where
        F: FnMut(u32, u32, Pixel),
    {
        for y in (0..self.height).rev() {
            for x in 0..self.width {
                let pixel = self.get_pixel(x, y)?;
                visitor(x, y, pixel);
            }
        }
        Ok(())
    }

    /// Writes a grayscale copy of the image to `out`.
    ///
    /// Everything before the pixel array is copied byte for byte, then each padded
    /// row is rewritten in on-disk order. The padding bytes and the fourth byte of
    /// 32-bit pixels are passed through unchanged.
    pub fn write_grayscale<W: Write>(&mut self, mut out: W) -> Result<()> {
        let bytes_per_pixel = self.layout.bytes_per_pixel as usize;
        if bytes_per_pixel < 3 {
            return Err(Error::UnsupportedFormat(
                "grayscale output needs 24 or 32-bit pixels",
            ));
        }

        // Buffers are sized from header fields, so check them against the real
        // file length before allocating.
        let stream_len = self.stream.stream_len()?;
        let prefix_len = u64::from(self.file_header.pixel_data_offset());
        if prefix_len > stream_len {
            return Err(Error::TruncatedHeader {
                expected: prefix_len as usize,
                actual: stream_len as usize,
            });
        }
        let pixel_bytes = self.layout.padded_row.checked_mul(u64::from(self.height));
        if pixel_bytes.map_or(true, |n| n > stream_len - prefix_len) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "pixel array runs past the end of the file",
            )
            .into());
        }

        let mut prefix = vec![0u8; prefix_len as usize];
        self.stream.seek_to(0)?;
        let read = self.stream.read_fill(&mut prefix)?;
        if read < prefix.len() {
            return Err(Error::TruncatedHeader {
                expected: prefix.len(),
                actual: read,
            });
        }
        out.write_all(&prefix)?;

        let row_size = self.layout.row_size as usize;
        let mut row = vec![0u8; self.layout.padded_row as usize];
        for disk_row in 0..self.height {
            let read = self.stream.read_fill(&mut row)?;
            if read < row.len() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("pixel row {disk_row} ends early"),
                )
                .into());
            }
            for px in row[..row_size].chunks_exact_mut(bytes_per_pixel) {
                let bgr: Bgr = bytemuck::pod_read_unaligned(&px[..3]);
                let gray = Bgr::from(to_grayscale(bgr.into()));
                px[..3].copy_from_slice(bytemuck::bytes_of(&gray));
            }
            out.write_all(&row)?;
        }
        out.flush()?;
        debug!(rows = self.height, "grayscale copy written");
        Ok(())
    }

    /// Creates (or truncates) `path` and writes the grayscale copy into it.
    pub fn save_grayscale<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_grayscale(BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds an uncompressed bottom-up BMP. `disk_row(i)` yields the unpadded bytes
    /// of the i-th row as stored on disk; row 0 is read back at `y == height - 1`.
    fn build_bmp<F>(width: u32, height: u32, bit_depth: u16, mut disk_row: F) -> Vec<u8>
    where
        F: FnMut(u32) -> Vec<u8>,
    {
        let layout = RowLayout::new(width, bit_depth);
        let pixel_bytes = layout.padded_row as u32 * height;
        let pixel_offset = MIN_PIXEL_DATA_OFFSET;

        let mut data = Vec::new();
        // File header (14 bytes)
        data.extend_from_slice(b"BM");
        data.extend_from_slice(&(pixel_offset + pixel_bytes).to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&pixel_offset.to_le_bytes());
        // Info header (40 bytes)
        data.extend_from_slice(&40u32.to_le_bytes());
        data.extend_from_slice(&(width as i32).to_le_bytes());
        data.extend_from_slice(&(height as i32).to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes()); // planes
        data.extend_from_slice(&bit_depth.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes()); // compression
        data.extend_from_slice(&pixel_bytes.to_le_bytes());
        data.extend_from_slice(&2835i32.to_le_bytes());
        data.extend_from_slice(&2835i32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());

        for i in 0..height {
            let row = disk_row(i);
            assert_eq!(row.len() as u64, layout.row_size, "test row has the wrong width");
            data.extend_from_slice(&row);
            data.extend(std::iter::repeat(0u8).take(layout.padding as usize));
        }
        data
    }

    fn decoder(bytes: Vec<u8>) -> BmpDecoder<Cursor<Vec<u8>>> {
        BmpDecoder::from_reader(Cursor::new(bytes)).expect("Failed to create BmpDecoder")
    }

    #[test]
    fn single_pixel_is_reordered_to_rgb() {
        let bmp = build_bmp(1, 1, 24, |_| vec![0x10, 0x20, 0x30]);
        assert_eq!(bmp.len(), 58);

        let mut dec = decoder(bmp);
        assert_eq!(dec.width(), 1);
        assert_eq!(dec.height(), 1);
        let px = dec.get_pixel(0, 0).unwrap();
        assert_eq!(
            px,
            Pixel {
                red: 0x30,
                green: 0x20,
                blue: 0x10
            }
        );
    }

    #[test]
    fn row_padding() {
        let narrow = RowLayout::new(3, 24);
        assert_eq!(narrow.row_size, 9);
        assert_eq!(narrow.padding, 3);
        assert_eq!(narrow.padded_row, 12);

        let aligned = RowLayout::new(4, 24);
        assert_eq!(aligned.row_size, 12);
        assert_eq!(aligned.padding, 0);
        assert_eq!(aligned.padded_row, 12);

        let deep = RowLayout::new(3, 32);
        assert_eq!(deep.padding, 0);
        let shallow = RowLayout::new(5, 8);
        assert_eq!(shallow.padding, 3);
    }

    #[test]
    fn rows_are_stored_bottom_up() {
        // Every byte of on-disk row i is the marker i.
        let (width, height) = (3, 4);
        let bmp = build_bmp(width, height, 24, |i| vec![i as u8; (width * 3) as usize]);
        let mut dec = decoder(bmp);

        assert_eq!(dec.get_pixel(0, height - 1).unwrap().red, 0);
        assert_eq!(dec.get_pixel(2, 0).unwrap().red, (height - 1) as u8);

        let mut markers = Vec::new();
        dec.for_each_pixel(|x, _, px| {
            if x == 0 {
                markers.push(px.blue);
            }
        })
        .unwrap();
        assert_eq!(markers, vec![0, 1, 2, 3]);
    }

    #[test]
    fn for_each_pixel_visits_every_coordinate_once() {
        let (width, height) = (3u32, 2u32);
        let bmp = build_bmp(width, height, 24, |i| {
            (0..width)
                .flat_map(|x| [x as u8, i as u8, 0xAA])
                .collect()
        });
        let mut dec = decoder(bmp);

        let mut seen = Vec::new();
        dec.for_each_pixel(|x, y, px| seen.push((x, y, px))).unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[0].1, height - 1);
        for (x, y, px) in seen {
            assert_eq!(u32::from(px.blue), x);
            assert_eq!(u32::from(px.green), height - 1 - y);
            assert_eq!(px.red, 0xAA);
        }
    }

    #[test]
    fn out_of_range_leaves_decoder_usable() {
        let bmp = build_bmp(2, 2, 24, |_| vec![1, 2, 3, 4, 5, 6]);
        let mut dec = decoder(bmp);

        match dec.get_pixel(2, 0) {
            Err(Error::OutOfRange(Position::Pixel { x: 2, y: 0, .. })) => {}
            other => panic!("Expected OutOfRange, got {:?}", other),
        }
        assert!(matches!(dec.get_pixel(0, 2), Err(Error::OutOfRange(_))));

        let px = dec.get_pixel(1, 1).unwrap();
        assert_eq!(
            px,
            Pixel {
                red: 6,
                green: 5,
                blue: 4
            }
        );
    }

    #[test]
    fn pixel_offsets_follow_padded_rows() {
        let bmp = build_bmp(3, 2, 24, |_| vec![0; 9]);
        let dec = decoder(bmp);
        let base = u64::from(MIN_PIXEL_DATA_OFFSET);
        assert_eq!(dec.pixel_offset(0, 1).unwrap(), base);
        assert_eq!(dec.pixel_offset(2, 1).unwrap(), base + 6);
        assert_eq!(dec.pixel_offset(0, 0).unwrap(), base + 12);
    }

    #[test]
    fn invalid_magic() {
        let mut bmp = build_bmp(1, 1, 24, |_| vec![0, 0, 0]);
        bmp[0..2].copy_from_slice(b"PN");
        match BmpDecoder::from_reader(Cursor::new(bmp)) {
            Err(Error::InvalidMagic { found }) => assert_eq!(found, 0x4E50),
            other => panic!("Expected InvalidMagic, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn truncated_headers() {
        let bmp = build_bmp(1, 1, 24, |_| vec![0, 0, 0]);

        match BmpDecoder::from_reader(Cursor::new(bmp[..10].to_vec())) {
            Err(Error::TruncatedHeader { expected, actual }) => {
                assert_eq!(expected, 14);
                assert_eq!(actual, 10);
            }
            other => panic!("Expected TruncatedHeader, got {:?}", other.map(|_| ())),
        }

        match BmpDecoder::from_reader(Cursor::new(bmp[..30].to_vec())) {
            Err(Error::TruncatedHeader { expected, actual }) => {
                assert_eq!(expected, 54);
                assert_eq!(actual, 30);
            }
            other => panic!("Expected TruncatedHeader, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unsupported_formats() {
        let base = build_bmp(1, 1, 24, |_| vec![0, 0, 0]);
        let cases: [(usize, &[u8]); 5] = [
            (26, &2u16.to_le_bytes()),    // planes
            (30, &1u32.to_le_bytes()),    // compression (RLE8)
            (18, &(-1i32).to_le_bytes()), // width
            (22, &(-1i32).to_le_bytes()), // height (top-down)
            (28, &4u16.to_le_bytes()),    // bit depth
        ];
        for (offset, patch) in cases {
            let mut bmp = base.clone();
            bmp[offset..offset + patch.len()].copy_from_slice(patch);
            assert!(
                matches!(
                    BmpDecoder::from_reader(Cursor::new(bmp)),
                    Err(Error::UnsupportedFormat(_))
                ),
                "patch at offset {offset} should be rejected"
            );
        }
    }

    #[test]
    fn pixel_offset_inside_headers_is_rejected() {
        let mut bmp = build_bmp(1, 1, 24, |_| vec![0, 0, 0]);
        bmp[10..14].copy_from_slice(&20u32.to_le_bytes());
        assert!(matches!(
            BmpDecoder::from_reader(Cursor::new(bmp)),
            Err(Error::TruncatedHeader {
                expected: 54,
                actual: 20
            })
        ));
    }

    #[test]
    fn missing_pixel_data_is_an_io_error() {
        let mut bmp = build_bmp(2, 2, 24, |_| vec![9; 6]);
        bmp.truncate(bmp.len() - 8);
        let mut dec = decoder(bmp);
        // First on-disk row is intact.
        assert!(dec.get_pixel(0, 1).is_ok());
        assert!(matches!(dec.get_pixel(1, 0), Err(Error::Io(_))));
    }

    #[test]
    fn for_each_pixel_stops_at_first_error() {
        let mut bmp = build_bmp(2, 2, 24, |_| vec![9; 6]);
        // Keep only the first padded row on disk.
        bmp.truncate(MIN_PIXEL_DATA_OFFSET as usize + 8);
        let mut dec = decoder(bmp);

        let mut visited = Vec::new();
        let result = dec.for_each_pixel(|x, y, _| visited.push((x, y)));
        match result {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Expected Io error, got {:?}", other),
        }
        assert_eq!(visited, vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn grayscale_formula() {
        let px = Pixel {
            red: 200,
            green: 100,
            blue: 50,
        };
        // 59.8 + 58.7 + 5.7 = 124.2
        assert_eq!(to_grayscale(px), Pixel { red: 124, green: 124, blue: 124 });
        assert_eq!(
            to_grayscale(Pixel { red: 255, green: 255, blue: 255 }),
            Pixel { red: 255, green: 255, blue: 255 }
        );
        assert_eq!(to_grayscale(Pixel::default()), Pixel::default());
    }

    #[test]
    fn grayscale_is_idempotent() {
        for r in (0..=255u16).step_by(17) {
            for g in (0..=255u16).step_by(51) {
                for b in (0..=255u16).step_by(85) {
                    let px = Pixel {
                        red: r as u8,
                        green: g as u8,
                        blue: b as u8,
                    };
                    let once = to_grayscale(px);
                    assert_eq!(to_grayscale(once), once);
                }
            }
        }
    }

    #[test]
    fn grayscale_copy_keeps_header_and_padding() {
        let (width, height) = (3u32, 2u32);
        let bmp = build_bmp(width, height, 24, |i| {
            if i == 0 {
                vec![50, 100, 200, 0, 0, 0, 255, 255, 255]
            } else {
                vec![10, 20, 30, 40, 50, 60, 70, 80, 90]
            }
        });
        let mut dec = decoder(bmp.clone());

        let mut out = Vec::new();
        dec.write_grayscale(&mut out).unwrap();
        assert_eq!(out.len(), bmp.len());
        assert_eq!(out[..54], bmp[..54]);

        let mut gray = decoder(out);
        // First row on disk.
        assert_eq!(gray.get_pixel(0, 1).unwrap(), Pixel { red: 124, green: 124, blue: 124 });
        assert_eq!(gray.get_pixel(1, 1).unwrap(), Pixel::default());
        for y in 0..height {
            for x in 0..width {
                let px = gray.get_pixel(x, y).unwrap();
                assert_eq!(px.red, px.green);
                assert_eq!(px.green, px.blue);
            }
        }
    }

    #[test]
    fn grayscale_keeps_fourth_byte_of_32_bit_pixels() {
        let bmp = build_bmp(1, 1, 32, |_| vec![50, 100, 200, 0x7F]);
        let mut dec = decoder(bmp);
        let mut out = Vec::new();
        dec.write_grayscale(&mut out).unwrap();
        assert_eq!(out[54..], [124u8, 124, 124, 0x7F]);
    }

    #[test]
    fn grayscale_checks_header_sizes_against_file_length() {
        // Claims a 2^31 pixel wide 32-bit row in a file with one real pixel.
        let mut wide = build_bmp(1, 1, 32, |_| vec![1, 2, 3, 4]);
        wide[18..22].copy_from_slice(&i32::MAX.to_le_bytes());
        let mut out = Vec::new();
        match decoder(wide).write_grayscale(&mut out) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Expected Io error, got {:?}", other),
        }
        assert!(out.is_empty());

        let mut far_offset = build_bmp(1, 1, 24, |_| vec![1, 2, 3]);
        let len = far_offset.len();
        far_offset[10..14].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        assert!(matches!(
            decoder(far_offset).write_grayscale(Vec::new()),
            Err(Error::TruncatedHeader { expected: 0xFFFF_FFF0, actual }) if actual == len
        ));
    }

    #[test]
    fn grayscale_rejects_narrow_pixels() {
        let bmp = build_bmp(4, 1, 8, |_| vec![1, 2, 3, 4]);
        let mut dec = decoder(bmp);
        assert!(matches!(
            dec.write_grayscale(Vec::new()),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
