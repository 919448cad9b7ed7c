// wave-decoder -- Streaming decoder and player for PCM wave files.
// Copyright (c) 2016 Kevin Brothaler and the riff-wave project authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Streaming decoder for uncompressed PCM wave files.
//!
//! The library reads the RIFF/WAVE header of a "canonical" PCM wave file into
//! an immutable [`WaveFormat`], then hands out the raw sample data in blocks
//! through a [`SampleReader`]. The blocks are not decoded in any way: turning
//! them into sound is the job of an output line (see the [`player`] module).
//!
//! Only linear PCM with a 16 byte "fmt " subchunk is accepted. Compressed
//! codecs and the extensible format are rejected while reading the header.
//!
//! # The wave file format
//!
//! The wave file format starts with the RIFF file header:
//!
//! Offset | Size | Data       |    Description
//! -----: | ---: | ---------- | ----------------------------------------------
//!      0 |    4 | "RIFF"     | Identifies the main chunk.
//!      4 |    4 | chunk size | The size of the rest of the file. Read, but never checked.
//!      8 |    4 | "WAVE"     | Indicates that this is a wave file.
//!
//! ## The "fmt " subchunk
//!
//! The "fmt " subchunk must directly follow the RIFF header:
//!
//! Offset | Size | Data            | Description
//! -----: | ---: | --------------- | -----------------------------------------
//!     12 |    4 | "fmt "          | Identifies this subchunk.
//!     16 |    4 | subchunk size   | Must be 16.
//!     20 |    2 | format (1)      | 1 for linear PCM; anything else is rejected.
//!     22 |    2 | num channels    | Mono, stereo, or something else. Must not be zero.
//!     24 |    4 | sample rate     | The sample rate per second. Must not be zero.
//!     28 |    4 | byte rate       | Ignored; see [`WaveFormat::byte_rate`].
//!     32 |    2 | block align     | Ignored; see [`WaveFormat::block_align`].
//!     34 |    2 | bits per sample | 8, 16, 24 or 32.
//!
//! ## Ancillary subchunks
//!
//! Any number of subchunks such as "LIST", "JUNK" or "fact" may sit between the
//! "fmt " and the "data" subchunks. Each one is an identifier, a 32-bit size
//! and that many bytes of payload, and each one is skipped.
//!
//! ## The "data" subchunk
//!
//! Offset | Size | Data            | Description
//! -----: | ---: | --------------- | -----------------------------------------
//! 36+    |    4 | "data"          | Identifies this subchunk
//! 40+    |    4 | subchunk size   | The declared size of the audio data. Treated as a hint only.
//! 44+    |  ... | audio data      | Interleaved PCM frames.
//!
//! 8-bit audio is stored as unsigned bytes in the range [0, 255]. Wider samples
//! are signed two's-complement little-endian values.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! use wave_decoder::SampleReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = BufReader::new(File::open("hello.wav")?);
//! let mut reader = SampleReader::from_wave(file)?;
//! println!("{}", reader.format());
//!
//! while let Some(block) = reader.next_block(64) {
//!     // Hand `block` to an output line.
//!     let _ = block.len();
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io;
use std::io::Read;
use std::iter::FusedIterator;
use std::ops::Deref;
use std::result;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, error, info};

pub mod config;
#[cfg(feature = "playback")]
pub mod device;
pub mod player;

pub use config::{Config, DEFAULT_BLOCK_SIZE};

// MARK: Error types

/// Represents an error that occurred while reading a wave header.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The file format is incorrect or unsupported.
    #[error("Format error: {0}")]
    Format(#[from] FormatErrorKind),
    /// An IO error occurred.
    #[error("IO error: {0}")]
    Io(#[source] io::Error),
}

/// Represents a result when reading a wave header.
pub type ReadResult<T> = result::Result<T, ReadError>;

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> ReadError {
        // A header cut short is a format problem, not a device problem.
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ReadError::Format(FormatErrorKind::TruncatedHeader),
            _ => ReadError::Io(err),
        }
    }
}

/// Represents a file format error, when the wave file is incorrect or unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormatErrorKind {
    /// The file does not start with a "RIFF" tag.
    #[error("not a RIFF file")]
    InvalidContainer,
    /// The file doesn't continue with "WAVE" after the RIFF chunk header.
    #[error("not a WAVE file")]
    InvalidFormat,
    /// The "fmt " subchunk doesn't directly follow the RIFF chunk header.
    #[error("illegal format subchunk")]
    InvalidFormatSubchunk,
    /// The "fmt " subchunk isn't the canonical 16 bytes long.
    #[error("unsupported format subchunk size: {0}")]
    UnsupportedFormatChunkSize(u32),
    /// This file is not a linear PCM wave file.
    #[error("unsupported audio coding format: {0}")]
    UnsupportedCodingFormat(u16),
    /// The number of channels is zero, which is invalid.
    #[error("number of channels is zero")]
    InvalidChannelCount,
    /// A decoded header value is out of range.
    #[error("invalid format values: {0}")]
    InvalidFormatValues(InvalidValue),
    /// The stream ended before the "data" subchunk was found.
    #[error("stream ended before the \"data\" subchunk")]
    TruncatedHeader,
    /// Too many subchunks were skipped while looking for "data".
    #[error("no \"data\" subchunk after skipping {0} subchunks")]
    TooManyAncillaryChunks(usize),
}

/// The header value that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidValue {
    /// The sample rate is zero.
    #[error("sample rate is zero")]
    SampleRateIsZero,
    /// Only 8-bit, 16-bit, 24-bit and 32-bit PCM files are supported.
    #[error("unsupported bits per sample: {0}")]
    UnsupportedBitsPerSample(u16),
}

// MARK: Format types

/// Format code of uncompressed linear PCM data.
pub const FORMAT_LINEAR_PCM: u16 = 1;

const CANONICAL_FMT_SUBCHUNK_SIZE: u32 = 16;

/// Upper bound on the number of subchunks skipped before "data".
pub const MAX_ANCILLARY_CHUNKS: usize = 1024;

/// The audio coding formats this library can stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodingFormat {
    /// Uncompressed linear pulse-code modulation.
    LinearPcm,
}

impl AudioCodingFormat {
    /// The numeric code stored in the "fmt " subchunk.
    pub fn code(self) -> u16 {
        match self {
            AudioCodingFormat::LinearPcm => FORMAT_LINEAR_PCM,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AudioCodingFormat::LinearPcm => "linear pulse-code modulation",
        }
    }
}

impl TryFrom<u16> for AudioCodingFormat {
    type Error = FormatErrorKind;

    fn try_from(code: u16) -> result::Result<AudioCodingFormat, FormatErrorKind> {
        match code {
            FORMAT_LINEAR_PCM => Ok(AudioCodingFormat::LinearPcm),
            _ => Err(FormatErrorKind::UnsupportedCodingFormat(code)),
        }
    }
}

impl fmt::Display for AudioCodingFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the bytes of a single sample are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    /// Unsigned samples centered on the midpoint, used by 8-bit wave files.
    Unsigned,
    /// Signed two's-complement samples, used by every wider wave format.
    Signed,
}

/// The format of a PCM wave file, as declared by its header.
///
/// A `WaveFormat` can only be obtained through [`WaveFormat::new`] or by
/// reading a header, and both reject out-of-range values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    coding_format: AudioCodingFormat,
    channel_count: u16,
    sample_rate_hz: u32,
    bits_per_sample: u16,
    data_size_bytes: u32,
}

impl WaveFormat {
    /// Returns a validated wave format.
    pub fn new(coding_format: AudioCodingFormat,
               channel_count: u16,
               sample_rate_hz: u32,
               bits_per_sample: u16,
               data_size_bytes: u32)
               -> result::Result<WaveFormat, FormatErrorKind> {
        if channel_count == 0 {
            return Err(FormatErrorKind::InvalidChannelCount);
        } else if sample_rate_hz == 0 {
            return Err(FormatErrorKind::InvalidFormatValues(InvalidValue::SampleRateIsZero));
        } else if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(FormatErrorKind::InvalidFormatValues(
                InvalidValue::UnsupportedBitsPerSample(bits_per_sample)));
        }

        Ok(WaveFormat {
            coding_format,
            channel_count,
            sample_rate_hz,
            bits_per_sample,
            data_size_bytes,
        })
    }

    pub fn coding_format(&self) -> AudioCodingFormat {
        self.coding_format
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    /// The size of the sample data declared in the header. The stream may hold
    /// more or less than this.
    pub fn data_size_bytes(&self) -> u32 {
        self.data_size_bytes
    }

    pub fn bytes_per_sample(&self) -> u16 {
        self.bits_per_sample / 8
    }

    /// The number of bytes in one frame, i.e. one sample for every channel.
    /// Computed from the format, never taken from the header.
    pub fn block_align(&self) -> u32 {
        u32::from(self.bytes_per_sample()) * u32::from(self.channel_count)
    }

    /// The number of bytes per second of audio. Computed from the format,
    /// never taken from the header.
    pub fn byte_rate(&self) -> u64 {
        u64::from(self.sample_rate_hz) * u64::from(self.block_align())
    }

    pub fn sample_encoding(&self) -> SampleEncoding {
        if self.bits_per_sample == 8 {
            SampleEncoding::Unsigned
        } else {
            SampleEncoding::Signed
        }
    }

    /// The number of whole frames the declared data size holds.
    pub fn frame_count(&self) -> u64 {
        u64::from(self.data_size_bytes) / u64::from(self.block_align())
    }

    /// The playing time of the declared data size.
    pub fn duration(&self) -> Duration {
        let nanos = u128::from(self.frame_count()) * 1_000_000_000 / u128::from(self.sample_rate_hz);
        Duration::from_nanos(nanos as u64)
    }
}

impl fmt::Display for WaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,
               "{}, {} channel(s), {} Hz, {} bits per sample, {} bytes of sample data ({:.3}s)",
               self.coding_format,
               self.channel_count,
               self.sample_rate_hz,
               self.bits_per_sample,
               self.data_size_bytes,
               self.duration().as_secs_f64())
    }
}

// MARK: Header parsing

fn validate_fmt_subchunk_size(size: u32) -> ReadResult<()> {
    if size != CANONICAL_FMT_SUBCHUNK_SIZE {
        Err(ReadError::Format(FormatErrorKind::UnsupportedFormatChunkSize(size)))
    } else {
        Ok(())
    }
}

trait ReadWaveExt: Read + Sized {
    fn read_wave_header(&mut self) -> ReadResult<WaveFormat> {
        // Validate the beginning of the file
        self.validate_is_riff_file()?;
        self.validate_is_wave_file()?;

        // Unlike ancillary subchunks, "fmt " has a fixed place and size.
        self.validate_tag(b"fmt ", FormatErrorKind::InvalidFormatSubchunk)?;
        validate_fmt_subchunk_size(self.read_chunk_size()?)?;

        let coding_format = AudioCodingFormat::try_from(self.read_u16::<LittleEndian>()?)?;
        debug!(code = coding_format.code(), "audio coding format");
        let channel_count = self.read_u16::<LittleEndian>()?;
        debug!(channel_count, "number of channels");
        let sample_rate_hz = self.read_u32::<LittleEndian>()?;
        debug!(sample_rate_hz, "sample rate");
        // Byte rate and block align can be derived from the other fields, so
        // the declared values are only logged.
        let declared_byte_rate = self.read_u32::<LittleEndian>()?;
        debug!(declared_byte_rate, "audio data stream speed in bytes/second");
        let declared_block_align = self.read_u16::<LittleEndian>()?;
        debug!(declared_block_align, "block alignment");
        let bits_per_sample = self.read_u16::<LittleEndian>()?;
        debug!(bits_per_sample, "quantisation bits per sample");

        let data_size_bytes = self.skip_until_data()?;
        debug!(data_size_bytes, "declared sample data size");

        Ok(WaveFormat::new(coding_format,
                           channel_count,
                           sample_rate_hz,
                           bits_per_sample,
                           data_size_bytes)?)
    }

    fn validate_is_riff_file(&mut self) -> ReadResult<()> {
        self.validate_tag(b"RIFF", FormatErrorKind::InvalidContainer)?;
        // The chunk size is often wrong in files written by streaming
        // encoders, so it is not validated.
        let riff_chunk_size = self.read_chunk_size()?;
        debug!(riff_chunk_size, "RIFF chunk size");
        Ok(())
    }

    fn validate_is_wave_file(&mut self) -> ReadResult<()> {
        self.validate_tag(b"WAVE", FormatErrorKind::InvalidFormat)
    }

    fn validate_tag(&mut self,
                    expected_tag: &[u8; 4],
                    err_kind: FormatErrorKind)
                    -> ReadResult<()> {
        let tag = self.read_tag()?;
        if &tag != expected_tag {
            return Err(ReadError::Format(err_kind));
        }
        Ok(())
    }

    /// Skips subchunks until "data" and returns its declared size. Afterwards
    /// the reader is positioned at the first byte of sample data.
    fn skip_until_data(&mut self) -> ReadResult<u32> {
        let mut skipped_chunks = 0;
        let mut skipped_bytes: u64 = 0;

        loop {
            let tag = self.read_tag()?;
            if &tag == b"data" {
                debug!(skipped_chunks, skipped_bytes, "skipped over junk data");
                return self.read_chunk_size();
            }
            if skipped_chunks == MAX_ANCILLARY_CHUNKS {
                return Err(ReadError::Format(
                    FormatErrorKind::TooManyAncillaryChunks(skipped_chunks)));
            }

            let subchunk_size = self.read_chunk_size()?;
            debug!(tag = %String::from_utf8_lossy(&tag), subchunk_size, "skipping subchunk");
            self.skip_bytes(subchunk_size)?;
            skipped_chunks += 1;
            skipped_bytes += u64::from(subchunk_size);
        }
    }

    fn skip_bytes(&mut self, count: u32) -> ReadResult<()> {
        let skipped = io::copy(&mut self.by_ref().take(count.into()), &mut io::sink())?;
        if skipped < u64::from(count) {
            return Err(ReadError::Format(FormatErrorKind::TruncatedHeader));
        }
        Ok(())
    }

    fn read_tag(&mut self) -> ReadResult<[u8; 4]> {
        let mut tag: [u8; 4] = [0; 4];
        self.read_exact(&mut tag)?;
        Ok(tag)
    }

    fn read_chunk_size(&mut self) -> ReadResult<u32> {
        Ok(self.read_u32::<LittleEndian>()?)
    }
}

impl<T> ReadWaveExt for T where T: Read {}

/// Reads a RIFF/WAVE header from `reader`.
///
/// Exactly the header bytes are consumed, including any skipped subchunks, so
/// on success the reader is positioned at the first byte of sample data. On
/// failure the reader's position is unspecified.
pub fn parse_header<R: Read>(reader: &mut R) -> ReadResult<WaveFormat> {
    reader.read_wave_header()
}

// MARK: Sample reading

/// A block of raw, interleaved PCM sample bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBlock(Vec<u8>);

impl SampleBlock {
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for SampleBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for SampleBlock {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// Caps the up-front allocation of a block; larger requests grow as they read.
const MAX_PREALLOCATED_BLOCK: usize = 64 * 1024;

/// Helper struct that takes ownership of a reader positioned at the sample
/// data of a wave file, and hands that data out in blocks.
///
/// Read errors are not reported: they end the stream like running out of
/// data does, so that playback stops instead of failing halfway.
#[derive(Debug)]
pub struct SampleReader<R>
    where R: Read
{
    format: WaveFormat,

    // The number of sample bytes handed out so far.
    bytes_read: u64,

    // Set once the end of the stream or a read error has been seen.
    exhausted: bool,

    // The underlying reader that we'll use to read data.
    reader: R,
}

impl<R> SampleReader<R>
    where R: Read
{
    /// Returns a sample reader for a reader already positioned at the first
    /// byte of sample data.
    pub fn new(reader: R, format: WaveFormat) -> SampleReader<R> {
        SampleReader {
            format,
            bytes_read: 0,
            exhausted: false,
            reader,
        }
    }

    /// Reads the wave header from `reader` and returns a sample reader for
    /// the data that follows it.
    pub fn from_wave(mut reader: R) -> ReadResult<SampleReader<R>> {
        let format = parse_header(&mut reader)?;
        Ok(SampleReader::new(reader, format))
    }

    pub fn format(&self) -> &WaveFormat {
        &self.format
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Reads the next block of `requested_sample_count` samples per channel.
    ///
    /// The block holds `requested_sample_count * channel_count` bytes, or
    /// whatever is left of the stream if that is less. The last block may thus
    /// be shorter than the others, even shorter than a frame. Note that the
    /// size is counted in bytes, not in samples of `bits_per_sample`.
    ///
    /// Returns `None` once the stream is drained or a read fails, and on every
    /// call after that. Bytes read before a failure are still returned as a
    /// last, short block. A request for zero samples also returns `None`, but
    /// leaves the reader usable.
    pub fn next_block(&mut self, requested_sample_count: usize) -> Option<SampleBlock> {
        if self.exhausted || requested_sample_count == 0 {
            return None;
        }

        let capacity = requested_sample_count.saturating_mul(usize::from(self.format.channel_count));
        let mut block = Vec::with_capacity(capacity.min(MAX_PREALLOCATED_BLOCK));

        match self.reader.by_ref().take(capacity as u64).read_to_end(&mut block) {
            Ok(0) => {
                info!(bytes_read = self.bytes_read, "reached end of stream");
                self.exhausted = true;
                None
            }
            Ok(read) => {
                self.bytes_read += read as u64;
                Some(SampleBlock(block))
            }
            Err(err) => {
                error!(error = %err, bytes_read = self.bytes_read, "failed to read sample block");
                self.exhausted = true;
                // read_to_end keeps what it read before failing.
                if block.is_empty() {
                    None
                } else {
                    self.bytes_read += block.len() as u64;
                    Some(SampleBlock(block))
                }
            }
        }
    }

    /// Returns an iterator over the remaining blocks of
    /// `requested_sample_count` samples per channel.
    pub fn blocks(&mut self, requested_sample_count: usize) -> Blocks<'_, R> {
        Blocks {
            reader: self,
            requested_sample_count,
        }
    }

    /// Releases the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Iterator over the blocks of a [`SampleReader`].
#[derive(Debug)]
pub struct Blocks<'r, R>
    where R: Read
{
    reader: &'r mut SampleReader<R>,
    requested_sample_count: usize,
}

impl<'r, R> Iterator for Blocks<'r, R>
    where R: Read
{
    type Item = SampleBlock;

    fn next(&mut self) -> Option<SampleBlock> {
        self.reader.next_block(self.requested_sample_count)
    }
}

impl<'r, R> FusedIterator for Blocks<'r, R> where R: Read {}

// MARK: Tests
