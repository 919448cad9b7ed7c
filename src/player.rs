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

//! Feeding sample blocks to an audio output.
//!
//! The decoder knows nothing about audio devices. An [`AudioOutput`] opens an
//! [`OutputLine`] for an [`OutputFormat`], and [`playback`] runs the usual
//! open, write, drain, stop sequence around a closure that does the writing.

use std::io;
use std::io::Read;
use std::result;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info};

use crate::{SampleEncoding, SampleReader, WaveFormat};

// MARK: Error types

/// Represents an error raised by an audio output.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// There is no device to play on.
    #[error("No output device available")]
    DeviceNotFound,
    /// The device can't play this format.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// The audio backend failed.
    #[error("Backend error: {backend} - {details}")]
    Backend {
        backend: &'static str,
        details: String,
    },
    /// An IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Represents a result of an audio output operation.
pub type PlaybackResult<T> = result::Result<T, PlaybackError>;

// MARK: Output format

/// The format an output line is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub encoding: SampleEncoding,
    pub sample_rate_hz: u32,
    pub bits_per_sample: u16,
    pub channel_count: u16,
    /// Bytes per frame.
    pub frame_size: u32,
    /// Frames per second.
    pub frame_rate: u32,
    pub big_endian: bool,
}

impl OutputFormat {
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }
}

impl<'a> From<&'a WaveFormat> for OutputFormat {
    fn from(format: &'a WaveFormat) -> OutputFormat {
        OutputFormat {
            encoding: format.sample_encoding(),
            sample_rate_hz: format.sample_rate_hz(),
            bits_per_sample: format.bits_per_sample(),
            channel_count: format.channel_count(),
            frame_size: format.block_align(),
            frame_rate: format.sample_rate_hz(),
            big_endian: false,
        }
    }
}

/// Converts one little-endian PCM sample of 1 to 4 bytes to a float in
/// [-1.0, 1.0]. Other lengths convert to silence.
pub fn pcm_to_f32(sample: &[u8], encoding: SampleEncoding) -> f32 {
    match (sample.len(), encoding) {
        (1, SampleEncoding::Unsigned) => (f32::from(sample[0]) - 128.0) / 128.0,
        (1, SampleEncoding::Signed) => f32::from(sample[0] as i8) / 128.0,
        (2, _) => f32::from(LittleEndian::read_i16(sample)) / 32_768.0,
        (3, _) => LittleEndian::read_i24(sample) as f32 / 8_388_608.0,
        (4, _) => LittleEndian::read_i32(sample) as f32 / 2_147_483_648.0,
        _ => 0.0,
    }
}

// MARK: Output traits

/// A started output line accepting raw PCM bytes.
pub trait OutputLine {
    /// Queues `block` for playback. May block until the device has room.
    fn write(&mut self, block: &[u8]) -> PlaybackResult<()>;

    /// Blocks until everything written so far has been played.
    fn drain(&mut self) -> PlaybackResult<()>;

    fn stop(&mut self) -> PlaybackResult<()>;
}

/// Something that can open output lines, usually an audio device.
pub trait AudioOutput {
    type Line: OutputLine;

    /// Opens and starts a line for `format`.
    fn open(&self, format: &OutputFormat) -> PlaybackResult<Self::Line>;
}

/// Opens a line for `format`, lets `feed` write to it, then drains and stops
/// it. The line is stopped even when `feed` fails.
pub fn playback<O, F>(output: &O, format: &WaveFormat, feed: F) -> PlaybackResult<()>
    where O: AudioOutput,
          F: FnOnce(&mut O::Line) -> PlaybackResult<()>
{
    let output_format = OutputFormat::from(format);
    debug!(?output_format, "opening output line");
    let mut line = output.open(&output_format)?;

    let played = feed(&mut line).and_then(|()| line.drain());
    let stopped = line.stop();
    played.and(stopped)
}

/// Writes every remaining block of `reader` to `line`, requesting
/// `block_size` samples per channel at a time. Returns the number of bytes
/// written.
pub fn stream_blocks<R, L>(reader: &mut SampleReader<R>,
                           line: &mut L,
                           block_size: usize)
                           -> PlaybackResult<u64>
    where R: Read,
          L: OutputLine + ?Sized
{
    debug!(block_size, "PCM sample block size");
    info!("starting playback...");

    let mut written = 0;
    for block in reader.blocks(block_size) {
        line.write(&block)?;
        written += block.len() as u64;
    }

    info!(bytes = written, "playback stopped");
    Ok(written)
}

// MARK: Null output

/// An output that plays nothing. Useful to decode a file without a device.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

/// Line of a [`NullOutput`]; counts and discards what it is given.
#[derive(Debug, Default)]
pub struct NullLine {
    bytes_written: u64,
    drained: bool,
    stopped: bool,
}

impl NullLine {
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl OutputLine for NullLine {
    fn write(&mut self, block: &[u8]) -> PlaybackResult<()> {
        self.bytes_written += block.len() as u64;
        Ok(())
    }

    fn drain(&mut self) -> PlaybackResult<()> {
        self.drained = true;
        Ok(())
    }

    fn stop(&mut self) -> PlaybackResult<()> {
        self.stopped = true;
        Ok(())
    }
}

impl AudioOutput for NullOutput {
    type Line = NullLine;

    fn open(&self, _: &OutputFormat) -> PlaybackResult<NullLine> {
        Ok(NullLine::default())
    }
}

// MARK: Tests

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    use super::{pcm_to_f32, playback, stream_blocks, AudioOutput, NullLine, NullOutput,
                OutputFormat, OutputLine, PlaybackError, PlaybackResult};
    use crate::{AudioCodingFormat, SampleEncoding, SampleReader, WaveFormat};

    // Records the calls made on its lines.
    #[derive(Default)]
    struct RecordingOutput {
        events: Rc<RefCell<Vec<String>>>,
    }

    struct RecordingLine {
        events: Rc<RefCell<Vec<String>>>,
    }

    impl AudioOutput for RecordingOutput {
        type Line = RecordingLine;

        fn open(&self, format: &OutputFormat) -> PlaybackResult<RecordingLine> {
            self.events.borrow_mut().push(format!("open {:?}", format.encoding));
            Ok(RecordingLine { events: self.events.clone() })
        }
    }

    impl OutputLine for RecordingLine {
        fn write(&mut self, block: &[u8]) -> PlaybackResult<()> {
            self.events.borrow_mut().push(format!("write {}", block.len()));
            Ok(())
        }

        fn drain(&mut self) -> PlaybackResult<()> {
            self.events.borrow_mut().push("drain".to_string());
            Ok(())
        }

        fn stop(&mut self) -> PlaybackResult<()> {
            self.events.borrow_mut().push("stop".to_string());
            Ok(())
        }
    }

    fn format(channels: u16, bits: u16) -> WaveFormat {
        WaveFormat::new(AudioCodingFormat::LinearPcm, channels, 44100, bits, 0).unwrap()
    }

    #[test]
    fn test_output_format_for_8bit_is_unsigned() {
        let output_format = OutputFormat::from(&format(1, 8));
        assert_eq!(SampleEncoding::Unsigned, output_format.encoding);
        assert_eq!(1, output_format.frame_size);
        assert_eq!(1, output_format.bytes_per_sample());
    }

    #[test]
    fn test_output_format_for_16bit_stereo_is_signed() {
        let output_format = OutputFormat::from(&format(2, 16));
        assert_eq!(SampleEncoding::Signed, output_format.encoding);
        assert_eq!(44100, output_format.sample_rate_hz);
        assert_eq!(44100, output_format.frame_rate);
        assert_eq!(4, output_format.frame_size);
        assert_eq!(2, output_format.channel_count);
        assert!(!output_format.big_endian);
    }

    #[test]
    fn test_pcm_to_f32_unsigned_8bit() {
        assert_eq!(0.0, pcm_to_f32(&[0x80], SampleEncoding::Unsigned));
        assert_eq!(-1.0, pcm_to_f32(&[0x00], SampleEncoding::Unsigned));
        assert_eq!(0.5, pcm_to_f32(&[0xC0], SampleEncoding::Unsigned));
    }

    #[test]
    fn test_pcm_to_f32_signed() {
        assert_eq!(-1.0, pcm_to_f32(&[0x80], SampleEncoding::Signed));
        assert_eq!(-1.0, pcm_to_f32(&[0x00, 0x80], SampleEncoding::Signed));
        assert_eq!(0.5, pcm_to_f32(&[0x00, 0x40], SampleEncoding::Signed));
        assert_eq!(-1.0, pcm_to_f32(&[0x00, 0x00, 0x80], SampleEncoding::Signed));
        assert_eq!(0.5, pcm_to_f32(&[0x00, 0x00, 0x00, 0x40], SampleEncoding::Signed));
        assert_eq!(0.0, pcm_to_f32(&[], SampleEncoding::Signed));
    }

    #[test]
    fn test_playback_opens_feeds_drains_and_stops() {
        let output = RecordingOutput::default();
        let mut reader = SampleReader::new(Cursor::new(vec![0u8; 10]), format(2, 16));
        let wave_format = *reader.format();

        playback(&output, &wave_format, |line| {
            stream_blocks(&mut reader, line, 2).map(|_| ())
        }).unwrap();

        assert_eq!(vec!["open Signed", "write 4", "write 4", "write 2", "drain", "stop"],
                   *output.events.borrow());
    }

    #[test]
    fn test_playback_stops_line_when_feed_fails() {
        let output = RecordingOutput::default();
        let result = playback(&output, &format(1, 8), |_| {
            Err(PlaybackError::UnsupportedFormat("test".to_string()))
        });

        match result {
            Err(PlaybackError::UnsupportedFormat(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(vec!["open Unsigned", "stop"], *output.events.borrow());
    }

    #[test]
    fn test_stream_blocks_counts_bytes() {
        let mut reader = SampleReader::new(Cursor::new(vec![0x80u8; 100]), format(1, 8));
        let mut line = NullLine::default();

        assert_eq!(100, stream_blocks(&mut reader, &mut line, 64).unwrap());
        assert_eq!(100, line.bytes_written());
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_null_output_line() {
        let mut line = NullOutput.open(&OutputFormat::from(&format(1, 8))).unwrap();
        line.write(&[1, 2, 3]).unwrap();
        line.drain().unwrap();
        line.stop().unwrap();

        assert_eq!(3, line.bytes_written());
        assert!(line.is_drained());
        assert!(line.is_stopped());
    }
}
