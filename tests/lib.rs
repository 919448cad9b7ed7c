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

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom, Write};

use tempfile::NamedTempFile;

use wave_decoder::player::{playback, stream_blocks, NullLine, NullOutput};
use wave_decoder::{parse_header, FormatErrorKind, ReadError, SampleEncoding, SampleReader};

// Writes a wave file with the given ancillary chunks between "fmt " and "data".
fn write_wave_file(channels: u16,
                   sample_rate: u32,
                   bits_per_sample: u16,
                   ancillary: &[(&[u8; 4], &[u8])],
                   samples: &[u8])
                   -> NamedTempFile {
    let block_align = channels * (bits_per_sample / 8);
    let mut body = Vec::new();
    body.extend_from_slice(b"WAVEfmt ");
    body.extend_from_slice(&16u32.to_le_bytes());
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&channels.to_le_bytes());
    body.extend_from_slice(&sample_rate.to_le_bytes());
    body.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
    body.extend_from_slice(&block_align.to_le_bytes());
    body.extend_from_slice(&bits_per_sample.to_le_bytes());
    for &(tag, payload) in ancillary {
        body.extend_from_slice(tag);
        body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        body.extend_from_slice(payload);
    }
    body.extend_from_slice(b"data");
    body.extend_from_slice(&(samples.len() as u32).to_le_bytes());
    body.extend_from_slice(samples);

    let mut file = NamedTempFile::with_suffix(".wav").expect("Failed to create temp file");
    file.write_all(b"RIFF").unwrap();
    file.write_all(&(body.len() as u32).to_le_bytes()).unwrap();
    file.write_all(&body).unwrap();
    file.flush().unwrap();
    file
}

fn open(file: &NamedTempFile) -> BufReader<File> {
    BufReader::new(File::open(file.path()).unwrap())
}

#[test]
fn test_header_for_standard_file_8bit_mono_16000() {
    let wave = write_wave_file(1, 16000, 8, &[], &[0x80; 160]);
    let reader = SampleReader::from_wave(open(&wave)).unwrap();
    let format = reader.format();

    assert_eq!(1, format.channel_count());
    assert_eq!(16000, format.sample_rate_hz());
    assert_eq!(8, format.bits_per_sample());
    assert_eq!(160, format.data_size_bytes());
    assert_eq!(SampleEncoding::Unsigned, format.sample_encoding());
}

#[test]
fn test_header_for_standard_file_16bit_stereo_44100() {
    let wave = write_wave_file(2, 44100, 16, &[], &[0; 400]);
    let reader = SampleReader::from_wave(open(&wave)).unwrap();
    let format = reader.format();

    assert_eq!(2, format.channel_count());
    assert_eq!(44100, format.sample_rate_hz());
    assert_eq!(16, format.bits_per_sample());
    assert_eq!(4, format.block_align());
    assert_eq!(176400, format.byte_rate());
    assert_eq!(100, format.frame_count());
}

#[test]
fn test_header_leaves_file_at_sample_data() {
    let list: &[u8] = b"INFOINAM\x06\x00\x00\x00Tones\x00";
    let wave = write_wave_file(1, 8000, 8, &[(b"LIST", list)], &[1, 2, 3]);
    let mut file = File::open(wave.path()).unwrap();

    parse_header(&mut file).unwrap();
    assert_eq!(44 + 8 + list.len() as u64, file.seek(SeekFrom::Current(0)).unwrap());
}

#[test]
fn test_streams_file_with_metadata_chunks() {
    let samples: Vec<u8> = (0..=255).cycle().take(1000).collect();
    let wave = write_wave_file(2,
                               22050,
                               16,
                               &[(b"fact", &[0xF4u8, 0x01, 0x00, 0x00][..]), (b"JUNK", &[0u8; 27][..])],
                               &samples);
    let mut reader = SampleReader::from_wave(open(&wave)).unwrap();

    let blocks: Vec<_> = reader.blocks(64).collect();
    // 64 samples for each of two channels: 128 bytes per block.
    assert_eq!(8, blocks.len());
    assert!(blocks[..7].iter().all(|block| block.len() == 128));
    assert_eq!(1000 - 7 * 128, blocks[7].len());

    let drained: Vec<u8> = blocks.into_iter().flat_map(|block| block.into_vec()).collect();
    assert_eq!(samples, drained);
    assert_eq!(None, reader.next_block(64));
}

#[test]
fn test_truncated_file_is_rejected() {
    let wave = write_wave_file(2, 44100, 16, &[], &[]);
    let bytes = std::fs::read(wave.path()).unwrap();

    let mut short = NamedTempFile::new().unwrap();
    short.write_all(&bytes[..38]).unwrap();
    short.flush().unwrap();

    match SampleReader::from_wave(open(&short)) {
        Err(ReadError::Format(FormatErrorKind::TruncatedHeader)) => {}
        other => panic!("unexpected {:?}", other.map(|reader| *reader.format())),
    }
}

#[test]
fn test_playback_to_null_output_consumes_whole_file() {
    let wave = write_wave_file(1, 8000, 8, &[], &[0x80; 999]);
    let mut reader = SampleReader::from_wave(open(&wave)).unwrap();
    let format = *reader.format();

    let mut written = 0;
    playback(&NullOutput, &format, |line| {
        written = stream_blocks(&mut reader, line, 64)?;
        Ok(())
    }).unwrap();

    assert_eq!(999, written);
    assert!(reader.is_exhausted());
}

#[test]
fn test_stream_blocks_into_line() {
    let wave = write_wave_file(2, 48000, 24, &[], &[0; 600]);
    let mut reader = SampleReader::from_wave(open(&wave)).unwrap();
    let mut line = NullLine::default();

    assert_eq!(600, stream_blocks(&mut reader, &mut line, 10).unwrap());
    assert_eq!(600, line.bytes_written());
}
