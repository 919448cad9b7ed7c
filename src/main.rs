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

//! Plays an uncompressed PCM wave file on the default output device.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;
#[cfg(not(feature = "playback"))]
use tracing::warn;

use wave_decoder::player::{self, AudioOutput, NullOutput};
use wave_decoder::{Config, SampleReader, DEFAULT_BLOCK_SIZE};

#[derive(Parser)]
#[command(name = "wave-decoder")]
#[command(about = "Play an uncompressed PCM wave file", long_about = None)]
#[command(version)]
struct Cli {
    /// Absolute path of the wave file to play
    file: PathBuf,

    /// Samples per channel read from the file at a time
    #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE, value_parser = parse_block_size)]
    block_size: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Decode the file without opening an audio device
    #[arg(long)]
    dry_run: bool,
}

fn parse_block_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("block size must be at least 1".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(err.to_string()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config {
        block_size: cli.block_size,
        verbose: cli.verbose,
        debug: cli.debug,
        dry_run: cli.dry_run,
    };
    config.init_logging();

    run(&cli.file, &config)
}

fn run(path: &Path, config: &Config) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    // The file is closed when the reader is dropped, whichever way we leave.
    let mut reader = SampleReader::from_wave(BufReader::new(file))
        .with_context(|| format!("Failed to read RIFF WAVE header of {}", path.display()))?;
    info!("{}", reader.format());

    if config.dry_run {
        play(&NullOutput, &mut reader, config.block_size)
    } else {
        play_on_device(&mut reader, config.block_size)
    }
}

#[cfg(feature = "playback")]
fn play_on_device<R: Read>(reader: &mut SampleReader<R>, block_size: usize) -> anyhow::Result<()> {
    let output = wave_decoder::device::CpalOutput::default_device()?;
    play(&output, reader, block_size)
}

#[cfg(not(feature = "playback"))]
fn play_on_device<R: Read>(reader: &mut SampleReader<R>, block_size: usize) -> anyhow::Result<()> {
    warn!("built without the `playback` feature; decoding without an audio device");
    play(&NullOutput, reader, block_size)
}

fn play<O, R>(output: &O, reader: &mut SampleReader<R>, block_size: usize) -> anyhow::Result<()>
    where O: AudioOutput,
          R: Read
{
    let format = *reader.format();
    player::playback(output, &format, |line| {
        player::stream_blocks(reader, line, block_size).map(|_| ())
    })?;
    Ok(())
}
