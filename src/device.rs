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

//! Playback on the default output device through CPAL.
//!
//! Written bytes go into a bounded queue that the device callback drains, so
//! [`OutputLine::write`] blocks while the device is behind. That back-pressure
//! is what paces the sample reader.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::player::{pcm_to_f32, AudioOutput, OutputFormat, OutputLine, PlaybackError,
                    PlaybackResult};
use crate::SampleEncoding;

/// Frames buffered between the writer and the device callback.
const QUEUE_FRAMES: usize = 8192;

/// How long a write may wait for room before the device counts as stalled.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the time spent waiting for the queue to empty.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn backend_error<E: fmt::Display>(err: E) -> PlaybackError {
    PlaybackError::Backend {
        backend: "cpal",
        details: err.to_string(),
    }
}

// Bytes waiting to be played, shared with the device callback.
struct SampleQueue {
    bytes: Mutex<VecDeque<u8>>,
    // Signalled whenever the callback has consumed bytes.
    consumed: Condvar,
    capacity: usize,
    bytes_per_sample: usize,
    channel_count: usize,
    encoding: SampleEncoding,
}

impl SampleQueue {
    fn new(format: &OutputFormat, frames: usize) -> SampleQueue {
        let capacity = frames * format.frame_size as usize;
        SampleQueue {
            bytes: Mutex::new(VecDeque::with_capacity(capacity)),
            consumed: Condvar::new(),
            capacity,
            bytes_per_sample: format.bytes_per_sample(),
            channel_count: usize::from(format.channel_count),
            encoding: format.encoding,
        }
    }

    fn frame_size(&self) -> usize {
        self.bytes_per_sample * self.channel_count
    }

    // Fills `out` with whole frames from the queue. A frame that isn't
    // completely queued yet is left for the next callback and silence is
    // played instead, so channels never shift.
    fn fill(&self, out: &mut [f32]) {
        let frame_size = self.frame_size();
        let mut sample = [0u8; 4];
        let mut bytes = self.bytes.lock();

        for frame in out.chunks_mut(self.channel_count) {
            if frame.len() < self.channel_count || bytes.len() < frame_size {
                frame.fill(0.0);
                continue;
            }
            for value in frame.iter_mut() {
                for (slot, byte) in sample.iter_mut().zip(bytes.drain(..self.bytes_per_sample)) {
                    *slot = byte;
                }
                *value = pcm_to_f32(&sample[..self.bytes_per_sample], self.encoding);
            }
        }

        drop(bytes);
        self.consumed.notify_all();
    }

    // Appends `block`, waiting for the callback whenever the queue is full.
    fn push(&self, block: &[u8], timeout: Duration) -> PlaybackResult<()> {
        let mut remaining = block;

        while !remaining.is_empty() {
            let mut bytes = self.bytes.lock();
            while bytes.len() >= self.capacity {
                let waited = self.consumed.wait_for(&mut bytes, timeout);
                if waited.timed_out() && bytes.len() >= self.capacity {
                    return Err(backend_error("output device stopped consuming samples"));
                }
            }

            let room = self.capacity - bytes.len();
            let (now, later) = remaining.split_at(room.min(remaining.len()));
            bytes.extend(now.iter().copied());
            remaining = later;
        }

        Ok(())
    }

    // Waits until every whole frame has been played. Returns the number of
    // bytes left behind; a trailing partial frame is never played.
    fn wait_drained(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let frame_size = self.frame_size();
        let mut bytes = self.bytes.lock();

        while bytes.len() >= frame_size {
            if self.consumed.wait_until(&mut bytes, deadline).timed_out() {
                break;
            }
        }
        bytes.len()
    }
}

/// The default output device of the default host.
pub struct CpalOutput {
    device: cpal::Device,
}

impl CpalOutput {
    pub fn default_device() -> PlaybackResult<CpalOutput> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(PlaybackError::DeviceNotFound)?;
        match device.name() {
            Ok(name) => debug!(device = %name, host = ?host.id(), "using default output device"),
            Err(err) => warn!(error = %err, "output device has no name"),
        }
        Ok(CpalOutput { device })
    }
}

impl AudioOutput for CpalOutput {
    type Line = CpalLine;

    fn open(&self, format: &OutputFormat) -> PlaybackResult<CpalLine> {
        if format.big_endian {
            return Err(PlaybackError::UnsupportedFormat("big-endian samples".to_string()));
        }
        if format.channel_count == 0 {
            return Err(PlaybackError::UnsupportedFormat("zero channels".to_string()));
        }
        if !(1..=4).contains(&format.bytes_per_sample()) {
            return Err(PlaybackError::UnsupportedFormat(
                format!("{} bits per sample", format.bits_per_sample)));
        }

        let config = cpal::StreamConfig {
            channels: format.channel_count,
            sample_rate: cpal::SampleRate(format.sample_rate_hz),
            buffer_size: cpal::BufferSize::Default,
        };
        let queue = Arc::new(SampleQueue::new(format, QUEUE_FRAMES));

        let callback_queue = Arc::clone(&queue);
        let stream = self.device
            .build_output_stream(&config,
                                 move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                     callback_queue.fill(out)
                                 },
                                 |err| error!(error = %err, "output stream error"),
                                 None)
            .map_err(backend_error)?;
        stream.play().map_err(backend_error)?;

        Ok(CpalLine { stream, queue })
    }
}

/// A playing output stream on a CPAL device.
pub struct CpalLine {
    stream: cpal::Stream,
    queue: Arc<SampleQueue>,
}

impl OutputLine for CpalLine {
    fn write(&mut self, block: &[u8]) -> PlaybackResult<()> {
        self.queue.push(block, WRITE_TIMEOUT)
    }

    fn drain(&mut self) -> PlaybackResult<()> {
        let remaining = self.queue.wait_drained(DRAIN_TIMEOUT);
        if remaining >= self.queue.frame_size() {
            warn!(remaining, "gave up draining output line");
        }
        Ok(())
    }

    fn stop(&mut self) -> PlaybackResult<()> {
        self.stream.pause().map_err(backend_error)
    }
}
