//! Blocking PCM16 readers and writers over cpal streams.
//!
//! cpal delivers and requests audio from its own callback thread. These
//! wrappers put a ring buffer between that callback and a plain
//! `read`/`write` API, so the owning thread can loop over fixed-size chunks.
//!
//! `cpal::Stream` is not `Send`: open these on the thread that uses them.

use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd};

use crate::audio::{self, ToBinary, BYTES_PER_FRAME};
use crate::device;

/// Seconds of audio each ring buffer can hold.
const BUFFER_SECONDS: usize = 2;
/// Longest a single `read` waits for the microphone to fill the buffer.
const READ_TIMEOUT: Duration = Duration::from_millis(250);
const POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Slack added to the expected playout time while draining.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Microphone capture as a blocking PCM16 mono reader.
pub struct Microphone {
    _stream: cpal::Stream,
    samples: HeapCons<f32>,
    failed: Arc<AtomicBool>,
}

impl Microphone {
    pub fn open(device_name: Option<String>, sample_rate: u32) -> anyhow::Result<Self> {
        let input = device::get_or_default_input(device_name)?;
        let config = device::input_config(&input, sample_rate)?;
        let channel_count = config.channels as usize;
        tracing::info!("input: device={:?}, config={:?}", input.name().unwrap_or_default(), &config);

        let (mut producer, samples) =
            audio::shared_buffer(sample_rate as usize * BUFFER_SECONDS).split();
        let failed = Arc::new(AtomicBool::new(false));
        let stream_failed = failed.clone();

        let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono = audio::downmix(data, channel_count);
            let pushed = producer.push_slice(&mono);
            if pushed < mono.len() {
                tracing::warn!("microphone buffer full, dropped {} samples", mono.len() - pushed);
            }
        };
        let stream = input
            .build_input_stream(
                &config,
                input_data_fn,
                move |err| {
                    tracing::error!("an error occurred on input stream: {}", err);
                    stream_failed.store(true, Ordering::SeqCst);
                },
                None,
            )
            .context("failed to build input stream")?;
        stream.play().context("failed to start input stream")?;

        Ok(Self {
            _stream: stream,
            samples,
            failed,
        })
    }

    /// Fills `buf` with PCM16 little-endian samples.
    ///
    /// Waits at most [`READ_TIMEOUT`] and returns the number of bytes
    /// written, which is zero when the device produced nothing in time.
    pub fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let wanted = buf.len() / BYTES_PER_FRAME;
        let mut frames = vec![0.0f32; wanted];
        let mut filled = 0;
        let deadline = Instant::now() + READ_TIMEOUT;
        while filled < wanted {
            if self.failed.load(Ordering::SeqCst) {
                anyhow::bail!("input stream failed");
            }
            filled += self.samples.pop_slice(&mut frames[filled..]);
            if filled < wanted {
                if Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
        let pcm = frames[..filled].to_binary();
        buf[..pcm.len()].copy_from_slice(&pcm);
        Ok(pcm.len())
    }
}

/// Speaker output as a blocking PCM16 mono writer.
pub struct Speaker {
    _stream: cpal::Stream,
    samples: HeapProd<f32>,
    // Samples written but not yet pulled by the callback. May dip below zero
    // briefly, since the callback can pop before `write` records the push.
    queued: Arc<AtomicIsize>,
    failed: Arc<AtomicBool>,
    sample_rate: u32,
}

impl Speaker {
    pub fn open(device_name: Option<String>, sample_rate: u32) -> anyhow::Result<Self> {
        let output = device::get_or_default_output(device_name)?;
        let config = device::output_config(&output, sample_rate)?;
        let output_channel_count = config.channels as usize;
        tracing::info!("output: device={:?}, config={:?}", output.name().unwrap_or_default(), &config);

        let (samples, mut consumer) =
            audio::shared_buffer(sample_rate as usize * BUFFER_SECONDS).split();
        let queued = Arc::new(AtomicIsize::new(0));
        let played = queued.clone();
        let failed = Arc::new(AtomicBool::new(false));
        let stream_failed = failed.clone();

        let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(output_channel_count) {
                let sample = match consumer.try_pop() {
                    Some(sample) => {
                        played.fetch_sub(1, Ordering::SeqCst);
                        sample
                    }
                    None => 0.0,
                };
                for out in frame.iter_mut() {
                    *out = sample;
                }
            }
        };
        let stream = output
            .build_output_stream(
                &config,
                output_data_fn,
                move |err| {
                    tracing::error!("an error occurred on output stream: {}", err);
                    stream_failed.store(true, Ordering::SeqCst);
                },
                None,
            )
            .context("failed to build output stream")?;
        stream.play().context("failed to start output stream")?;

        Ok(Self {
            _stream: stream,
            samples,
            queued,
            failed,
            sample_rate,
        })
    }

    /// Queues PCM16 little-endian samples, blocking while the buffer is full.
    pub fn write(&mut self, pcm16: &[u8]) -> anyhow::Result<()> {
        let samples = audio::pcm16_to_f32(pcm16);
        let mut offset = 0;
        while offset < samples.len() {
            if self.failed.load(Ordering::SeqCst) {
                anyhow::bail!("output stream failed");
            }
            let pushed = self.samples.push_slice(&samples[offset..]);
            self.queued.fetch_add(pushed as isize, Ordering::SeqCst);
            offset += pushed;
            if pushed == 0 {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
        Ok(())
    }

    /// Blocks until everything written so far has been handed to the device.
    ///
    /// Gives up once the queued audio should long have finished playing.
    pub fn drain(&mut self) -> anyhow::Result<()> {
        let pending = self.queued.load(Ordering::SeqCst).max(0) as u64;
        let expected = Duration::from_millis(pending * 1000 / u64::from(self.sample_rate));
        let deadline = Instant::now() + expected + DRAIN_GRACE;
        while self.queued.load(Ordering::SeqCst) > 0 {
            if self.failed.load(Ordering::SeqCst) {
                anyhow::bail!("output stream failed");
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    "gave up draining with {} samples queued",
                    self.queued.load(Ordering::SeqCst)
                );
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }
}
