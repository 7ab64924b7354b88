//! §4.4 AudioPath: the pull-driven decode/resample/sync pipeline that backs
//! the audio device callback.
//!
//! Grounded on `audio/player.rs`'s resampler setup (target format selection,
//! `ChannelLayout` defaulting) and `audio/decoder.rs`'s decode loop, but
//! restructured around a single `pull` entry point the device callback calls
//! directly instead of a background thread pushing into a ring buffer.

use ffmpeg_next::{self as ffmpeg};
use tracing::{error, warn};

use crate::audio::decoder::AudioStreamDecoder;
use crate::audio::sync::{self, DiffAccumulator};
use crate::clock::{AudioClock, MasterClock};
use crate::queue::{Dequeued, PacketQueue};
use std::sync::Arc;

/// Target format/rate used whenever resampling is required (§4.4, §11).
const RESAMPLE_RATE: u32 = 44100;
const RESAMPLE_CHANNELS: u16 = 2;

fn default_layout(channels: u16, layout: ffmpeg::channel_layout::ChannelLayout) -> ffmpeg::channel_layout::ChannelLayout {
    if !layout.is_empty() {
        return layout;
    }
    match channels {
        1 => ffmpeg::channel_layout::ChannelLayout::MONO,
        2 => ffmpeg::channel_layout::ChannelLayout::STEREO,
        _ => ffmpeg::channel_layout::ChannelLayout::STEREO_DOWNMIX,
    }
}

pub struct AudioPath {
    queue: Arc<PacketQueue>,
    decoder: AudioStreamDecoder,
    resampler: Option<ffmpeg::software::resampling::Context>,
    clock: AudioClock,
    master: MasterClock,
    out_sample_rate: u32,
    out_channels: u16,
    running_seconds: f64,
    buf: Vec<u8>,
    buf_index: usize,
    diff_state: DiffAccumulator,
    eof: bool,
}

impl AudioPath {
    /// Decides up front, from the stream's codec parameters alone, whether a
    /// resampler is needed: native S16 sources are played as-is (§11), any
    /// other format is converted to stereo/44100/s16.
    pub fn new(
        parameters: ffmpeg::codec::Parameters,
        time_base: ffmpeg::Rational,
        queue: Arc<PacketQueue>,
        clock: AudioClock,
        master: MasterClock,
    ) -> crate::error::Result<Self> {
        let decoder = AudioStreamDecoder::open(parameters, time_base)?;
        let needs_resample = decoder.sample_format() != ffmpeg::format::Sample::I16(ffmpeg::format::sample::Type::Packed);

        let (out_sample_rate, out_channels, resampler) = if needs_resample {
            let in_layout = default_layout(decoder.channels(), decoder.channel_layout());
            let out_layout = ffmpeg::channel_layout::ChannelLayout::STEREO;
            match ffmpeg::software::resampling::Context::get(
                decoder.sample_format(),
                in_layout,
                decoder.rate(),
                ffmpeg::format::Sample::I16(ffmpeg::format::sample::Type::Packed),
                out_layout,
                RESAMPLE_RATE,
            ) {
                Ok(ctx) => (RESAMPLE_RATE, RESAMPLE_CHANNELS, Some(ctx)),
                Err(e) => {
                    // §7 resample-init failure: fall back to no-resample path.
                    warn!("resampler init failed ({e}); falling back to native format");
                    (decoder.rate(), decoder.channels(), None)
                }
            }
        } else {
            (decoder.rate(), decoder.channels(), None)
        };

        Ok(Self {
            queue,
            decoder,
            resampler,
            clock,
            master,
            out_sample_rate,
            out_channels,
            running_seconds: 0.0,
            buf: Vec::new(),
            buf_index: 0,
            diff_state: DiffAccumulator::new(),
            eof: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.out_sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.out_channels
    }

    fn bytes_per_second(&self) -> u32 {
        self.out_channels as u32 * 2 * self.out_sample_rate
    }

    fn bytes_per_sample_frame(&self) -> usize {
        self.out_channels as usize * 2
    }

    /// Fills `dest` (interleaved s16) from the decode/resample/sync
    /// pipeline, emitting silence where the pipeline has nothing left.
    pub fn pull(&mut self, dest: &mut [i16]) {
        let mut written = 0;
        while written < dest.len() {
            if self.buf_index >= self.buf.len() {
                if !self.refill() {
                    for s in &mut dest[written..] {
                        *s = 0;
                    }
                    return;
                }
            }

            let remaining_bytes = self.buf.len() - self.buf_index;
            let remaining_samples = remaining_bytes / 2;
            let take = remaining_samples.min(dest.len() - written);
            for i in 0..take {
                let byte_off = self.buf_index + i * 2;
                dest[written + i] = i16::from_ne_bytes([self.buf[byte_off], self.buf[byte_off + 1]]);
            }
            self.buf_index += take * 2;
            written += take;

            let pending = self.buf.len() - self.buf_index;
            self.clock.set_pending_bytes(pending, self.bytes_per_second());
        }
    }

    /// §4.4 decoder step: pulls one decoded (and possibly resampled,
    /// sync-corrected) chunk into `self.buf`. Returns `false` once the
    /// stream is exhausted and no more data will ever arrive.
    fn refill(&mut self) -> bool {
        loop {
            match self.decoder.receive_frame() {
                Ok(Some(frame)) => {
                    let raw = self.extract_bytes(&frame);
                    self.advance_clock(raw.len());
                    let mut raw = raw;
                    self.apply_sync(&mut raw);
                    self.buf = raw;
                    self.buf_index = 0;
                    return true;
                }
                Ok(None) => {
                    if self.eof {
                        return false;
                    }
                    match self.queue.get(true) {
                        Dequeued::Packet(packet) => {
                            if let Some(pts) = packet.pts {
                                self.running_seconds = self.decoder.time_base_secs() * pts as f64;
                                self.clock.set_seconds(self.running_seconds);
                            }
                            if let Err(e) = self.decoder.send_packet(&packet.payload) {
                                warn!("audio send_packet failed: {e}");
                            }
                        }
                        Dequeued::Empty => unreachable!("get(true) never returns Empty"),
                        Dequeued::ShuttingDown => {
                            self.eof = true;
                            if let Err(e) = self.decoder.send_eof() {
                                warn!("audio send_eof failed: {e}");
                                return false;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("audio decode error: {e}");
                    return false;
                }
            }
        }
    }

    fn extract_bytes(&mut self, frame: &ffmpeg::util::frame::Audio) -> Vec<u8> {
        match &mut self.resampler {
            Some(resampler) => {
                let mut resampled = ffmpeg::util::frame::Audio::empty();
                match resampler.run(frame, &mut resampled) {
                    Ok(_) => resampled.data(0).to_vec(),
                    Err(e) => {
                        warn!("resample error: {e}; substituting silence");
                        Vec::new()
                    }
                }
            }
            None => frame.data(0).to_vec(),
        }
    }

    fn advance_clock(&mut self, bytes: usize) {
        let seconds = bytes as f64 / self.bytes_per_second() as f64;
        self.running_seconds += seconds;
        self.clock.set_seconds(self.running_seconds);
    }

    fn apply_sync(&mut self, chunk: &mut Vec<u8>) {
        if self.master.is_audio_master() || chunk.is_empty() {
            return;
        }
        let diff = self.clock.now() - self.master.now();
        self.diff_state.maybe_resync(diff);
        if let Some(avg_diff) = self.diff_state.update(diff) {
            let thresh = sync::threshold(self.out_sample_rate);
            if avg_diff.abs() >= thresh {
                let wanted = sync::wanted_size(chunk.len(), diff, self.out_sample_rate, self.out_channels);
                sync::apply_correction(chunk, wanted, self.bytes_per_sample_frame());
            }
        }
    }
}
