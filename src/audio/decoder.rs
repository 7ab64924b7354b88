//! Decodes the audio packet queue into raw frames (§4.3/§4.4).
//!
//! Grounded on `audio/decoder.rs`'s `AudioDecoder`, but restructured: the
//! teacher's version owns its own `format::context::Input` and pulls packets
//! straight off disk behind an `Iterator`. Here the container is owned
//! exclusively by the demultiplexer thread and packets arrive over a
//! [`crate::queue::PacketQueue`]; this type is built from the stream's codec
//! parameters and time base (captured before the container is moved into the
//! demux thread, the same `codec::Parameters`-capture idiom
//! `decode/decoder.rs`'s `get_audio_stream_info` uses to let independent
//! threads each build their own decoder) and exposes the
//! send_packet/receive_frame step directly, matching "decode one frame" from
//! §4.4's decoder step.

use ffmpeg_next::{self as ffmpeg, util::frame::Audio as AudioFrame};
use tracing::warn;

use crate::error::{PlayerError, Result};

pub struct AudioStreamDecoder {
    decoder: ffmpeg::codec::decoder::Audio,
    time_base: ffmpeg::Rational,
}

impl AudioStreamDecoder {
    pub fn open(parameters: ffmpeg::codec::Parameters, time_base: ffmpeg::Rational) -> Result<Self> {
        let context = ffmpeg::codec::context::Context::from_parameters(parameters)
            .map_err(|e| PlayerError::Startup(format!("failed to build audio codec context: {e}")))?;
        let decoder = context
            .decoder()
            .audio()
            .map_err(|e| PlayerError::Startup(format!("no audio decoder for stream: {e}")))?;
        Ok(Self { decoder, time_base })
    }

    pub fn time_base_secs(&self) -> f64 {
        self.time_base.numerator() as f64 / self.time_base.denominator() as f64
    }

    pub fn sample_format(&self) -> ffmpeg::format::Sample {
        self.decoder.format()
    }

    pub fn channel_layout(&self) -> ffmpeg::channel_layout::ChannelLayout {
        self.decoder.channel_layout()
    }

    pub fn channels(&self) -> u16 {
        self.decoder.channels()
    }

    pub fn rate(&self) -> u32 {
        self.decoder.rate()
    }

    /// §4.4: hands one audio packet's payload to the decoder.
    pub fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        let packet = ffmpeg::codec::packet::Packet::copy(payload);
        self.decoder.send_packet(&packet)?;
        Ok(())
    }

    pub fn send_eof(&mut self) -> Result<()> {
        self.decoder.send_eof()?;
        Ok(())
    }

    /// Pulls the next buffered frame. `Ok(None)` means the decoder needs
    /// another packet (EAGAIN) or is fully drained (Eof) — the caller's loop
    /// treats both the same way: "current packet is exhausted".
    pub fn receive_frame(&mut self) -> Result<Option<AudioFrame>> {
        let mut frame = AudioFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::sys::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => {
                warn!("audio decode error: {e}");
                Err(PlayerError::Decode(e))
            }
        }
    }
}
