//! The video decode thread (§4.3): consumes the video packet queue, decodes,
//! recovers pts, advances the video clock, colour-converts, and enqueues a
//! display-ready [`Picture`].
//!
//! Grounded on `video/decoder.rs`'s codec-context construction and
//! send_packet/receive_frame loop, generalized from "owns its own `Input`"
//! to "pulls packets from a shared [`PacketQueue`]" since the container is
//! owned by the demultiplexer in this design.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ffmpeg_next::{self as ffmpeg};
use tracing::{debug, error, warn};

use crate::platform::events::{AppEvent, EventSender};
use crate::queue::{Dequeued, PacketQueue, PictureQueue};

/// Recovers the frame's presentation pts per §4.3's precedence: packet dts
/// if known, else the decoder's own best-effort frame pts (the reference's
/// `get_buffer2`-stamped opaque side channel; ffmpeg's modern decode API
/// already performs this bookkeeping internally and surfaces it as the
/// frame's own pts — see SPEC_FULL §9's note on using "the decoder's own
/// best-effort pts if available" instead of reimplementing the hook), else 0.
fn recover_pts(packet_dts: Option<i64>, frame_pts: Option<i64>) -> i64 {
    packet_dts.or(frame_pts).unwrap_or(0)
}

/// §4.3 "video synchronizer": folds the recovered pts into a running
/// `video_clock`, accounting for repeated fields/frames.
pub struct VideoSynchronizer {
    time_base_secs: f64,
    video_clock: f64,
}

impl VideoSynchronizer {
    pub fn new(time_base_secs: f64) -> Self {
        Self {
            time_base_secs,
            video_clock: 0.0,
        }
    }

    /// `pts_units` is the recovered timestamp in stream time-base units;
    /// `repeat_pict` is the decoded frame's repeat count. Returns the
    /// display pts in seconds and advances the internal clock.
    pub fn synchronize(&mut self, pts_units: i64, repeat_pict: i32) -> f64 {
        let mut pts = pts_units as f64 * self.time_base_secs;
        if pts != 0.0 {
            self.video_clock = pts;
        } else {
            pts = self.video_clock;
        }
        let frame_delay = self.time_base_secs + 0.5 * self.time_base_secs * repeat_pict as f64;
        self.video_clock += frame_delay;
        pts
    }
}

pub struct VideoDecoderThread {
    queue: Arc<PacketQueue>,
    pictures: Arc<PictureQueue>,
    shutdown: Arc<AtomicBool>,
    events: EventSender,
}

impl VideoDecoderThread {
    pub fn new(
        queue: Arc<PacketQueue>,
        pictures: Arc<PictureQueue>,
        shutdown: Arc<AtomicBool>,
        events: EventSender,
    ) -> Self {
        Self {
            queue,
            pictures,
            shutdown,
            events,
        }
    }

    /// Runs the decode loop on the calling thread until shutdown or stream
    /// end. `parameters`/`time_base` are captured from the stream once, up
    /// front, before the container moves into the demultiplexer's own
    /// thread; packets then arrive exclusively through `queue`.
    pub fn run(self, parameters: ffmpeg::codec::Parameters, time_base: ffmpeg::Rational) -> crate::error::Result<()> {
        let time_base_secs = time_base.numerator() as f64 / time_base.denominator() as f64;

        let context = ffmpeg::codec::context::Context::from_parameters(parameters)
            .map_err(|e| crate::error::PlayerError::Startup(format!("failed to build video codec context: {e}")))?;
        let mut decoder = context
            .decoder()
            .video()
            .map_err(|e| crate::error::PlayerError::Startup(format!("no video decoder for stream: {e}")))?;

        let mut scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::YUV420P,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| crate::error::PlayerError::Startup(format!("failed to build scaler: {e}")))?;

        let sar = decoder.aspect_ratio();
        let sample_aspect_ratio = if sar.denominator() != 0 {
            sar.numerator() as f64 / sar.denominator() as f64
        } else {
            0.0
        };

        let mut sync = VideoSynchronizer::new(time_base_secs);
        let mut last_packet_dts: Option<i64> = None;
        let mut decoded = ffmpeg::util::frame::Video::empty();
        let mut eof_sent = false;

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            match decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let pts_units = recover_pts(last_packet_dts, decoded.pts());
                    let repeat_pict = 0; // ffmpeg-next does not expose repeat_pict; treated as progressive.
                    let display_pts = sync.synchronize(pts_units, repeat_pict);

                    let mut converted = ffmpeg::util::frame::Video::empty();
                    if let Err(e) = scaler.run(&decoded, &mut converted) {
                        warn!("scale error: {e}");
                        continue;
                    }

                    let width = converted.width();
                    let height = converted.height();
                    let y_stride = converted.stride(0);
                    let u_stride = converted.stride(1);
                    let v_stride = converted.stride(2);

                    let put_result = self.pictures.put(width, height, display_pts, sample_aspect_ratio, |pic| {
                        copy_plane(converted.data(0), y_stride, &mut pic.y, pic.y_stride, width as usize, height as usize);
                        // YV12 overlay ordering: V before U (§4.3, §9.4).
                        copy_plane(converted.data(2), v_stride, &mut pic.v, pic.uv_stride, width.div_ceil(2) as usize, height.div_ceil(2) as usize);
                        copy_plane(converted.data(1), u_stride, &mut pic.u, pic.uv_stride, width.div_ceil(2) as usize, height.div_ceil(2) as usize);
                    });

                    if put_result.is_err() {
                        debug!("picture queue shut down; video decode thread exiting");
                        break;
                    }
                    let _ = self.events.send(AppEvent::Refresh);
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::sys::EAGAIN => {
                    if eof_sent {
                        debug!("video decoder drained; exiting");
                        break;
                    }
                    match self.queue.get(true) {
                        Dequeued::Packet(packet) => {
                            last_packet_dts = packet.dts;
                            let av_packet = ffmpeg::codec::packet::Packet::copy(&packet.payload);
                            if let Err(e) = decoder.send_packet(&av_packet) {
                                error!("video send_packet failed: {e}");
                            }
                        }
                        Dequeued::Empty => unreachable!("get(true) never returns Empty"),
                        Dequeued::ShuttingDown => {
                            eof_sent = true;
                            if decoder.send_eof().is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    debug!("video decoder reached eof");
                    break;
                }
                Err(e) => {
                    error!("video decode error: {e}");
                    continue;
                }
            }
        }

        Ok(())
    }
}

fn copy_plane(src: &[u8], src_stride: usize, dst: &mut [u8], dst_stride: usize, width: usize, height: usize) {
    for row in 0..height {
        let src_row = &src[row * src_stride..row * src_stride + width.min(src_stride)];
        let dst_row = &mut dst[row * dst_stride..row * dst_stride + width.min(dst_stride)];
        let n = src_row.len().min(dst_row.len());
        dst_row[..n].copy_from_slice(&src_row[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_precedence_prefers_dts_when_known() {
        assert_eq!(recover_pts(Some(7), Some(99)), 7);
    }

    #[test]
    fn pts_precedence_falls_back_to_opaque_pts() {
        assert_eq!(recover_pts(None, Some(99)), 99);
    }

    #[test]
    fn pts_precedence_defaults_to_zero() {
        assert_eq!(recover_pts(None, None), 0);
    }

    #[test]
    fn synchronizer_advances_by_time_base_with_no_repeat() {
        let mut sync = VideoSynchronizer::new(1.0 / 30.0);
        let p0 = sync.synchronize(0, 0);
        assert_eq!(p0, 0.0);
        let p1 = sync.synchronize(1, 0);
        assert!((p1 - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn synchronizer_holds_video_clock_when_pts_is_zero() {
        let mut sync = VideoSynchronizer::new(1.0 / 30.0);
        sync.synchronize(3, 0); // seeds video_clock to a nonzero pts
        let held = sync.synchronize(0, 0);
        assert!(held > 0.0, "pts=0 should fall back to the running video_clock");
    }

    #[test]
    fn synchronizer_accounts_for_repeat_pict() {
        let mut sync = VideoSynchronizer::new(0.04);
        sync.synchronize(1, 0);
        let before = sync.video_clock;
        sync.synchronize(2, 1);
        let after = sync.video_clock;
        // repeat_pict=1 adds an extra 0.5 * time_base on top of the normal advance
        assert!((after - before - 0.04 - 0.02).abs() < 1e-9);
    }

    #[test]
    fn copy_plane_respects_mismatched_strides() {
        let src = vec![1u8, 2, 3, 9, 4, 5, 6, 9];
        let mut dst = vec![0u8; 6];
        copy_plane(&src, 4, &mut dst, 3, 3, 2);
        assert_eq!(dst, vec![1, 2, 3, 4, 5, 6]);
    }
}
