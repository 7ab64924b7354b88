//! The pixel surface with YUV overlay acceptance (§6): `w`/`h` queryable,
//! overlay (re)allocation, and a destination-rectangle blit.

use crate::queue::Picture;

pub trait VideoSurface: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Called on the main thread in response to an `AllocRequest`; gives the
    /// surface a chance to resize any backing store it keeps for the
    /// current stream dimensions. The picture-queue slot allocation itself
    /// is independent of this (see `PictureQueue::fulfill_allocation`).
    fn prepare(&mut self, _width: u32, _height: u32) {}

    /// Blits `picture` into the destination rectangle `(x, y, w, h)`.
    fn display(&mut self, picture: &Picture, x: i32, y: i32, w: u32, h: u32);

    /// Whether the surface is still accepting frames; `false` once the user
    /// has closed the window. Headless surfaces never close themselves.
    fn is_open(&self) -> bool {
        true
    }
}

/// A surface that tracks the last blit without touching any real display;
/// used for headless runs (`--no-window`) and tests.
pub struct NullSurface {
    width: u32,
    height: u32,
    pub last_blit: Option<(f64, i32, i32, u32, u32)>,
}

impl NullSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            last_blit: None,
        }
    }
}

impl VideoSurface for NullSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn display(&mut self, picture: &Picture, x: i32, y: i32, w: u32, h: u32) {
        self.last_blit = Some((picture.pts, x, y, w, h));
    }
}

/// Converts a Y/V/U planar picture to packed 0RGB, the pixel format
/// `minifb::Window::update_with_buffer` expects, using the standard
/// BT.601 full-range matrix.
fn yuv_to_rgb_buffer(picture: &Picture, out: &mut [u32]) {
    let w = picture.width as usize;
    let h = picture.height as usize;
    for row in 0..h {
        let y_row = &picture.y[row * picture.y_stride..];
        let uv_row = row / 2;
        let v_row = &picture.v[uv_row * picture.uv_stride..];
        let u_row = &picture.u[uv_row * picture.uv_stride..];
        for col in 0..w {
            let y = y_row[col] as f32;
            let v = v_row[col / 2] as f32 - 128.0;
            let u = u_row[col / 2] as f32 - 128.0;

            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u32;
            let g = (y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0) as u32;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u32;

            out[row * w + col] = (r << 16) | (g << 8) | b;
        }
    }
}

/// A real on-screen window backed by `minifb`. Holds its own RGB scratch
/// buffer sized to the surface (not the source picture, which may be
/// smaller and letterboxed per `fit_rect`).
pub struct MinifbSurface {
    window: minifb::Window,
    width: u32,
    height: u32,
    framebuffer: Vec<u32>,
    scratch: Vec<u32>,
}

impl MinifbSurface {
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self, minifb::Error> {
        let window = minifb::Window::new(
            title,
            width as usize,
            height as usize,
            minifb::WindowOptions::default(),
        )?;
        Ok(Self {
            window,
            width,
            height,
            framebuffer: vec![0u32; (width * height) as usize],
            scratch: Vec::new(),
        })
    }

}

impl VideoSurface for MinifbSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn display(&mut self, picture: &Picture, x: i32, y: i32, w: u32, h: u32) {
        let needed = (picture.width * picture.height) as usize;
        if self.scratch.len() != needed {
            self.scratch.resize(needed, 0);
        }
        yuv_to_rgb_buffer(picture, &mut self.scratch);

        // nearest-neighbour blit of the decoded picture into the destination
        // rect, letterboxed into the (possibly larger) framebuffer.
        self.framebuffer.fill(0);
        for dy in 0..h {
            let sy = (dy * picture.height) / h.max(1);
            for dx in 0..w {
                let sx = (dx * picture.width) / w.max(1);
                let src = self.scratch[(sy * picture.width + sx) as usize];
                let dst_x = x + dx as i32;
                let dst_y = y + dy as i32;
                if dst_x >= 0 && dst_y >= 0 && (dst_x as u32) < self.width && (dst_y as u32) < self.height {
                    self.framebuffer[dst_y as usize * self.width as usize + dst_x as usize] = src;
                }
            }
        }

        let _ = self
            .window
            .update_with_buffer(&self.framebuffer, self.width as usize, self.height as usize);
    }

    fn is_open(&self) -> bool {
        self.window.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_picture(width: u32, height: u32, y: u8, u: u8, v: u8) -> Picture {
        let y_stride = width as usize;
        let uv_stride = width.div_ceil(2) as usize;
        Picture {
            y: vec![y; y_stride * height as usize],
            v: vec![v; uv_stride * height.div_ceil(2) as usize],
            u: vec![u; uv_stride * height.div_ceil(2) as usize],
            y_stride,
            uv_stride,
            width,
            height,
            pts: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn null_surface_records_last_blit() {
        let mut s = NullSurface::new(640, 480);
        let mut pic = flat_picture(4, 2, 128, 128, 128);
        pic.pts = 3.5;
        s.display(&pic, 10, 20, 100, 50);
        assert_eq!(s.last_blit, Some((3.5, 10, 20, 100, 50)));
    }

    #[test]
    fn yuv_neutral_gray_maps_to_rgb_gray() {
        let pic = flat_picture(2, 2, 128, 128, 128);
        let mut out = vec![0u32; 4];
        yuv_to_rgb_buffer(&pic, &mut out);
        for px in out {
            let r = (px >> 16) & 0xff;
            let g = (px >> 8) & 0xff;
            let b = px & 0xff;
            assert!(r.abs_diff(128) <= 1);
            assert!(g.abs_diff(128) <= 1);
            assert!(b.abs_diff(128) <= 1);
        }
    }
}
