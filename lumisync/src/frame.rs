//! Pixel buffers delivered by the capture source.

use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::color::Rgb8;
use crate::error::{Error, Result};
use crate::sampler::CellGrid;

/// Channel layout of an interleaved 8-bit pixel buffer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
pub enum PixelFormat {
    Bgra8,
    Rgba8,
    Bgr8,
    Rgb8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
        }
    }

    /// Byte offsets of the red, green and blue channels within a pixel.
    pub const fn channel_offsets(self) -> [usize; 3] {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Bgr8 => [2, 1, 0],
            PixelFormat::Rgba8 | PixelFormat::Rgb8 => [0, 1, 2],
        }
    }
}

/// Borrowed view over a captured pixel buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
}

impl<'a> FrameView<'a> {
    /// Validates the buffer geometry. `stride` is the distance between rows in bytes.
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidFrame(format!(
                "empty frame {}x{}",
                width, height
            )));
        }

        let row_bytes = width as usize * format.bytes_per_pixel();
        if stride < row_bytes {
            return Err(Error::InvalidFrame(format!(
                "stride {} is smaller than row size {}",
                stride, row_bytes
            )));
        }

        let required = stride * (height as usize - 1) + row_bytes;
        if data.len() < required {
            return Err(Error::InvalidFrame(format!(
                "buffer holds {} bytes, {}x{} {} needs {}",
                data.len(),
                width,
                height,
                format,
                required
            )));
        }

        Ok(Self {
            data,
            width,
            height,
            stride,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes of row `y`, trimmed to the visible width.
    #[inline]
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * self.format.bytes_per_pixel()]
    }

    /// Color of pixel `(x, y)` in the 0..=255 range.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Vec3 {
        let bpp = self.format.bytes_per_pixel();
        let [r, g, b] = self.format.channel_offsets();
        let row = self.row(y);
        let px = &row[x as usize * bpp..x as usize * bpp + bpp];
        Vec3::new(px[r] as f32, px[g] as f32, px[b] as f32)
    }
}

/// Owned pixel buffer, suitable for handing across threads.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Result<Self> {
        FrameView::new(&data, width, height, stride, format)?;
        Ok(Self {
            data,
            width,
            height,
            stride,
            format,
        })
    }

    /// Builds a tightly packed frame by evaluating `paint` for every pixel.
    pub fn from_fn(
        width: u32,
        height: u32,
        format: PixelFormat,
        mut paint: impl FnMut(u32, u32) -> Rgb8,
    ) -> Self {
        let bpp = format.bytes_per_pixel();
        let [r, g, b] = format.channel_offsets();
        let stride = width as usize * bpp;
        let mut data = vec![0u8; stride * height as usize];

        for y in 0..height {
            for x in 0..width {
                let color = paint(x, y);
                let offset = y as usize * stride + x as usize * bpp;
                let px = &mut data[offset..offset + bpp];
                px[r] = color.r;
                px[g] = color.g;
                px[b] = color.b;
                if bpp == 4 {
                    px[3] = 255;
                }
            }
        }

        Self {
            data,
            width,
            height,
            stride,
            format,
        }
    }

    pub fn solid(width: u32, height: u32, format: PixelFormat, color: Rgb8) -> Self {
        Self::from_fn(width, height, format, |_, _| color)
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: self.format,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// What the capture side delivers for one frame.
#[derive(Debug, Clone)]
pub enum FrameContent {
    /// Raw pixels, sampled on the CPU.
    Pixels(Frame),
    /// Per-cell aggregates computed elsewhere (e.g. a GPU kernel).
    Cells(CellGrid),
    /// Per-zone colors from a color source, bypassing sampling.
    Colors(Vec<Rgb8>),
}

/// A frame plus its presentation timestamp.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub content: FrameContent,
    pub timestamp: Duration,
}

impl CapturedFrame {
    pub fn pixels(frame: Frame, timestamp: Duration) -> Self {
        Self {
            content: FrameContent::Pixels(frame),
            timestamp,
        }
    }

    pub fn cells(grid: CellGrid, timestamp: Duration) -> Self {
        Self {
            content: FrameContent::Cells(grid),
            timestamp,
        }
    }

    pub fn colors(colors: Vec<Rgb8>, timestamp: Duration) -> Self {
        Self {
            content: FrameContent::Colors(colors),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_reads_channels_in_format_order() {
        let bgra = [10u8, 20, 30, 255, 40, 50, 60, 255];
        let view = FrameView::new(&bgra, 2, 1, 8, PixelFormat::Bgra8).unwrap();
        assert_eq!(view.pixel(0, 0), Vec3::new(30.0, 20.0, 10.0));
        assert_eq!(view.pixel(1, 0), Vec3::new(60.0, 50.0, 40.0));

        let rgb = [1u8, 2, 3];
        let view = FrameView::new(&rgb, 1, 1, 3, PixelFormat::Rgb8).unwrap();
        assert_eq!(view.pixel(0, 0), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn view_honours_padded_stride() {
        // 1x2 RGB with 2 bytes of row padding
        let data = [255u8, 0, 0, 9, 9, 0, 0, 255];
        let view = FrameView::new(&data, 1, 2, 5, PixelFormat::Rgb8).unwrap();
        assert_eq!(view.pixel(0, 1), Vec3::new(0.0, 0.0, 255.0));
        assert_eq!(view.row(1).len(), 3);
    }

    #[test]
    fn rejects_short_buffers_and_strides() {
        let data = [0u8; 11];
        assert!(matches!(
            FrameView::new(&data, 2, 2, 6, PixelFormat::Rgb8),
            Err(Error::InvalidFrame(_))
        ));
        assert!(matches!(
            FrameView::new(&data, 2, 1, 5, PixelFormat::Rgb8),
            Err(Error::InvalidFrame(_))
        ));
        assert!(FrameView::new(&data, 0, 1, 6, PixelFormat::Rgb8).is_err());
    }

    #[test]
    fn from_fn_paints_every_pixel() {
        let frame = Frame::from_fn(4, 3, PixelFormat::Bgra8, |x, _| {
            if x < 2 {
                Rgb8::new(255, 0, 0)
            } else {
                Rgb8::new(0, 0, 255)
            }
        });
        let view = frame.view();
        assert_eq!(view.pixel(1, 2), Vec3::new(255.0, 0.0, 0.0));
        assert_eq!(view.pixel(3, 0), Vec3::new(0.0, 0.0, 255.0));
    }
}
