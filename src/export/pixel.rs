//! Pixel buffers handed to the video sink
//!
//! Buffers come from a pool and go back to it when dropped, so the export
//! allocates only as many frames as are in flight at once.

use super::canvas::FrameImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Byte order of a 32-bit pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba,
    Bgra,
    Argb,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Name of the format for ffmpeg's `-pix_fmt`
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Rgba => "rgba",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Argb => "argb",
        }
    }

    /// Convert RGBA pixels into this format
    pub fn convert_from_rgba(&self, src: &[u8], dst: &mut [u8]) {
        if *self == PixelFormat::Rgba {
            let len = src.len().min(dst.len());
            dst[..len].copy_from_slice(&src[..len]);
            return;
        }
        for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
            let [r, g, b, a] = [s[0], s[1], s[2], s[3]];
            let out = match self {
                PixelFormat::Rgba => [r, g, b, a],
                PixelFormat::Bgra => [b, g, r, a],
                PixelFormat::Argb => [a, r, g, b],
            };
            d.copy_from_slice(&out);
        }
    }
}

struct PoolInner {
    width: u32,
    height: u32,
    format: PixelFormat,
    free: Mutex<Vec<Vec<u8>>>,
    allocated: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl PoolInner {
    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * PixelFormat::BYTES_PER_PIXEL
    }
}

/// Recycles frame-sized byte buffers
#[derive(Clone)]
pub struct PixelBufferPool {
    inner: Arc<PoolInner>,
}

impl PixelBufferPool {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                width,
                height,
                format,
                free: Mutex::new(Vec::new()),
                allocated: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }

    /// Take a buffer, reusing a returned one when available
    pub fn acquire(&self) -> PixelBuffer {
        let recycled = self.inner.free.lock().pop();
        let data = match recycled {
            Some(data) => data,
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0; self.inner.frame_len()]
            }
        };

        let in_flight = self.inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner
            .peak_in_flight
            .fetch_max(in_flight, Ordering::AcqRel);

        PixelBuffer {
            data,
            pool: self.inner.clone(),
        }
    }

    /// Buffers currently handed out
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Most buffers ever handed out at once
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::Acquire)
    }

    /// Buffers allocated over the pool's lifetime
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }
}

/// One frame of pixels in the pool's format; returns to the pool on drop
pub struct PixelBuffer {
    data: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        self.pool.width
    }

    pub fn height(&self) -> u32 {
        self.pool.height
    }

    pub fn format(&self) -> PixelFormat {
        self.pool.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copy an RGBA image into the buffer, converting to the pool's format
    pub fn fill_from(&mut self, image: &FrameImage) {
        self.pool.format.convert_from_rgba(image.data(), &mut self.data);
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.free.lock().push(data);
        self.pool.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.pool.width)
            .field("height", &self.pool.height)
            .field("format", &self.pool.format)
            .finish()
    }
}
