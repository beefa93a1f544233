//! RGBA drawing surface for rendered frames

use crate::export::types::ExportError;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// 8-bit RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Same color with alpha scaled by `alpha` (0.0 to 1.0)
    pub fn with_alpha(self, alpha: f32) -> Self {
        Self {
            a: (f32::from(self.a) * alpha.clamp(0.0, 1.0)).round() as u8,
            ..self
        }
    }
}

/// An RGBA image, row-major, four bytes per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameImage {
    /// Image filled with a single color
    pub fn new(width: u32, height: u32, color: Color) -> Self {
        let mut image = Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        };
        image.fill(color);
        image
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        Some(Color {
            r: self.data[idx],
            g: self.data[idx + 1],
            b: self.data[idx + 2],
            a: self.data[idx + 3],
        })
    }

    pub fn fill(&mut self, color: Color) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&[color.r, color.g, color.b, color.a]);
        }
    }

    /// Alpha-blend `color` over one pixel, scaled by `coverage`
    pub fn blend_pixel(&mut self, x: i32, y: i32, color: Color, coverage: f32) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let alpha = f32::from(color.a) / 255.0 * coverage.clamp(0.0, 1.0);
        if alpha < 0.01 {
            return;
        }

        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let blend = |src: u8, dst: u8| -> u8 {
            (f32::from(src) * alpha + f32::from(dst) * (1.0 - alpha)).clamp(0.0, 255.0) as u8
        };
        self.data[idx] = blend(color.r, self.data[idx]);
        self.data[idx + 1] = blend(color.g, self.data[idx + 1]);
        self.data[idx + 2] = blend(color.b, self.data[idx + 2]);
        self.data[idx + 3] = 255;
    }

    /// Filled circle with a one-pixel soft edge
    pub fn fill_disc(&mut self, cx: f32, cy: f32, radius: f32, color: Color) {
        let reach = radius + 1.0;
        let (x0, x1) = ((cx - reach).floor() as i32, (cx + reach).ceil() as i32);
        let (y0, y1) = ((cy - reach).floor() as i32, (cy + reach).ceil() as i32);

        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                let distance = (dx * dx + dy * dy).sqrt();
                let coverage = (radius + 0.5 - distance).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    self.blend_pixel(x, y, color, coverage);
                }
            }
        }
    }

    /// Polyline with round caps and joins, drawn by stamping discs along
    /// each segment
    pub fn stroke_polyline(&mut self, points: &[(f32, f32)], line_width: f32, color: Color) {
        let radius = (line_width / 2.0).max(0.5);
        let Some(&first) = points.first() else {
            return;
        };
        self.fill_disc(first.0, first.1, radius, color);

        // Stamps farther than this from the canvas cannot touch a pixel
        let reach = radius + 1.0;
        let bounds = (
            -reach,
            -reach,
            self.width as f32 + reach,
            self.height as f32 + reach,
        );

        for pair in points.windows(2) {
            let Some(((ax, ay), (bx, by))) = clip_segment(pair[0], pair[1], bounds) else {
                continue;
            };
            let length = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
            if !length.is_finite() {
                continue;
            }
            let stamps = (length / (radius * 0.5).max(0.5)).ceil().max(1.0) as u32;
            for i in 1..=stamps {
                let t = i as f32 / stamps as f32;
                self.fill_disc(ax + (bx - ax) * t, ay + (by - ay) * t, radius, color);
            }
        }
    }

    /// Filled rectangle with rounded corners
    pub fn fill_rounded_rect(
        &mut self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        radius: i32,
        color: Color,
    ) {
        for dy in 0..height {
            for dx in 0..width {
                if is_inside_rounded_rect(dx, dy, width, height, radius) {
                    self.blend_pixel(x + dx, y + dy, color, 1.0);
                }
            }
        }
    }

    /// Composite `image` scaled into the `width` x `height` box at (x, y)
    /// with nearest-neighbor sampling and alpha blending
    pub fn draw_image(&mut self, image: &FrameImage, x: i32, y: i32, width: u32, height: u32) {
        if image.width == 0 || image.height == 0 {
            return;
        }
        for dy in 0..height {
            for dx in 0..width {
                let src_x = (u64::from(dx) * u64::from(image.width) / u64::from(width.max(1))) as u32;
                let src_y =
                    (u64::from(dy) * u64::from(image.height) / u64::from(height.max(1))) as u32;
                if let Some(color) = image.pixel(src_x.min(image.width - 1), src_y.min(image.height - 1)) {
                    self.blend_pixel(x + dx as i32, y + dy as i32, color, 1.0);
                }
            }
        }
    }

    /// Load a PNG as RGBA
    pub fn load_png(path: &Path) -> Result<Self, ExportError> {
        let file = File::open(path)?;
        let mut decoder = png::Decoder::new(file);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder
            .read_info()
            .map_err(|e| ExportError::Decoding(format!("PNG decode error: {}", e)))?;

        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader
            .next_frame(&mut buf)
            .map_err(|e| ExportError::Decoding(format!("PNG frame error: {}", e)))?;
        let raw = &buf[..info.buffer_size()];

        let data = match info.color_type {
            png::ColorType::Rgba => raw.to_vec(),
            png::ColorType::Rgb => raw
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect(),
            png::ColorType::GrayscaleAlpha => raw
                .chunks_exact(2)
                .flat_map(|px| [px[0], px[0], px[0], px[1]])
                .collect(),
            png::ColorType::Grayscale => raw.iter().flat_map(|&v| [v, v, v, 255]).collect(),
            other => {
                return Err(ExportError::Decoding(format!(
                    "Unsupported PNG color type: {:?}",
                    other
                )));
            }
        };

        Ok(Self {
            width: info.width,
            height: info.height,
            data,
        })
    }

    /// Save as an RGBA PNG
    pub fn write_png(&self, path: &Path) -> Result<(), ExportError> {
        let file = File::create(path)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let mut writer = encoder
            .write_header()
            .map_err(|e| ExportError::Encoding(format!("PNG header error: {}", e)))?;
        writer
            .write_image_data(&self.data)
            .map_err(|e| ExportError::Encoding(format!("PNG write error: {}", e)))?;
        Ok(())
    }
}

/// Liang-Barsky clip of the segment `a -> b` to `(x_min, y_min, x_max, y_max)`.
/// Computed in f64 so far-away endpoints keep their direction.
fn clip_segment(
    a: (f32, f32),
    b: (f32, f32),
    (x_min, y_min, x_max, y_max): (f32, f32, f32, f32),
) -> Option<((f32, f32), (f32, f32))> {
    let (ax, ay) = (f64::from(a.0), f64::from(a.1));
    let (dx, dy) = (f64::from(b.0) - ax, f64::from(b.1) - ay);
    if !(ax.is_finite() && ay.is_finite() && dx.is_finite() && dy.is_finite()) {
        return None;
    }

    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [
        (-dx, ax - f64::from(x_min)),
        (dx, f64::from(x_max) - ax),
        (-dy, ay - f64::from(y_min)),
        (dy, f64::from(y_max) - ay),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }

    let at = |t: f64| ((ax + dx * t) as f32, (ay + dy * t) as f32);
    Some((at(t0), at(t1)))
}

/// Check if a point is inside a rounded rectangle
fn is_inside_rounded_rect(x: i32, y: i32, width: i32, height: i32, radius: i32) -> bool {
    let corner = |dx: i32, dy: i32| dx * dx + dy * dy <= radius * radius;

    if x < radius && y < radius {
        return corner(radius - x, radius - y);
    }
    if x >= width - radius && y < radius {
        return corner(x - (width - radius - 1), radius - y);
    }
    if x < radius && y >= height - radius {
        return corner(radius - x, y - (height - radius - 1));
    }
    if x >= width - radius && y >= height - radius {
        return corner(x - (width - radius - 1), y - (height - radius - 1));
    }
    true
}
