use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};

/// Largest panorama width kept in memory; wider inputs are
/// downsampled once at load.
pub const MAX_PANORAMA_WIDTH: u32 = 4096;

/// Immutable CPU-side equirectangular HDR panorama, RGBA f32.
#[derive(Debug)]
pub struct Environment {
    width: u32,
    height: u32,
    pixels: Vec<f32>,
}

impl Environment {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let start = Instant::now();

        let image = image::open(path)
            .with_context(|| format!("Failed to decode {}", path.display()))?;
        let rgba = image.to_rgba32f();
        let (width, height) = rgba.dimensions();

        let environment = Self::from_pixels(width, height, rgba.into_raw())?;
        log::info!(
            "Loaded environment {} ({}x{}) in {:.1} ms",
            path.display(),
            environment.width,
            environment.height,
            start.elapsed().as_secs_f64() * 1000.0,
        );
        Ok(environment)
    }

    /// Wraps raw RGBA float pixels, enforcing the 2:1 equirectangular
    /// aspect and the maximum panorama width.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("Panorama has zero size ({}x{})", width, height);
        }
        if width != height * 2 {
            bail!(
                "Panorama must be 2:1 equirectangular, got {}x{}",
                width,
                height
            );
        }
        if pixels.len() != (width * height * 4) as usize {
            bail!("Panorama pixel data does not match {}x{} RGBA", width, height);
        }

        let mut environment = Self {
            width,
            height,
            pixels,
        };
        if environment.width > MAX_PANORAMA_WIDTH {
            environment = environment.downsample(MAX_PANORAMA_WIDTH, MAX_PANORAMA_WIDTH / 2);
        }
        Ok(environment)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    fn downsample(&self, new_width: u32, new_height: u32) -> Self {
        log::info!(
            "Downsampling panorama {}x{} -> {}x{}",
            self.width,
            self.height,
            new_width,
            new_height
        );

        let scale_x = (self.width - 1) as f32 / (new_width - 1) as f32;
        let scale_y = (self.height - 1) as f32 / (new_height - 1) as f32;

        let mut pixels = Vec::with_capacity((new_width * new_height * 4) as usize);
        for y in 0..new_height {
            let src_y = y as f32 * scale_y;
            let y0 = src_y.floor() as u32;
            let y1 = (y0 + 1).min(self.height - 1);
            let fy = src_y - y0 as f32;

            for x in 0..new_width {
                let src_x = x as f32 * scale_x;
                let x0 = src_x.floor() as u32;
                let x1 = (x0 + 1).min(self.width - 1);
                let fx = src_x - x0 as f32;

                for channel in 0..4 {
                    let p00 = self.texel(x0, y0, channel);
                    let p10 = self.texel(x1, y0, channel);
                    let p01 = self.texel(x0, y1, channel);
                    let p11 = self.texel(x1, y1, channel);

                    let top = p00 + (p10 - p00) * fx;
                    let bottom = p01 + (p11 - p01) * fx;
                    pixels.push(top + (bottom - top) * fy);
                }
            }
        }

        Self {
            width: new_width,
            height: new_height,
            pixels,
        }
    }

    fn texel(&self, x: u32, y: u32, channel: usize) -> f32 {
        self.pixels[((y * self.width + x) * 4) as usize + channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gradient_panorama(width: u32, height: u32) -> Vec<f32> {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[x as f32, y as f32, 0.5, 1.0]);
            }
        }
        pixels
    }

    #[test]
    fn rejects_non_equirectangular_aspect() {
        let result = Environment::from_pixels(64, 64, gradient_panorama(64, 64));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("2:1 equirectangular"));
    }

    #[test]
    fn rejects_zero_size() {
        let result = Environment::from_pixels(0, 0, Vec::new());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("zero size"));
    }

    #[test]
    fn keeps_small_panoramas_untouched() {
        let env = Environment::from_pixels(128, 64, gradient_panorama(128, 64)).unwrap();
        assert_eq!(env.width(), 128);
        assert_eq!(env.height(), 64);
        assert_eq!(env.pixels().len(), 128 * 64 * 4);
    }

    #[test]
    fn downsample_preserves_corners_and_gradient() {
        let source = Environment {
            width: 16,
            height: 8,
            pixels: gradient_panorama(16, 8),
        };
        let half = source.downsample(8, 4);
        assert_eq!(half.width(), 8);
        assert_eq!(half.height(), 4);
        assert_eq!(half.pixels().len(), 8 * 4 * 4);

        // Corners of a bilinear resample land exactly on the source corners.
        let last = half.pixels().len() - 4;
        assert_relative_eq!(half.pixels()[0], 0.0);
        assert_relative_eq!(half.pixels()[last], 15.0, epsilon = 0.001);
        assert_relative_eq!(half.pixels()[last + 1], 7.0, epsilon = 0.001);

        // The x gradient shrinks by the resampling scale exactly.
        let scale = 15.0 / 7.0;
        for x in 0..8u32 {
            assert_relative_eq!(
                half.pixels()[(x * 4) as usize],
                x as f32 * scale,
                epsilon = 0.001
            );
        }
    }
}
