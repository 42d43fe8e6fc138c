//! Shaded relief and its compositing onto colormapped elevation.

use palette::{Hsv, IntoColor, Srgb};

use crate::model::{BandArray, GeoTransform};
use crate::rescale::DISPLAY_MAX;

/// Extra zoom levels a visual export is expected to be viewed at.
pub const ZOOM_EXTRA_LEVELS: f64 = 3.0;

const FLAT_RANGE: f64 = 1e-6;

/// Directional light over a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSource {
    pub azimuth_deg: f64,
    pub altitude_deg: f64,
}

impl Default for LightSource {
    fn default() -> Self {
        Self {
            azimuth_deg: 315.0,
            altitude_deg: 45.0,
        }
    }
}

impl LightSource {
    /// Unit vector pointing toward the light, azimuth measured clockwise from north.
    pub fn direction(&self) -> [f64; 3] {
        let az = (90.0 - self.azimuth_deg).to_radians();
        let alt = self.altitude_deg.to_radians();
        [az.cos() * alt.cos(), az.sin() * alt.cos(), alt.sin()]
    }

    /// Illumination in 0..1 for each cell of `elevation`.
    ///
    /// `dx` and `dy` are the cell sizes along columns and rows; a negative `dy`
    /// (north-up rasters) is expected, the first row being the northern edge.
    pub fn hillshade(&self, elevation: &BandArray, dx: f64, dy: f64, vert_exag: f64) -> BandArray {
        let (rows, cols) = elevation.shape();
        let scaled = elevation.map(|v| v * vert_exag);
        let [lx, ly, lz] = self.direction();

        let mut intensity = Vec::with_capacity(scaled.len());
        for row in 0..rows {
            for col in 0..cols {
                let e_dy = gradient(&scaled, row, col, Axis::Row, -dy);
                let e_dx = gradient(&scaled, row, col, Axis::Col, dx);
                let norm = (e_dx * e_dx + e_dy * e_dy + 1.0).sqrt();
                intensity.push((-e_dx * lx - e_dy * ly + lz) / norm);
            }
        }

        let (imin, imax) = intensity
            .iter()
            .filter(|v| !v.is_nan())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        let stretch = imax - imin > FLAT_RANGE;

        for v in intensity.iter_mut() {
            if v.is_nan() {
                *v = 0.0;
                continue;
            }
            if stretch {
                *v = (*v - imin) / (imax - imin);
            }
            *v = v.clamp(0.0, 1.0);
        }
        BandArray::new(rows, cols, intensity)
    }
}

#[derive(Clone, Copy)]
enum Axis {
    Row,
    Col,
}

/// Central difference in the interior, one-sided at the edges, 0 along an
/// axis with a single sample.
fn gradient(band: &BandArray, row: usize, col: usize, axis: Axis, spacing: f64) -> f64 {
    let (len, pos) = match axis {
        Axis::Row => (band.rows, row),
        Axis::Col => (band.cols, col),
    };
    if len < 2 || spacing == 0.0 {
        return 0.0;
    }
    let at = |p: usize| match axis {
        Axis::Row => band.get(p, col),
        Axis::Col => band.get(row, p),
    };

    if pos == 0 {
        (at(1) - at(0)) / spacing
    } else if pos == len - 1 {
        (at(pos) - at(pos - 1)) / spacing
    } else {
        (at(pos + 1) - at(pos - 1)) / (2.0 * spacing)
    }
}

/// Shaded relief for an elevation window in display units (0..255).
pub fn shade(elevation: &BandArray, transform: &GeoTransform, exaggeration: f64) -> BandArray {
    let delta_scale = ZOOM_EXTRA_LEVELS * ZOOM_EXTRA_LEVELS;
    let dx = transform.pixel_width * delta_scale;
    let dy = transform.pixel_height * delta_scale;
    tracing::debug!("Hillshading with dx={} dy={} exaggeration={}", dx, dy, exaggeration);

    LightSource::default()
        .hillshade(elevation, dx, dy, exaggeration)
        .map(|v| v * DISPLAY_MAX)
}

/// Replaces the HSV value of each colored pixel with the shaded intensity.
pub fn hsv_blend(rgb: [BandArray; 3], intensity: &BandArray) -> [BandArray; 3] {
    let [mut red, mut green, mut blue] = rgb;
    assert_eq!(red.shape(), intensity.shape(), "intensity does not match color shape");

    for i in 0..intensity.len() {
        let color = Srgb::new(
            (red.values[i] / DISPLAY_MAX) as f32,
            (green.values[i] / DISPLAY_MAX) as f32,
            (blue.values[i] / DISPLAY_MAX) as f32,
        );
        let mut hsv: Hsv = color.into_color();
        hsv.value = (intensity.values[i] / DISPLAY_MAX).clamp(0.0, 1.0) as f32;

        let shaded: Srgb<f32> = hsv.into_color();
        red.values[i] = shaded.red as f64 * DISPLAY_MAX;
        green.values[i] = shaded.green as f64 * DISPLAY_MAX;
        blue.values[i] = shaded.blue as f64 * DISPLAY_MAX;
    }
    [red, green, blue]
}
