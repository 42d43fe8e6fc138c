//! Named color ramps and their application to single-band data.

use std::path::{Path, PathBuf};

use crate::error::{ExportError, Result};
use crate::model::BandArray;

const LUT_SIZE: usize = 256;

/// 256-entry RGBA lookup table indexed by byte-quantized values.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorMap {
    name: String,
    entries: Vec<[u8; 4]>,
}

type Stop = (f64, [u8; 3]);

impl ColorMap {
    pub fn from_entries(name: impl Into<String>, mut entries: Vec<[u8; 4]>) -> Self {
        entries.resize(LUT_SIZE, [0, 0, 0, 0]);
        Self {
            name: name.into(),
            entries,
        }
    }

    /// Linear ramp through `stops`, given as ascending positions in 0..1.
    fn from_stops(name: &str, stops: &[Stop]) -> Self {
        let entries = (0..LUT_SIZE)
            .map(|i| {
                let t = i as f64 / (LUT_SIZE - 1) as f64;
                let [r, g, b] = interpolate_stops(stops, t);
                [r, g, b, 255]
            })
            .collect();
        Self {
            name: name.to_string(),
            entries,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reversed(mut self) -> Self {
        self.entries.reverse();
        self.name.push_str("_r");
        self
    }

    pub fn entry(&self, value: f64) -> [u8; 4] {
        let index = if value.is_nan() {
            0
        } else {
            value.clamp(0.0, (LUT_SIZE - 1) as f64) as usize
        };
        self.entries[index]
    }

    /// Maps each sample of `band` to its red, green and blue channel values.
    pub fn apply(&self, band: &BandArray) -> [BandArray; 3] {
        let mut red = Vec::with_capacity(band.len());
        let mut green = Vec::with_capacity(band.len());
        let mut blue = Vec::with_capacity(band.len());
        for v in &band.values {
            let [r, g, b, _] = self.entry(*v);
            red.push(r as f64);
            green.push(g as f64);
            blue.push(b as f64);
        }
        [
            BandArray::new(band.rows, band.cols, red),
            BandArray::new(band.rows, band.cols, green),
            BandArray::new(band.rows, band.cols, blue),
        ]
    }
}

fn interpolate_stops(stops: &[Stop], t: f64) -> [u8; 3] {
    let (first, last) = (stops[0], stops[stops.len() - 1]);
    if t <= first.0 {
        return first.1;
    }
    if t >= last.0 {
        return last.1;
    }

    let upper = stops.iter().position(|(pos, _)| *pos >= t).unwrap_or(stops.len() - 1);
    let (p0, c0) = stops[upper - 1];
    let (p1, c1) = stops[upper];
    let f = if p1 > p0 { (t - p0) / (p1 - p0) } else { 0.0 };

    let mut out = [0u8; 3];
    for (o, (a, b)) in out.iter_mut().zip(c0.iter().zip(c1.iter())) {
        *o = (*a as f64 + (*b as f64 - *a as f64) * f).round() as u8;
    }
    out
}

fn evenly_spaced(colors: &[[u8; 3]]) -> Vec<Stop> {
    let n = (colors.len() - 1) as f64;
    colors
        .iter()
        .enumerate()
        .map(|(i, c)| (i as f64 / n, *c))
        .collect()
}

/// Resolves color ramp names.
pub trait ColorRampSource {
    /// `Ok(None)` when the name is unknown; `Err` only for failures to load
    /// a ramp that does exist.
    fn resolve(&self, name: &str) -> Result<Option<ColorMap>>;
}

/// Ramps compiled into the crate. Appending `_r` to a name reverses it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRamps;

impl BuiltinRamps {
    pub const NAMES: [&'static str; 10] = [
        "gray", "greys", "viridis", "magma", "plasma", "inferno", "terrain", "jet", "rdylgn",
        "spectral",
    ];

    fn stops(name: &str) -> Option<Vec<Stop>> {
        let stops = match name {
            "gray" => evenly_spaced(&[[0, 0, 0], [255, 255, 255]]),
            "greys" => evenly_spaced(&[[255, 255, 255], [0, 0, 0]]),
            "viridis" => evenly_spaced(&[
                [68, 1, 84],
                [71, 45, 123],
                [59, 82, 139],
                [44, 114, 142],
                [33, 145, 140],
                [40, 174, 128],
                [94, 201, 98],
                [173, 220, 48],
                [253, 231, 37],
            ]),
            "magma" => evenly_spaced(&[
                [0, 0, 4],
                [59, 15, 112],
                [140, 41, 129],
                [222, 73, 104],
                [254, 159, 109],
                [252, 253, 191],
            ]),
            "plasma" => evenly_spaced(&[
                [13, 8, 135],
                [126, 3, 168],
                [204, 71, 120],
                [248, 149, 64],
                [240, 249, 33],
            ]),
            "inferno" => evenly_spaced(&[
                [0, 0, 4],
                [66, 10, 104],
                [147, 38, 103],
                [221, 81, 58],
                [252, 165, 10],
                [252, 255, 164],
            ]),
            "terrain" => vec![
                (0.0, [51, 51, 153]),
                (0.15, [0, 153, 255]),
                (0.25, [0, 204, 102]),
                (0.5, [255, 255, 153]),
                (0.75, [128, 92, 84]),
                (1.0, [255, 255, 255]),
            ],
            "jet" => vec![
                (0.0, [0, 0, 128]),
                (0.125, [0, 0, 255]),
                (0.375, [0, 255, 255]),
                (0.625, [255, 255, 0]),
                (0.875, [255, 0, 0]),
                (1.0, [128, 0, 0]),
            ],
            "rdylgn" => evenly_spaced(&[
                [165, 0, 38],
                [215, 48, 39],
                [244, 109, 67],
                [253, 174, 97],
                [254, 224, 139],
                [255, 255, 191],
                [217, 239, 139],
                [166, 217, 106],
                [102, 189, 99],
                [26, 152, 80],
                [0, 104, 55],
            ]),
            "spectral" => evenly_spaced(&[
                [158, 1, 66],
                [213, 62, 79],
                [244, 109, 67],
                [253, 174, 97],
                [254, 224, 139],
                [255, 255, 191],
                [230, 245, 152],
                [171, 221, 164],
                [102, 194, 165],
                [50, 136, 189],
                [94, 79, 162],
            ]),
            _ => return None,
        };
        Some(stops)
    }
}

impl ColorRampSource for BuiltinRamps {
    fn resolve(&self, name: &str) -> Result<Option<ColorMap>> {
        let name = name.to_ascii_lowercase();
        if let Some(stops) = Self::stops(&name) {
            return Ok(Some(ColorMap::from_stops(&name, &stops)));
        }
        if let Some(base) = name.strip_suffix("_r") {
            if let Some(stops) = Self::stops(base) {
                return Ok(Some(ColorMap::from_stops(base, &stops).reversed()));
            }
        }
        Ok(None)
    }
}

/// Loads `<dir>/<name>.json` (an array of up to 256 `[r, g, b, a]` entries),
/// falling back to [`BuiltinRamps`] when no such file exists.
#[derive(Debug, Clone)]
pub struct RampDirectory {
    dir: PathBuf,
}

impl RampDirectory {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl ColorRampSource for RampDirectory {
    fn resolve(&self, name: &str) -> Result<Option<ColorMap>> {
        let is_plain_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !is_plain_name {
            return Ok(None);
        }

        let path = self.dir.join(format!("{name}.json"));
        if !path.is_file() {
            return BuiltinRamps.resolve(name);
        }

        let load_error = |message: String| ExportError::Colormap {
            name: name.to_string(),
            message,
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| load_error(format!("{}: {}", path.display(), e)))?;
        let entries: Vec<[u8; 4]> =
            serde_json::from_str(&text).map_err(|e| load_error(e.to_string()))?;
        if entries.is_empty() || entries.len() > LUT_SIZE {
            return Err(load_error(format!(
                "expected 1 to {} entries, found {}",
                LUT_SIZE,
                entries.len()
            )));
        }
        Ok(Some(ColorMap::from_entries(name, entries)))
    }
}

/// Resolves an optional colormap name. An unknown name is not an error: it is
/// logged and the export continues without a colormap.
pub fn resolve_or_warn(
    source: &dyn ColorRampSource,
    name: Option<&str>,
) -> Result<Option<ColorMap>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let cmap = source.resolve(name)?;
    if cmap.is_none() {
        tracing::warn!("Invalid colormap {}", name);
    }
    Ok(cmap)
}
