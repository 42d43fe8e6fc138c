//! Percentile statistics used to derive a display range.

use crate::codec::RasterSource;
use crate::error::Result;
use crate::model::Window;

pub trait StatisticsProvider {
    /// Returns the `(pmin, pmax)` percentile values of `band` over the window,
    /// ignoring masked pixels and `nodata`.
    ///
    /// `bins` is the histogram resolution for providers that approximate
    /// percentiles from a histogram; exact providers may ignore it.
    #[allow(clippy::too_many_arguments)]
    fn percentile_range(
        &self,
        reader: &dyn RasterSource,
        window: &Window,
        band: usize,
        pmin: f64,
        pmax: f64,
        nodata: Option<f64>,
        bins: usize,
    ) -> Result<(f64, f64)>;
}

/// Exact percentiles over all valid samples (linear interpolation between
/// closest ranks). Sorts the samples instead of binning them, so `bins` has no
/// effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PercentileStatistics;

impl StatisticsProvider for PercentileStatistics {
    fn percentile_range(
        &self,
        reader: &dyn RasterSource,
        window: &Window,
        band: usize,
        pmin: f64,
        pmax: f64,
        nodata: Option<f64>,
        _bins: usize,
    ) -> Result<(f64, f64)> {
        let data = reader.read_band(band, window)?;
        let mask = reader.read_dataset_mask(window)?;
        let source_nodata = reader.metadata().nodata;

        let mut samples: Vec<f64> = data
            .values
            .iter()
            .zip(&mask.values)
            .filter(|(v, m)| {
                **m != 0.0
                    && v.is_finite()
                    && nodata.map_or(true, |nd| **v != nd)
                    && source_nodata.map_or(true, |nd| **v != nd)
            })
            .map(|(v, _)| *v)
            .collect();

        if samples.is_empty() {
            tracing::warn!("No valid samples in band {} for statistics", band);
            return Ok((0.0, 255.0));
        }

        samples.sort_by(|a, b| a.total_cmp(b));
        Ok((percentile(&samples, pmin), percentile(&samples, pmax)))
    }
}

/// Percentile `p` (0-100) of sorted, non-empty samples.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
