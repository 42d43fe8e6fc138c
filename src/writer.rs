//! Sequential band output through the selected write strategy.

use std::path::Path;

use crate::codec::{RasterCodec, RasterSink};
use crate::error::Result;
use crate::model::{BandArray, ColorInterp};
use crate::profile::OutputProfile;
use crate::reproject::Reprojector;

/// How window-shaped arrays reach the destination.
#[derive(Debug)]
pub enum BandWriteStrategy {
    /// Arrays already match the destination grid.
    Direct,
    /// Arrays are resampled into the destination grid first.
    Reprojected(Reprojector),
}

impl BandWriteStrategy {
    fn prepare(&self, data: &BandArray, fill: f64) -> Option<BandArray> {
        match self {
            BandWriteStrategy::Direct => None,
            BandWriteStrategy::Reprojected(reprojector) => Some(reprojector.reproject(data, fill)),
        }
    }

    /// Shape, as (rows, cols), of the arrays this strategy accepts.
    fn input_shape(&self, profile: &OutputProfile) -> (usize, usize) {
        match self {
            BandWriteStrategy::Direct => (profile.height, profile.width),
            BandWriteStrategy::Reprojected(reprojector) => reprojector.source_shape(),
        }
    }
}

/// Writes the bands of one output in order and finalizes it.
///
/// The number and shape of the arrays written must agree with the frozen
/// profile; a mismatch is a bug in the caller and panics.
pub struct BandWriter {
    sink: Box<dyn RasterSink>,
    strategy: BandWriteStrategy,
    profile: OutputProfile,
    written: usize,
}

impl BandWriter {
    pub fn create(
        codec: &dyn RasterCodec,
        path: &Path,
        profile: OutputProfile,
        strategy: BandWriteStrategy,
    ) -> Result<Self> {
        tracing::info!(
            "Creating {} output {} ({} bands, {}, {}x{})",
            profile.driver.name(),
            path.display(),
            profile.band_count,
            profile.data_type.name(),
            profile.width,
            profile.height
        );
        let sink = codec.create(path, &profile)?;
        Ok(Self {
            sink,
            strategy,
            profile,
            written: 0,
        })
    }

    pub fn profile(&self) -> &OutputProfile {
        &self.profile
    }

    /// Writes `data` as the next band.
    pub fn write(&mut self, data: &BandArray) -> Result<()> {
        let band = self.written + 1;
        assert!(
            band <= self.profile.band_count,
            "band {} written to a {}-band output",
            band,
            self.profile.band_count
        );
        assert_eq!(
            data.shape(),
            self.strategy.input_shape(&self.profile),
            "band {band} does not match the output grid"
        );

        let fill = self.profile.nodata.unwrap_or(0.0);
        match self.strategy.prepare(data, fill) {
            Some(resampled) => self.sink.write_band(band, &resampled)?,
            None => self.sink.write_band(band, data)?,
        }
        tracing::debug!("Wrote band {}", band);
        self.written = band;
        Ok(())
    }

    /// Tags the bands and closes the destination.
    pub fn finish(mut self, color_interp: &[ColorInterp]) -> Result<OutputProfile> {
        assert_eq!(
            self.written, self.profile.band_count,
            "output declared {} bands but {} were written",
            self.profile.band_count, self.written
        );
        assert_eq!(color_interp.len(), self.written);

        self.sink.set_color_interp(color_interp)?;
        self.sink.close()?;
        Ok(self.profile)
    }
}
