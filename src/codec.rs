//! Boundary of the raster codec: reading windowed bands and writing outputs.

use std::path::Path;

use crate::error::{ExportError, Result};
use crate::model::{BandArray, ColorInterp, RasterMetadata, Window};
use crate::profile::OutputProfile;

/// Mask value for a valid pixel, matching GDAL's 8-bit mask bands.
pub const MASK_VALID: f64 = 255.0;

/// Read side of the codec. Band indexes are 1-based.
pub trait RasterSource {
    fn metadata(&self) -> &RasterMetadata;

    fn read_band(&self, band: usize, window: &Window) -> Result<BandArray>;

    /// Validity of each pixel over the window (0 = invalid, 255 = valid).
    fn read_dataset_mask(&self, window: &Window) -> Result<BandArray>;
}

/// Write side of one output raster.
pub trait RasterSink {
    fn write_band(&mut self, band: usize, data: &BandArray) -> Result<()>;

    fn set_color_interp(&mut self, interp: &[ColorInterp]) -> Result<()>;

    /// Flushes and releases the destination.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Creates destinations for a frozen [`OutputProfile`].
pub trait RasterCodec {
    fn create(&self, path: &Path, profile: &OutputProfile) -> Result<Box<dyn RasterSink>>;
}

pub(crate) fn check_band_index(metadata: &RasterMetadata, band: usize) -> Result<()> {
    if band == 0 || band > metadata.band_count() {
        return Err(ExportError::Read(format!(
            "band {} out of range (raster has {} bands)",
            band,
            metadata.band_count()
        )));
    }
    Ok(())
}

pub(crate) fn check_window(metadata: &RasterMetadata, window: &Window) -> Result<()> {
    if !window.fits_in(metadata.width, metadata.height) {
        return Err(ExportError::Read(format!(
            "window {:?} exceeds raster size {}x{}",
            window, metadata.width, metadata.height
        )));
    }
    Ok(())
}

/// Dataset mask derived from nodata: a pixel is valid when any non-alpha band
/// holds a value other than nodata (NaN counts as nodata).
pub fn nodata_mask(source: &dyn RasterSource, window: &Window) -> Result<BandArray> {
    let metadata = source.metadata();
    let mut mask = BandArray::filled(window.height, window.width, 0.0);
    let mut any_band = false;

    for band in metadata.indexes() {
        if metadata.color_interp[band - 1] == ColorInterp::Alpha {
            continue;
        }
        any_band = true;
        let data = source.read_band(band, window)?;
        for (m, v) in mask.values.iter_mut().zip(&data.values) {
            let valid = !v.is_nan() && metadata.nodata.map_or(true, |nd| *v != nd);
            if valid {
                *m = MASK_VALID;
            }
        }
    }

    if !any_band {
        mask.values.fill(MASK_VALID);
    }
    Ok(mask)
}
