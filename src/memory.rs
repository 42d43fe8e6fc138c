//! In-memory raster codec.
//!
//! [`MemRaster`] is a fully decoded raster that can serve as an export source,
//! and [`MemoryCodec`] collects export outputs keyed by path so they can be
//! inspected without touching the file system.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::codec::{check_band_index, check_window, nodata_mask, RasterCodec, RasterSink, RasterSource};
use crate::error::{ExportError, Result};
use crate::model::{BandArray, ColorInterp, RasterMetadata, Window};
use crate::profile::OutputProfile;

#[derive(Debug, Clone, PartialEq)]
pub struct MemRaster {
    metadata: RasterMetadata,
    bands: Vec<Vec<f64>>,
}

impl MemRaster {
    /// Builds a raster from full-size row-major bands, one per color interpretation.
    pub fn new(metadata: RasterMetadata, bands: Vec<Vec<f64>>) -> Result<Self> {
        if bands.len() != metadata.band_count() {
            return Err(ExportError::Read(format!(
                "{} bands supplied for {} color interpretations",
                bands.len(),
                metadata.band_count()
            )));
        }
        let pixels = metadata.width * metadata.height;
        if let Some(bad) = bands.iter().position(|b| b.len() != pixels) {
            return Err(ExportError::Read(format!(
                "band {} has {} values, expected {}",
                bad + 1,
                bands[bad].len(),
                pixels
            )));
        }
        Ok(Self { metadata, bands })
    }

    /// Whole band as stored (1-based index).
    pub fn band(&self, band: usize) -> Option<&[f64]> {
        band.checked_sub(1)
            .and_then(|idx| self.bands.get(idx))
            .map(|b| b.as_slice())
    }
}

impl RasterSource for MemRaster {
    fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    fn read_band(&self, band: usize, window: &Window) -> Result<BandArray> {
        check_band_index(&self.metadata, band)?;
        check_window(&self.metadata, window)?;

        let data = &self.bands[band - 1];
        let mut values = Vec::with_capacity(window.pixel_count());
        for row in window.row_off..window.row_off + window.height {
            let start = row * self.metadata.width + window.col_off;
            values.extend_from_slice(&data[start..start + window.width]);
        }
        Ok(BandArray::new(window.height, window.width, values))
    }

    fn read_dataset_mask(&self, window: &Window) -> Result<BandArray> {
        check_window(&self.metadata, window)?;
        nodata_mask(self, window)
    }
}

/// Codec that keeps every closed output in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCodec {
    outputs: Arc<Mutex<HashMap<PathBuf, MemRaster>>>,
}

impl MemoryCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raster closed at `path`, if any.
    pub fn output(&self, path: &Path) -> Option<MemRaster> {
        self.outputs
            .lock()
            .ok()
            .and_then(|outputs| outputs.get(path).cloned())
    }

    pub fn output_count(&self) -> usize {
        self.outputs.lock().map(|outputs| outputs.len()).unwrap_or(0)
    }
}

impl RasterCodec for MemoryCodec {
    fn create(&self, path: &Path, profile: &OutputProfile) -> Result<Box<dyn RasterSink>> {
        Ok(Box::new(MemSink {
            path: path.to_path_buf(),
            profile: profile.clone(),
            bands: vec![None; profile.band_count],
            color_interp: vec![ColorInterp::Undefined; profile.band_count],
            outputs: Arc::clone(&self.outputs),
        }))
    }
}

struct MemSink {
    path: PathBuf,
    profile: OutputProfile,
    bands: Vec<Option<Vec<f64>>>,
    color_interp: Vec<ColorInterp>,
    outputs: Arc<Mutex<HashMap<PathBuf, MemRaster>>>,
}

impl RasterSink for MemSink {
    fn write_band(&mut self, band: usize, data: &BandArray) -> Result<()> {
        if band == 0 || band > self.bands.len() {
            return Err(ExportError::Write(format!(
                "band {} out of range for {} output bands",
                band,
                self.bands.len()
            )));
        }
        if data.shape() != (self.profile.height, self.profile.width) {
            return Err(ExportError::Write(format!(
                "band {} has shape {:?}, destination is {}x{}",
                band,
                data.shape(),
                self.profile.height,
                self.profile.width
            )));
        }
        let data_type = self.profile.data_type;
        self.bands[band - 1] = Some(data.values.iter().map(|v| data_type.cast(*v)).collect());
        Ok(())
    }

    fn set_color_interp(&mut self, interp: &[ColorInterp]) -> Result<()> {
        if interp.len() != self.color_interp.len() {
            return Err(ExportError::Write(format!(
                "{} color interpretations for {} bands",
                interp.len(),
                self.color_interp.len()
            )));
        }
        self.color_interp = interp.to_vec();
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let MemSink {
            path,
            profile,
            bands,
            color_interp,
            outputs,
        } = *self;

        let pixels = profile.width * profile.height;
        let bands = bands
            .into_iter()
            .map(|band| band.unwrap_or_else(|| vec![0.0; pixels]))
            .collect();
        let metadata = RasterMetadata {
            width: profile.width,
            height: profile.height,
            color_interp,
            crs: profile.crs.clone(),
            transform: profile.transform,
            nodata: profile.nodata,
            data_type: profile.data_type,
        };
        let raster = MemRaster::new(metadata, bands)?;

        outputs
            .lock()
            .map_err(|_| ExportError::Write("memory codec lock poisoned".to_string()))?
            .insert(path, raster);
        Ok(())
    }
}
