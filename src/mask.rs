//! Per-pixel validity for the export window.

use crate::codec::RasterSource;
use crate::error::Result;
use crate::model::{BandArray, Window};

/// Validity flags over the window: 0 is invalid, anything else valid.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask(BandArray);

impl Mask {
    /// Reads the alpha band when the source has one, the dataset mask otherwise.
    pub fn read(reader: &dyn RasterSource, window: &Window) -> Result<Self> {
        let band = match reader.metadata().alpha_band() {
            Some(alpha) => {
                tracing::debug!("Using band {} as mask", alpha);
                reader.read_band(alpha, window)?
            }
            None => reader.read_dataset_mask(window)?,
        };
        Ok(Mask(band))
    }

    pub fn from_band(band: BandArray) -> Self {
        Mask(band)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.0.shape()
    }

    pub fn is_valid(&self, index: usize) -> bool {
        self.0.values[index] != 0.0
    }

    /// Overwrites every invalid pixel of `band` with `value`.
    pub fn fill_invalid(&self, band: &mut BandArray, value: f64) {
        assert_eq!(band.shape(), self.shape(), "band does not match mask shape");
        for (v, m) in band.values.iter_mut().zip(&self.0.values) {
            if *m == 0.0 {
                *v = value;
            }
        }
    }

    pub fn as_band(&self) -> &BandArray {
        &self.0
    }
}
