//! Output container descriptor and the per-format decision table.

use crate::codec::RasterSource;
use crate::error::Result;
use crate::model::{Crs, DataType, GeoTransform, RasterMetadata, Window};
use crate::options::{AssetType, ExportFormat};
use crate::rescale::Rescale;
use crate::stats::StatisticsProvider;

const JPEG_QUALITY: u8 = 90;
const PERCENTILE_MIN: f64 = 2.0;
const PERCENTILE_MAX: f64 = 98.0;
const HISTOGRAM_BINS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    GTiff,
    Jpeg,
    Png,
}

impl Driver {
    /// GDAL short name of the driver.
    pub fn name(&self) -> &'static str {
        match self {
            Driver::GTiff => "GTiff",
            Driver::Jpeg => "JPEG",
            Driver::Png => "PNG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Deflate,
    Jpeg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputProfile {
    pub driver: Driver,
    pub band_count: usize,
    pub data_type: DataType,
    pub compression: Option<Compression>,
    pub predictor: Option<u8>,
    pub quality: Option<u8>,
    pub bigtiff_if_safer: bool,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Option<Crs>,
    pub nodata: Option<f64>,
    /// Keep transparency as an alpha band instead of filling a background.
    pub with_alpha: bool,
    /// Byte-scaled display output (as opposed to numeric values).
    pub visual: bool,
}

impl OutputProfile {
    /// Driver creation options in GDAL `KEY=VALUE` form.
    pub fn creation_options(&self) -> Vec<String> {
        let mut options = Vec::new();
        match self.compression {
            Some(Compression::Deflate) => options.push("COMPRESS=DEFLATE".to_string()),
            Some(Compression::Jpeg) => options.push("COMPRESS=JPEG".to_string()),
            None => {}
        }
        if let Some(predictor) = self.predictor {
            options.push(format!("PREDICTOR={predictor}"));
        }
        if let Some(quality) = self.quality {
            match self.driver {
                Driver::Jpeg => options.push(format!("QUALITY={quality}")),
                _ => options.push(format!("JPEG_QUALITY={quality}")),
            }
        }
        if self.bigtiff_if_safer {
            options.push("BIGTIFF=IF_SAFER".to_string());
        }
        options
    }
}

/// Builds an [`OutputProfile`] incrementally; later stages refine the band
/// layout and grid before [`ProfileBuilder::freeze`] hands out the final value.
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    profile: OutputProfile,
}

impl ProfileBuilder {
    pub fn new(
        source: &RasterMetadata,
        window: &Window,
        transform: GeoTransform,
        format: ExportFormat,
    ) -> Self {
        let mut profile = OutputProfile {
            driver: Driver::GTiff,
            band_count: source.band_count(),
            data_type: source.data_type,
            compression: None,
            predictor: None,
            quality: None,
            bigtiff_if_safer: false,
            width: window.width,
            height: window.height,
            transform,
            crs: source.crs.clone(),
            nodata: source.nodata,
            with_alpha: true,
            visual: false,
        };

        match format {
            ExportFormat::Jpg => {
                profile.driver = Driver::Jpeg;
                profile.band_count = 3;
                profile.with_alpha = false;
                profile.quality = Some(JPEG_QUALITY);
                profile.visual = true;
            }
            ExportFormat::Png => {
                profile.driver = Driver::Png;
                profile.band_count = 4;
                profile.visual = true;
            }
            ExportFormat::GtiffRgb | ExportFormat::Kmz => {
                profile.compression = Some(Compression::Jpeg);
                profile.predictor = Some(1);
                profile.quality = Some(JPEG_QUALITY);
                profile.bigtiff_if_safer = true;
                profile.band_count = 4;
                profile.visual = true;
            }
            ExportFormat::Gtiff => {
                profile.compression = Some(Compression::Deflate);
                profile.predictor = Some(2);
                profile.bigtiff_if_safer = true;
            }
        }

        if profile.visual {
            profile.data_type = DataType::Byte;
        }

        Self { profile }
    }

    pub fn profile(&self) -> &OutputProfile {
        &self.profile
    }

    pub fn set_band_count(&mut self, band_count: usize) -> &mut Self {
        self.profile.band_count = band_count;
        self
    }

    pub fn set_data_type(&mut self, data_type: DataType) -> &mut Self {
        self.profile.data_type = data_type;
        self
    }

    pub fn set_nodata(&mut self, nodata: Option<f64>) -> &mut Self {
        self.profile.nodata = nodata;
        self
    }

    pub fn set_grid(
        &mut self,
        crs: Crs,
        transform: GeoTransform,
        width: usize,
        height: usize,
    ) -> &mut Self {
        self.profile.crs = Some(crs);
        self.profile.transform = transform;
        self.profile.width = width;
        self.profile.height = height;
        self
    }

    /// Visual renderings of elevation carry no numeric nodata.
    pub fn clear_elevation_nodata(&mut self, asset_type: AssetType) -> &mut Self {
        if asset_type.is_elevation() && self.profile.visual && self.profile.nodata.is_some() {
            self.profile.nodata = None;
        }
        self
    }

    /// Rescale range for this export: the requested one, or for visual output a
    /// 2nd-98th percentile range of band 1 over the window.
    pub fn rescale_range(
        &self,
        requested: Option<[f64; 2]>,
        asset_type: AssetType,
        stats: &dyn StatisticsProvider,
        reader: &dyn RasterSource,
        window: &Window,
    ) -> Result<Option<Rescale>> {
        if let Some([lo, hi]) = requested {
            return Ok(Some(Rescale::new(lo, hi)));
        }
        if !self.profile.visual {
            return Ok(None);
        }

        let nodata = if asset_type.is_photographic() {
            Some(0.0)
        } else {
            None
        };
        let (lo, hi) = stats.percentile_range(
            reader,
            window,
            1,
            PERCENTILE_MIN,
            PERCENTILE_MAX,
            nodata,
            HISTOGRAM_BINS,
        )?;
        tracing::debug!("Computed rescale range from statistics: [{}, {}]", lo, hi);
        Ok(Some(Rescale::new(lo, hi)))
    }

    pub fn freeze(self) -> OutputProfile {
        self.profile
    }
}
