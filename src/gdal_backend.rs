//! GDAL-backed raster codec for real files.

use std::path::{Path, PathBuf};

use gdal::cpl::CslStringList;
use gdal::errors::GdalError;
use gdal::raster::{Buffer, ColorInterpretation, GdalDataType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};

use crate::codec::{check_band_index, check_window, nodata_mask, RasterCodec, RasterSink, RasterSource};
use crate::error::{ExportError, Result};
use crate::model::{BandArray, ColorInterp, Crs, DataType, GeoTransform, RasterMetadata, Window};
use crate::options::ExportOptions;
use crate::pipeline::{ExportOutcome, Exporter};
use crate::profile::OutputProfile;

fn read_error(call: &'static str) -> impl Fn(GdalError) -> ExportError {
    move |e| ExportError::Read(format!("{call}: {e}"))
}

fn write_error(call: &'static str) -> impl Fn(GdalError) -> ExportError {
    move |e| ExportError::Write(format!("{call}: {e}"))
}

fn color_interp_from_gdal(ci: ColorInterpretation) -> ColorInterp {
    match ci {
        ColorInterpretation::GrayIndex => ColorInterp::Gray,
        ColorInterpretation::RedBand => ColorInterp::Red,
        ColorInterpretation::GreenBand => ColorInterp::Green,
        ColorInterpretation::BlueBand => ColorInterp::Blue,
        ColorInterpretation::AlphaBand => ColorInterp::Alpha,
        _ => ColorInterp::Undefined,
    }
}

fn color_interp_to_gdal(ci: ColorInterp) -> ColorInterpretation {
    match ci {
        ColorInterp::Gray => ColorInterpretation::GrayIndex,
        ColorInterp::Red => ColorInterpretation::RedBand,
        ColorInterp::Green => ColorInterpretation::GreenBand,
        ColorInterp::Blue => ColorInterpretation::BlueBand,
        ColorInterp::Alpha => ColorInterpretation::AlphaBand,
        ColorInterp::Undefined => ColorInterpretation::Undefined,
    }
}

fn data_type_from_gdal(data_type: GdalDataType) -> DataType {
    match data_type {
        GdalDataType::UInt8 => DataType::Byte,
        GdalDataType::UInt16 => DataType::UInt16,
        GdalDataType::Int16 => DataType::Int16,
        GdalDataType::UInt32 => DataType::UInt32,
        GdalDataType::Int32 => DataType::Int32,
        GdalDataType::Float32 => DataType::Float32,
        _ => DataType::Float64,
    }
}

fn crs_of(dataset: &Dataset) -> Option<Crs> {
    let srs = dataset.spatial_ref().ok()?;
    if let Ok(code) = srs.auth_code() {
        if let Ok(code) = u16::try_from(code) {
            return Some(Crs::from_epsg(code));
        }
    }
    srs.to_proj4().ok().map(Crs::from_proj4)
}

/// A raster file opened for reading.
pub struct GdalSource {
    dataset: Dataset,
    metadata: RasterMetadata,
}

impl GdalSource {
    pub fn open(path: &Path) -> Result<Self> {
        let dataset = Dataset::open(path)
            .map_err(|e| ExportError::Read(format!("Failed to open {}: {}", path.display(), e)))?;

        let (width, height) = dataset.raster_size();
        let transform = dataset
            .geo_transform()
            .map(GeoTransform::from_gdal)
            .unwrap_or_else(|_| GeoTransform::north_up(0.0, 0.0, 1.0, 1.0));

        let mut color_interp = Vec::new();
        let mut nodata = None;
        let mut data_type = DataType::Byte;
        for idx in 1..=dataset.raster_count() {
            let band = dataset.rasterband(idx).map_err(read_error("rasterband"))?;
            color_interp.push(color_interp_from_gdal(band.color_interpretation()));
            if idx == 1 {
                nodata = band.no_data_value();
                data_type = data_type_from_gdal(band.band_type());
            }
        }

        let metadata = RasterMetadata {
            width,
            height,
            color_interp,
            crs: crs_of(&dataset),
            transform,
            nodata,
            data_type,
        };
        tracing::info!(
            "Opened {}: {}x{}, {} bands, {}",
            path.display(),
            width,
            height,
            metadata.band_count(),
            metadata.crs.as_ref().map_or("no CRS".to_string(), |crs| crs.to_string())
        );
        Ok(Self { dataset, metadata })
    }
}

impl RasterSource for GdalSource {
    fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    fn read_band(&self, band: usize, window: &Window) -> Result<BandArray> {
        check_band_index(&self.metadata, band)?;
        check_window(&self.metadata, window)?;

        let size = (window.width, window.height);
        let buffer: Buffer<f64> = self
            .dataset
            .rasterband(band)
            .map_err(read_error("rasterband"))?
            .read_as(
                (window.col_off as isize, window.row_off as isize),
                size,
                size,
                None,
            )
            .map_err(read_error("read_as"))?;
        Ok(BandArray::new(window.height, window.width, buffer.data().to_vec()))
    }

    fn read_dataset_mask(&self, window: &Window) -> Result<BandArray> {
        check_window(&self.metadata, window)?;
        if self.metadata.nodata.is_some() {
            return nodata_mask(self, window);
        }

        let size = (window.width, window.height);
        let buffer: Buffer<u8> = self
            .dataset
            .rasterband(1)
            .map_err(read_error("rasterband"))?
            .open_mask_band()
            .map_err(read_error("open_mask_band"))?
            .read_as(
                (window.col_off as isize, window.row_off as isize),
                size,
                size,
                None,
            )
            .map_err(read_error("read_as"))?;
        let values = buffer.data().iter().map(|v| *v as f64).collect();
        Ok(BandArray::new(window.height, window.width, values))
    }
}

/// Writes outputs with the GDAL driver named by the profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalCodec;

impl RasterCodec for GdalCodec {
    fn create(&self, path: &Path, profile: &OutputProfile) -> Result<Box<dyn RasterSink>> {
        let mem = DriverManager::get_driver_by_name("MEM").map_err(write_error("MEM driver"))?;
        let (w, h, n) = (profile.width, profile.height, profile.band_count);
        let mut dataset = match profile.data_type {
            DataType::Byte => mem.create_with_band_type::<u8, _>("", w, h, n),
            DataType::UInt16 => mem.create_with_band_type::<u16, _>("", w, h, n),
            DataType::Int16 => mem.create_with_band_type::<i16, _>("", w, h, n),
            DataType::UInt32 => mem.create_with_band_type::<u32, _>("", w, h, n),
            DataType::Int32 => mem.create_with_band_type::<i32, _>("", w, h, n),
            DataType::Float32 => mem.create_with_band_type::<f32, _>("", w, h, n),
            DataType::Float64 => mem.create_with_band_type::<f64, _>("", w, h, n),
        }
        .map_err(write_error("create"))?;

        dataset
            .set_geo_transform(&profile.transform.to_gdal())
            .map_err(write_error("set_geo_transform"))?;
        if let Some(crs) = &profile.crs {
            let srs = match (crs.epsg, &crs.proj4) {
                (Some(code), _) => SpatialRef::from_epsg(code as u32),
                (None, Some(definition)) => SpatialRef::from_proj4(definition),
                (None, None) => Err(GdalError::BadArgument("empty CRS".to_string())),
            }
            .map_err(write_error("spatial reference"))?;
            dataset
                .set_spatial_ref(&srs)
                .map_err(write_error("set_spatial_ref"))?;
        }
        if let Some(nodata) = profile.nodata {
            for idx in 1..=n {
                dataset
                    .rasterband(idx)
                    .map_err(write_error("rasterband"))?
                    .set_no_data_value(Some(nodata))
                    .map_err(write_error("set_no_data_value"))?;
            }
        }

        Ok(Box::new(GdalSink {
            dataset,
            path: path.to_path_buf(),
            profile: profile.clone(),
        }))
    }
}

/// Bands are staged in memory and copied out with the target driver on close,
/// since the JPEG and PNG drivers only support `CreateCopy`.
struct GdalSink {
    dataset: Dataset,
    path: PathBuf,
    profile: OutputProfile,
}

impl RasterSink for GdalSink {
    fn write_band(&mut self, band: usize, data: &BandArray) -> Result<()> {
        let (rows, cols) = data.shape();
        let values = data.values.iter().map(|v| self.profile.data_type.cast(*v)).collect();
        let mut buffer = Buffer::new((cols, rows), values);
        self.dataset
            .rasterband(band)
            .map_err(write_error("rasterband"))?
            .write((0, 0), (cols, rows), &mut buffer)
            .map_err(write_error("write"))?;
        Ok(())
    }

    fn set_color_interp(&mut self, interp: &[ColorInterp]) -> Result<()> {
        for (idx, ci) in interp.iter().enumerate() {
            self.dataset
                .rasterband(idx + 1)
                .map_err(write_error("rasterband"))?
                .set_color_interpretation(color_interp_to_gdal(*ci))
                .map_err(write_error("set_color_interpretation"))?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let driver = DriverManager::get_driver_by_name(self.profile.driver.name())
            .map_err(write_error("driver"))?;

        let mut options = CslStringList::new();
        for option in self.profile.creation_options() {
            options.add_string(&option).map_err(write_error("creation option"))?;
        }

        tracing::debug!(
            "Writing {} with {:?}",
            self.path.display(),
            self.profile.creation_options()
        );
        let copy = self
            .dataset
            .create_copy(&driver, &self.path, &options)
            .map_err(|e| ExportError::Write(format!("{}: {}", self.path.display(), e)))?;
        drop(copy);
        Ok(())
    }
}

/// Exports the raster file at `input` to `output` with the default collaborators.
pub fn export_raster(input: &Path, output: &Path, options: &ExportOptions) -> Result<ExportOutcome> {
    let source = GdalSource::open(input)?;
    Exporter::new(GdalCodec).export(&source, output, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemRaster;
    use crate::options::ExportFormat;
    use tempfile::TempDir;

    fn init_gdal() -> bool {
        DriverManager::get_driver_by_name("GTiff").is_ok()
            && DriverManager::get_driver_by_name("MEM").is_ok()
    }

    fn create_test_raster() -> MemRaster {
        let metadata = RasterMetadata {
            width: 3,
            height: 2,
            color_interp: vec![ColorInterp::Gray],
            crs: Some(Crs::from_epsg(6668)),
            transform: GeoTransform::north_up(135.0, 35.0, 0.001, -0.001),
            nodata: Some(-9999.0),
            data_type: DataType::Float32,
        };
        MemRaster::new(metadata, vec![vec![100.0, 101.0, 102.0, 103.0, -9999.0, 105.0]]).unwrap()
    }

    #[test]
    fn test_geotiff_round_trip() {
        if !init_gdal() {
            eprintln!("Skipping test: GTiff driver not available");
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("dem.tif");

        let source = create_test_raster();
        let outcome = Exporter::new(GdalCodec)
            .export(&source, &output_path, &ExportOptions::default())
            .unwrap();
        assert_eq!(outcome.profile.band_count, 1);
        assert!(output_path.exists());

        let written = GdalSource::open(&output_path).unwrap();
        let metadata = written.metadata();
        assert_eq!((metadata.width, metadata.height), (3, 2));
        assert_eq!(metadata.nodata, Some(-9999.0));
        assert_eq!(metadata.data_type, DataType::Float32);
        assert_eq!(metadata.transform.origin_x, 135.0);
        assert_eq!(metadata.transform.pixel_width, 0.001);

        let data = written.read_band(1, &metadata.full_window()).unwrap();
        assert_eq!(data.values, vec![100.0, 101.0, 102.0, 103.0, -9999.0, 105.0]);
        let mask = written.read_dataset_mask(&metadata.full_window()).unwrap();
        assert_eq!(mask.get(1, 1), 0.0);
        assert_eq!(mask.get(0, 0), 255.0);
    }

    #[test]
    fn test_png_output_is_rgba() {
        if !init_gdal() || DriverManager::get_driver_by_name("PNG").is_err() {
            eprintln!("Skipping test: PNG driver not available");
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("dem.png");

        let options = ExportOptions {
            format: ExportFormat::Png,
            color_map: Some("viridis".to_string()),
            asset_type: crate::options::AssetType::Dsm,
            ..Default::default()
        };
        Exporter::new(GdalCodec)
            .export(&create_test_raster(), &output_path, &options)
            .unwrap();

        let dataset = Dataset::open(&output_path).unwrap();
        assert_eq!(dataset.raster_size(), (3, 2));
        assert_eq!(dataset.raster_count(), 4);
        let alpha = dataset.rasterband(4).unwrap();
        assert_eq!(alpha.color_interpretation(), ColorInterpretation::AlphaBand);
    }
}
