//! Resolution of the working window, optionally clipped to a crop polygon.

use geo::{Area, BoundingRect, Contains, Coord, Geometry, MapCoords, MultiPolygon, Point};
use wkt::TryFromWkt;

use crate::codec::{RasterSource, MASK_VALID};
use crate::error::{ExportError, Result};
use crate::model::{BandArray, Crs, GeoTransform, RasterMetadata, Window};
use crate::projection::{self, CoordinateTransform};

/// Value written outside the crop polygon.
pub const CUTLINE_NODATA: f64 = 0.0;

/// Pixel region of the source being exported and its world transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedWindow {
    pub window: Window,
    pub transform: GeoTransform,
    pub cropped: bool,
}

/// Reader handed to the rest of the pipeline.
pub enum ActiveReader<'a> {
    Direct(&'a dyn RasterSource),
    Clipped(ClippedReader<'a>),
}

impl<'a> ActiveReader<'a> {
    pub fn as_source(&self) -> &dyn RasterSource {
        match self {
            ActiveReader::Direct(source) => *source,
            ActiveReader::Clipped(reader) => reader,
        }
    }
}

/// Resolves the export window. Without a crop this is the full raster at its
/// native transform; with one, the window is the crop's bounding box clamped to
/// the raster, read through a [`ClippedReader`].
pub fn resolve<'a>(
    source: &'a dyn RasterSource,
    crop_wkt: Option<&str>,
) -> Result<(ResolvedWindow, ActiveReader<'a>)> {
    let metadata = source.metadata();

    let Some(wkt) = crop_wkt else {
        let resolved = ResolvedWindow {
            window: metadata.full_window(),
            transform: metadata.transform,
            cropped: false,
        };
        return Ok((resolved, ActiveReader::Direct(source)));
    };

    let crop = parse_crop(wkt)?;
    let source_crs = metadata.crs.as_ref().ok_or_else(|| {
        ExportError::Geometry("source raster has no coordinate system to place the crop".to_string())
    })?;
    let to_source = projection::transformer(&Crs::wgs84(), source_crs)?;
    let cutline = pixel_cutline(&crop, to_source.as_ref(), metadata)?;
    let window = cutline_window(&cutline, metadata)?;

    tracing::info!(
        "Crop window: offset ({}, {}), size {}x{}",
        window.col_off,
        window.row_off,
        window.width,
        window.height
    );

    let resolved = ResolvedWindow {
        window,
        transform: metadata.transform.for_window(&window),
        cropped: true,
    };
    let reader = ClippedReader::new(source, cutline);
    Ok((resolved, ActiveReader::Clipped(reader)))
}

fn parse_crop(wkt: &str) -> Result<MultiPolygon<f64>> {
    let geometry = Geometry::<f64>::try_from_wkt_str(wkt)
        .map_err(|e| ExportError::Geometry(format!("cannot parse WKT: {e}")))?;

    let polygons = match geometry {
        Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
        Geometry::MultiPolygon(polygons) => polygons,
        other => {
            return Err(ExportError::Geometry(format!(
                "expected a Polygon or MultiPolygon, got {}",
                geometry_kind(&other)
            )))
        }
    };

    if polygons.unsigned_area() <= 0.0 {
        return Err(ExportError::Geometry("crop polygon has no area".to_string()));
    }
    Ok(polygons)
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        _ => "geometry",
    }
}

/// Crop polygon expressed in fractional source pixel coordinates.
fn pixel_cutline(
    crop: &MultiPolygon<f64>,
    to_source: &dyn CoordinateTransform,
    metadata: &RasterMetadata,
) -> Result<MultiPolygon<f64>> {
    let inverse = metadata.transform.invert().ok_or_else(|| {
        ExportError::Geometry("source transform is not invertible".to_string())
    })?;

    crop.try_map_coords(|c: Coord<f64>| -> Result<Coord<f64>> {
        let (x, y) = to_source.transform(c.x, c.y)?;
        let (col, row) = inverse.apply(x, y);
        Ok(Coord { x: col, y: row })
    })
}

fn cutline_window(cutline: &MultiPolygon<f64>, metadata: &RasterMetadata) -> Result<Window> {
    let rect = cutline
        .bounding_rect()
        .ok_or_else(|| ExportError::Geometry("crop polygon is empty".to_string()))?;

    let col_min = rect.min().x.floor().max(0.0);
    let row_min = rect.min().y.floor().max(0.0);
    let col_max = rect.max().x.ceil().min(metadata.width as f64);
    let row_max = rect.max().y.ceil().min(metadata.height as f64);

    if !(col_max > col_min && row_max > row_min) {
        return Err(ExportError::Geometry(
            "crop polygon does not intersect the raster".to_string(),
        ));
    }

    Ok(Window::new(
        col_min as usize,
        row_min as usize,
        (col_max - col_min) as usize,
        (row_max - row_min) as usize,
    ))
}

/// View of a source in which pixels whose centers fall outside the cutline
/// read as [`CUTLINE_NODATA`] and are invalid in the dataset mask.
pub struct ClippedReader<'a> {
    source: &'a dyn RasterSource,
    metadata: RasterMetadata,
    cutline: MultiPolygon<f64>,
}

impl<'a> ClippedReader<'a> {
    pub fn new(source: &'a dyn RasterSource, cutline: MultiPolygon<f64>) -> Self {
        let metadata = RasterMetadata {
            nodata: Some(CUTLINE_NODATA),
            ..source.metadata().clone()
        };
        Self {
            source,
            metadata,
            cutline,
        }
    }

    fn inside(&self, window: &Window) -> Vec<bool> {
        let mut inside = Vec::with_capacity(window.pixel_count());
        for row in window.row_off..window.row_off + window.height {
            for col in window.col_off..window.col_off + window.width {
                let center = Point::new(col as f64 + 0.5, row as f64 + 0.5);
                inside.push(self.cutline.contains(&center));
            }
        }
        inside
    }
}

impl RasterSource for ClippedReader<'_> {
    fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    fn read_band(&self, band: usize, window: &Window) -> Result<BandArray> {
        let mut data = self.source.read_band(band, window)?;
        for (v, inside) in data.values.iter_mut().zip(self.inside(window)) {
            if !inside {
                *v = CUTLINE_NODATA;
            }
        }
        Ok(data)
    }

    fn read_dataset_mask(&self, window: &Window) -> Result<BandArray> {
        let mut mask = self.source.read_dataset_mask(window)?;
        for (m, inside) in mask.values.iter_mut().zip(self.inside(window)) {
            *m = if inside && *m != 0.0 { MASK_VALID } else { 0.0 };
        }
        Ok(mask)
    }
}

impl Drop for ClippedReader<'_> {
    fn drop(&mut self) {
        tracing::debug!("Closing clipped reader");
    }
}
