//! Core raster data model shared by every pipeline stage.

/// Affine pixel-to-world mapping in GDAL coefficient order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            origin_x: gt[0],
            pixel_width: gt[1],
            row_rotation: gt[2],
            origin_y: gt[3],
            col_rotation: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    /// World coordinate of a (fractional) pixel position.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.col_rotation + row * self.pixel_height,
        )
    }

    /// Inverse mapping (world to pixel), `None` when the transform is singular.
    pub fn invert(&self) -> Option<GeoTransform> {
        let gt = self.to_gdal();
        let det = gt[1] * gt[5] - gt[2] * gt[4];
        if det.abs() < 1e-15 {
            return None;
        }
        let inv_det = 1.0 / det;

        Some(GeoTransform::from_gdal([
            (gt[2] * gt[3] - gt[0] * gt[5]) * inv_det,
            gt[5] * inv_det,
            -gt[2] * inv_det,
            (-gt[1] * gt[3] + gt[0] * gt[4]) * inv_det,
            -gt[4] * inv_det,
            gt[1] * inv_det,
        ]))
    }

    /// Transform of the sub-grid that starts at the window's top-left pixel.
    pub fn for_window(&self, window: &Window) -> GeoTransform {
        let (x, y) = self.apply(window.col_off as f64, window.row_off as f64);
        GeoTransform {
            origin_x: x,
            origin_y: y,
            ..*self
        }
    }

    /// World extent of a `width` x `height` grid using this transform.
    pub fn bounds(&self, width: usize, height: usize) -> Bounds {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(width as f64, 0.0),
            self.apply(0.0, height as f64),
            self.apply(width as f64, height as f64),
        ];
        Bounds::enclosing(corners.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn enclosing(points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut bounds = Bounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        bounds
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }
}

/// Rectangular pixel region of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn fits_in(&self, width: usize, height: usize) -> bool {
        self.col_off + self.width <= width && self.row_off + self.height <= height
    }
}

/// Semantic role of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorInterp {
    Undefined,
    Gray,
    Red,
    Green,
    Blue,
    Alpha,
}

/// Sample type of an output band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Byte => "Byte",
            DataType::UInt16 => "UInt16",
            DataType::Int16 => "Int16",
            DataType::UInt32 => "UInt32",
            DataType::Int32 => "Int32",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        }
    }

    fn integer_range(&self) -> Option<(f64, f64)> {
        match self {
            DataType::Byte => Some((0.0, u8::MAX as f64)),
            DataType::UInt16 => Some((0.0, u16::MAX as f64)),
            DataType::Int16 => Some((i16::MIN as f64, i16::MAX as f64)),
            DataType::UInt32 => Some((0.0, u32::MAX as f64)),
            DataType::Int32 => Some((i32::MIN as f64, i32::MAX as f64)),
            DataType::Float32 | DataType::Float64 => None,
        }
    }

    /// Value as it will be stored by this type: integers truncate toward zero
    /// and saturate, NaN becomes 0, Float32 loses precision.
    pub fn cast(&self, value: f64) -> f64 {
        match self.integer_range() {
            Some((min, max)) => {
                if value.is_nan() {
                    0.0
                } else {
                    value.trunc().clamp(min, max)
                }
            }
            None => match self {
                DataType::Float32 => value as f32 as f64,
                _ => value,
            },
        }
    }
}

/// Coordinate reference system, identified by EPSG code and/or a PROJ string.
#[derive(Debug, Clone, PartialEq)]
pub struct Crs {
    pub epsg: Option<u16>,
    pub proj4: Option<String>,
}

impl Crs {
    pub const WGS84: u16 = 4326;

    pub fn from_epsg(code: u16) -> Self {
        Self {
            epsg: Some(code),
            proj4: None,
        }
    }

    pub fn from_proj4(definition: impl Into<String>) -> Self {
        Self {
            epsg: None,
            proj4: Some(definition.into()),
        }
    }

    pub fn wgs84() -> Self {
        Self::from_epsg(Self::WGS84)
    }

    /// True when both sides are known to be the same system without a transform.
    pub fn is_equivalent(&self, other: &Crs) -> bool {
        match (self.epsg, other.epsg) {
            (Some(a), Some(b)) => a == b,
            _ => self.proj4.is_some() && self.proj4 == other.proj4,
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.epsg, &self.proj4) {
            (Some(code), _) => write!(f, "EPSG:{code}"),
            (None, Some(def)) => write!(f, "{def}"),
            (None, None) => write!(f, "<unknown>"),
        }
    }
}

/// Read-only description of a source raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub color_interp: Vec<ColorInterp>,
    pub crs: Option<Crs>,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    pub data_type: DataType,
}

impl RasterMetadata {
    pub fn band_count(&self) -> usize {
        self.color_interp.len()
    }

    /// 1-based indices of all bands.
    pub fn indexes(&self) -> Vec<usize> {
        (1..=self.band_count()).collect()
    }

    /// 1-based index of the first band tagged alpha.
    pub fn alpha_band(&self) -> Option<usize> {
        self.band_with(ColorInterp::Alpha)
    }

    pub fn band_with(&self, interp: ColorInterp) -> Option<usize> {
        self.color_interp
            .iter()
            .position(|ci| *ci == interp)
            .map(|idx| idx + 1)
    }

    pub fn full_window(&self) -> Window {
        Window::full(self.width, self.height)
    }
}

/// One band of pixel values over a window, row-major, widened to f64.
///
/// Every sample type is held as f64, so a window costs 8 bytes per pixel per
/// band whatever the source type (8x a byte band).
#[derive(Debug, Clone, PartialEq)]
pub struct BandArray {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
}

impl BandArray {
    pub fn new(rows: usize, cols: usize, values: Vec<f64>) -> Self {
        assert_eq!(
            values.len(),
            rows * cols,
            "band data does not match its {rows}x{cols} shape"
        );
        Self { rows, cols, values }
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self::new(rows, cols, vec![value; rows * cols])
    }

    /// Returns (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> BandArray {
        BandArray::new(self.rows, self.cols, self.values.iter().map(|v| f(*v)).collect())
    }

    pub fn cast(&self, data_type: DataType) -> BandArray {
        self.map(|v| data_type.cast(v))
    }
}
