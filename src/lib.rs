pub mod codec;
pub mod colormap;
pub mod error;
pub mod expression;
#[cfg(feature = "gdal")]
pub mod gdal_backend;
pub mod hillshade;
pub mod mask;
pub mod memory;
pub mod model;
pub mod options;
pub mod package;
pub mod pipeline;
pub mod profile;
pub mod projection;
pub mod reproject;
pub mod rescale;
pub mod stats;
pub mod window;
pub mod writer;

pub use codec::{RasterCodec, RasterSink, RasterSource};
pub use colormap::{BuiltinRamps, ColorMap, ColorRampSource, RampDirectory};
pub use error::{ExportError, Result};
#[cfg(feature = "gdal")]
pub use gdal_backend::{export_raster, GdalCodec, GdalSource};
pub use memory::{MemRaster, MemoryCodec};
pub use model::{BandArray, ColorInterp, Crs, DataType, GeoTransform, RasterMetadata, Window};
pub use options::{AssetType, ExportFormat, ExportOptions};
pub use package::{GdalTranslatePackager, Packager};
pub use pipeline::{ExportOutcome, Exporter};
pub use profile::OutputProfile;
pub use stats::{PercentileStatistics, StatisticsProvider};
