//! The export pipeline: window, profile, mask and per-mode band writing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::codec::{RasterCodec, RasterSource};
use crate::colormap::{self, BuiltinRamps, ColorMap, ColorRampSource};
use crate::error::Result;
use crate::expression::{self, Expression};
use crate::hillshade;
use crate::mask::Mask;
use crate::model::{BandArray, ColorInterp, Crs, DataType, RasterMetadata, Window};
use crate::options::{ExportFormat, ExportOptions};
use crate::package::{self, GdalTranslatePackager, Packager};
use crate::profile::{OutputProfile, ProfileBuilder};
use crate::projection;
use crate::reproject::{DestinationGrid, Reprojector};
use crate::rescale::Rescale;
use crate::stats::{PercentileStatistics, StatisticsProvider};
use crate::window::{self, ResolvedWindow};
use crate::writer::{BandWriteStrategy, BandWriter};

/// Fill for invalid pixels of outputs without an alpha band (white).
pub const BACKGROUND_FILL: f64 = 255.0;

/// Result of a successful export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    /// File requested by the caller.
    pub output: PathBuf,
    /// Raster rendered before packaging, kept next to a packaged output.
    pub intermediate: Option<PathBuf>,
    /// Profile the written raster was created with.
    pub profile: OutputProfile,
}

/// Runs exports against a codec and its collaborators.
pub struct Exporter {
    codec: Box<dyn RasterCodec>,
    statistics: Box<dyn StatisticsProvider>,
    ramps: Box<dyn ColorRampSource>,
    packager: Box<dyn Packager>,
}

impl Exporter {
    pub fn new(codec: impl RasterCodec + 'static) -> Self {
        Self {
            codec: Box::new(codec),
            statistics: Box::new(PercentileStatistics),
            ramps: Box::new(BuiltinRamps),
            packager: Box::new(GdalTranslatePackager::new()),
        }
    }

    pub fn with_statistics(mut self, statistics: impl StatisticsProvider + 'static) -> Self {
        self.statistics = Box::new(statistics);
        self
    }

    pub fn with_ramps(mut self, ramps: impl ColorRampSource + 'static) -> Self {
        self.ramps = Box::new(ramps);
        self
    }

    pub fn with_packager(mut self, packager: impl Packager + 'static) -> Self {
        self.packager = Box::new(packager);
        self
    }

    /// Exports `source` to `output`.
    ///
    /// A failed export may leave a partially written destination behind.
    pub fn export(
        &self,
        source: &dyn RasterSource,
        output: &Path,
        options: &ExportOptions,
    ) -> Result<ExportOutcome> {
        options.validate()?;
        let expression = options.parsed_expression()?;
        if let Some(expression) = &expression {
            expression.check_bands(source.metadata().band_count())?;
        }

        tracing::info!(
            "Exporting {} band raster to {} as {:?}",
            source.metadata().band_count(),
            output.display(),
            options.format
        );

        if options.format != ExportFormat::Kmz {
            let profile = self.render(source, output, options, expression.as_ref())?;
            return Ok(ExportOutcome {
                output: output.to_path_buf(),
                intermediate: None,
                profile,
            });
        }

        let intermediate = package::intermediate_path(output);
        let profile = self.render(source, &intermediate, options, expression.as_ref())?;
        self.packager.package(&intermediate, output, &options.name)?;
        Ok(ExportOutcome {
            output: output.to_path_buf(),
            intermediate: Some(intermediate),
            profile,
        })
    }

    fn render(
        &self,
        source: &dyn RasterSource,
        destination: &Path,
        options: &ExportOptions,
        expression: Option<&Expression>,
    ) -> Result<OutputProfile> {
        let (resolved, reader) = window::resolve(source, options.crop.as_deref())?;
        let reader = reader.as_source();
        let win = resolved.window;

        let mut builder =
            ProfileBuilder::new(source.metadata(), &win, resolved.transform, options.format);
        let rescale = builder.rescale_range(
            options.rescale,
            options.asset_type,
            self.statistics.as_ref(),
            reader,
            &win,
        )?;
        let mask = Mask::read(reader, &win)?;
        let cmap = colormap::resolve_or_warn(self.ramps.as_ref(), options.color_map.as_deref())?;
        builder.clear_elevation_nodata(options.asset_type);

        let strategy = match target_crs(source.metadata(), options.epsg) {
            Some((source_crs, target)) => {
                let to_target = projection::transformer(source_crs, &target)?;
                let grid = DestinationGrid::compute(
                    &target,
                    &resolved.transform,
                    win.width,
                    win.height,
                    to_target.as_ref(),
                )?;
                builder.set_grid(grid.crs.clone(), grid.transform, grid.width, grid.height);
                let reprojector =
                    Reprojector::new(source_crs, &resolved.transform, win.width, win.height, grid)?;
                BandWriteStrategy::Reprojected(reprojector)
            }
            None => BandWriteStrategy::Direct,
        };

        let render = Render {
            reader,
            resolved: &resolved,
            process: Process {
                rescale,
                mask: &mask,
                with_alpha: builder.profile().with_alpha,
                visual: builder.profile().visual,
            },
            cmap: cmap.as_ref(),
            codec: self.codec.as_ref(),
            destination,
        };

        if let Some(expression) = expression {
            render.expression(builder, strategy, expression)
        } else if options.asset_type.is_elevation() {
            render.elevation(builder, strategy, options.hillshade_factor())
        } else {
            render.copy(builder, strategy)
        }
    }
}

/// Source and target systems when the export has to be reprojected.
fn target_crs(metadata: &RasterMetadata, epsg: Option<u16>) -> Option<(&Crs, Crs)> {
    let source_crs = metadata.crs.as_ref()?;
    let target = Crs::from_epsg(epsg?);
    (!source_crs.is_equivalent(&target)).then_some((source_crs, target))
}

/// Bands copied to the output, in order.
///
/// Visual outputs of rasters with more than four bands use the red, green,
/// blue and alpha bands when all are tagged, otherwise the first three color
/// bands and the alpha band.
pub fn select_bands(metadata: &RasterMetadata, visual: bool) -> Vec<usize> {
    if !visual || metadata.band_count() <= 4 {
        return metadata.indexes();
    }

    let tagged: Option<Vec<usize>> = [
        ColorInterp::Red,
        ColorInterp::Green,
        ColorInterp::Blue,
        ColorInterp::Alpha,
    ]
    .iter()
    .map(|interp| metadata.band_with(*interp))
    .collect();
    if let Some(indexes) = tagged {
        return indexes;
    }

    let alpha = metadata.alpha_band();
    let mut indexes: Vec<usize> = metadata
        .indexes()
        .into_iter()
        .filter(|idx| Some(*idx) != alpha)
        .take(3)
        .collect();
    indexes.extend(alpha);
    indexes
}

/// Per-array processing shared by every mode: rescale, background fill of
/// invalid pixels when there is no alpha band, byte cast for visual output.
struct Process<'m> {
    rescale: Option<Rescale>,
    mask: &'m Mask,
    with_alpha: bool,
    visual: bool,
}

impl Process<'_> {
    fn run(&self, band: &BandArray, skip_rescale: bool, skip_fill: bool) -> BandArray {
        let mut out = match self.rescale {
            Some(rescale) if !skip_rescale => rescale.apply(band),
            _ => band.clone(),
        };
        if !skip_fill && !self.with_alpha {
            self.mask.fill_invalid(&mut out, BACKGROUND_FILL);
        }
        if self.visual {
            out = out.cast(DataType::Byte);
        }
        out
    }

    /// Visual outputs that keep alpha carry the mask after their data bands.
    fn appends_mask(&self) -> bool {
        self.visual && self.with_alpha
    }

    fn rgb_interp(&self) -> Vec<ColorInterp> {
        let mut interp = vec![ColorInterp::Red, ColorInterp::Green, ColorInterp::Blue];
        if self.with_alpha {
            interp.push(ColorInterp::Alpha);
        }
        interp
    }
}

struct Render<'r> {
    reader: &'r dyn RasterSource,
    resolved: &'r ResolvedWindow,
    process: Process<'r>,
    cmap: Option<&'r ColorMap>,
    codec: &'r dyn RasterCodec,
    destination: &'r Path,
}

impl Render<'_> {
    fn window(&self) -> &Window {
        &self.resolved.window
    }

    fn open(&self, builder: ProfileBuilder, strategy: BandWriteStrategy) -> Result<BandWriter> {
        BandWriter::create(self.codec, self.destination, builder.freeze(), strategy)
    }

    /// Writes colormapped bands followed by the mask when alpha is kept.
    fn write_rgb(&self, writer: &mut BandWriter, rgb: [BandArray; 3]) -> Result<()> {
        for band in &rgb {
            writer.write(&self.process.run(band, true, false))?;
        }
        if self.process.with_alpha {
            writer.write(self.process.mask.as_band())?;
        }
        Ok(())
    }

    fn expression(
        &self,
        mut builder: ProfileBuilder,
        strategy: BandWriteStrategy,
        expression: &Expression,
    ) -> Result<OutputProfile> {
        let metadata = self.reader.metadata();
        let alpha_index = metadata.alpha_band();

        let mut inputs = HashMap::new();
        for band in expression.bands() {
            let data = self.reader.read_band(band, self.window())?;
            inputs.insert(band, data.cast(DataType::Float32));
        }
        let alpha = match alpha_index {
            Some(idx) => Some(self.reader.read_band(idx, self.window())?),
            None => None,
        };

        let mut results = expression.evaluate(&inputs)?;
        expression::sanitize(&mut results, alpha.as_ref());

        match (self.process.visual, self.cmap) {
            (true, Some(cmap)) => {
                let interp = self.process.rgb_interp();
                builder.set_band_count(interp.len());
                let mut writer = self.open(builder, strategy)?;

                let rgb = cmap.apply(&self.process.run(&results[0], false, true));
                self.write_rgb(&mut writer, rgb)?;
                writer.finish(&interp)
            }
            (visual, _) => {
                let mut interp = if visual && results.len() == 3 {
                    vec![ColorInterp::Red, ColorInterp::Green, ColorInterp::Blue]
                } else {
                    vec![ColorInterp::Gray; results.len()]
                };
                let append_mask = self.process.appends_mask();
                if append_mask {
                    interp.push(ColorInterp::Alpha);
                }

                builder.set_band_count(interp.len());
                if !visual {
                    builder
                        .set_data_type(DataType::Float32)
                        .set_nodata(Some(expression::NODATA_SENTINEL));
                }
                let mut writer = self.open(builder, strategy)?;

                for band in &results {
                    writer.write(&self.process.run(band, false, false))?;
                }
                if append_mask {
                    writer.write(self.process.mask.as_band())?;
                }
                writer.finish(&interp)
            }
        }
    }

    fn elevation(
        &self,
        mut builder: ProfileBuilder,
        strategy: BandWriteStrategy,
        hillshade_factor: Option<f64>,
    ) -> Result<OutputProfile> {
        let elevation = self.reader.read_band(1, self.window())?;

        match (self.process.visual, self.cmap) {
            (true, Some(cmap)) => {
                let interp = self.process.rgb_interp();
                builder.set_band_count(interp.len());
                let mut writer = self.open(builder, strategy)?;

                let mut rgb = cmap.apply(&self.process.run(&elevation, false, true));
                if let Some(factor) = hillshade_factor {
                    let intensity =
                        hillshade::shade(&elevation, &self.resolved.transform, factor);
                    rgb = hillshade::hsv_blend(rgb, &intensity);
                }
                self.write_rgb(&mut writer, rgb)?;
                writer.finish(&interp)
            }
            _ => {
                let mut interp = vec![ColorInterp::Gray];
                if self.process.appends_mask() {
                    interp.push(ColorInterp::Alpha);
                }
                builder.set_band_count(interp.len());
                let mut writer = self.open(builder, strategy)?;

                writer.write(&self.process.run(&elevation, false, false))?;
                if self.process.appends_mask() {
                    writer.write(self.process.mask.as_band())?;
                }
                writer.finish(&interp)
            }
        }
    }

    fn copy(&self, mut builder: ProfileBuilder, strategy: BandWriteStrategy) -> Result<OutputProfile> {
        let metadata = self.reader.metadata();
        let indexes = select_bands(metadata, self.process.visual);
        let keep = |idx: usize| {
            self.process.with_alpha || metadata.color_interp[idx - 1] != ColorInterp::Alpha
        };

        let mut interp: Vec<ColorInterp> = indexes
            .iter()
            .filter(|idx| keep(**idx))
            .map(|idx| metadata.color_interp[*idx - 1])
            .collect();
        let append_mask = self.process.appends_mask() && !interp.contains(&ColorInterp::Alpha);
        if append_mask {
            interp.push(ColorInterp::Alpha);
        }

        builder.set_band_count(interp.len());
        let mut writer = self.open(builder, strategy)?;

        for idx in indexes.into_iter().filter(|idx| keep(*idx)) {
            let data = self.reader.read_band(idx, self.window())?;
            if metadata.color_interp[idx - 1] == ColorInterp::Alpha {
                writer.write(&data)?;
            } else {
                writer.write(&self.process.run(&data, false, false))?;
            }
        }
        if append_mask {
            writer.write(self.process.mask.as_band())?;
        }
        writer.finish(&interp)
    }
}
