use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use raster_export::hillshade;
use raster_export::profile::Driver;
use raster_export::rescale::Rescale;
use raster_export::{
    AssetType, BandArray, BuiltinRamps, ColorInterp, ColorRampSource, Crs, DataType, ExportError,
    ExportFormat, ExportOptions, Exporter, GeoTransform, MemRaster, MemoryCodec, Packager,
    RasterMetadata, RasterSource,
};

const NODATA: f64 = -9999.0;

fn metadata(
    width: usize,
    height: usize,
    color_interp: Vec<ColorInterp>,
    crs: Crs,
    transform: GeoTransform,
    nodata: Option<f64>,
    data_type: DataType,
) -> RasterMetadata {
    RasterMetadata {
        width,
        height,
        color_interp,
        crs: Some(crs),
        transform,
        nodata,
        data_type,
    }
}

/// 6x6 UTM surface rising to the south-east with one nodata corner.
fn create_dsm() -> MemRaster {
    let (width, height) = (6, 6);
    let mut values = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            values.push(10.0 + row as f64 * 1.5 + col as f64);
        }
    }
    values[0] = NODATA;
    let meta = metadata(
        width,
        height,
        vec![ColorInterp::Gray],
        Crs::from_epsg(32633),
        GeoTransform::north_up(500_000.0, 4_600_000.0, 10.0, -10.0),
        Some(NODATA),
        DataType::Float32,
    );
    MemRaster::new(meta, vec![values]).unwrap()
}

/// 4x3 RGBA orthophoto in geographic coordinates; the first row is transparent.
fn create_orthophoto() -> MemRaster {
    let (width, height) = (4, 3);
    let pixels = width * height;
    let red: Vec<f64> = (0..pixels).map(|i| 20.0 + i as f64 * 10.0).collect();
    let green: Vec<f64> = (0..pixels).map(|i| 200.0 - i as f64 * 5.0).collect();
    let blue = vec![90.0; pixels];
    let alpha: Vec<f64> = (0..pixels)
        .map(|i| if i < width { 0.0 } else { 255.0 })
        .collect();
    let meta = metadata(
        width,
        height,
        vec![
            ColorInterp::Red,
            ColorInterp::Green,
            ColorInterp::Blue,
            ColorInterp::Alpha,
        ],
        Crs::wgs84(),
        GeoTransform::north_up(10.0, 50.0, 0.01, -0.01),
        None,
        DataType::Byte,
    );
    MemRaster::new(meta, vec![red, green, blue, alpha]).unwrap()
}

fn options(format: ExportFormat) -> ExportOptions {
    ExportOptions {
        format,
        ..ExportOptions::default()
    }
}

fn full_band(raster: &MemRaster, band: usize) -> BandArray {
    let meta = raster.metadata();
    raster.read_band(band, &meta.full_window()).unwrap()
}

fn output_path(name: &str) -> PathBuf {
    PathBuf::from("/exports").join(name)
}

#[test]
fn test_hillshaded_dsm_to_png() {
    let dsm = create_dsm();
    let codec = MemoryCodec::new();
    let output = output_path("dsm.png");
    let opts = ExportOptions {
        asset_type: AssetType::Dsm,
        color_map: Some("terrain".to_string()),
        hillshade: Some(2.0),
        ..options(ExportFormat::Png)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&dsm, &output, &opts)
        .unwrap();
    assert_eq!(outcome.intermediate, None);
    assert_eq!(outcome.profile.driver, Driver::Png);
    assert_eq!(outcome.profile.band_count, 4);
    assert_eq!(outcome.profile.nodata, None, "visual elevation keeps no nodata");

    let written = codec.output(&output).expect("png was not written");
    let meta = written.metadata();
    assert_eq!(
        meta.color_interp,
        vec![
            ColorInterp::Red,
            ColorInterp::Green,
            ColorInterp::Blue,
            ColorInterp::Alpha
        ]
    );
    assert_eq!(meta.data_type, DataType::Byte);
    assert_eq!((meta.width, meta.height), (6, 6));

    let elevation = full_band(&dsm, 1);
    let intensity = hillshade::shade(&elevation, &dsm.metadata().transform, 2.0);
    let source_mask = dsm
        .read_dataset_mask(&dsm.metadata().full_window())
        .unwrap();

    let (red, green, blue, alpha) = (
        written.band(1).unwrap(),
        written.band(2).unwrap(),
        written.band(3).unwrap(),
        written.band(4).unwrap(),
    );
    for i in 0..intensity.len() {
        let value = red[i].max(green[i]).max(blue[i]);
        assert!(
            (value - intensity.values[i]).abs() <= 1.0 + 1e-3,
            "pixel {i}: value channel {value}, intensity {}",
            intensity.values[i]
        );
        assert_eq!(alpha[i], source_mask.values[i], "alpha mismatch at pixel {i}");
    }
    assert_eq!(alpha[0], 0.0);
}

#[test]
fn test_colormapped_dsm_uses_ramp_entries() {
    let dsm = create_dsm();
    let codec = MemoryCodec::new();
    let output = output_path("dsm_rgb.tif");
    let opts = ExportOptions {
        asset_type: AssetType::Dtm,
        color_map: Some("terrain".to_string()),
        rescale: Some([10.0, 25.0]),
        ..options(ExportFormat::GtiffRgb)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&dsm, &output, &opts)
        .unwrap();
    assert_eq!(outcome.profile.band_count, 4);

    let cmap = BuiltinRamps.resolve("terrain").unwrap().unwrap();
    let rescale = Rescale::new(10.0, 25.0);
    let written = codec.output(&output).unwrap();
    let elevation = full_band(&dsm, 1);
    for (i, v) in elevation.values.iter().enumerate() {
        let [r, g, b, _] = cmap.entry(rescale.value(*v).trunc());
        assert_eq!(
            [
                written.band(1).unwrap()[i],
                written.band(2).unwrap()[i],
                written.band(3).unwrap()[i]
            ],
            [r as f64, g as f64, b as f64],
            "color mismatch at pixel {i}"
        );
    }
}

#[test]
fn test_orthophoto_to_jpeg_fills_background() {
    let ortho = create_orthophoto();
    let codec = MemoryCodec::new();
    let output = output_path("ortho.jpg");
    let opts = ExportOptions {
        asset_type: AssetType::Orthophoto,
        ..options(ExportFormat::Jpg)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&ortho, &output, &opts)
        .unwrap();
    assert_eq!(outcome.profile.driver, Driver::Jpeg);
    assert_eq!(outcome.profile.band_count, 3);
    assert!(!outcome.profile.with_alpha);

    let written = codec.output(&output).unwrap();
    assert_eq!(
        written.metadata().color_interp,
        vec![ColorInterp::Red, ColorInterp::Green, ColorInterp::Blue]
    );
    let alpha = full_band(&ortho, 4);
    for band in 1..=3 {
        let data = written.band(band).unwrap();
        for (i, a) in alpha.values.iter().enumerate() {
            assert!((0.0..=255.0).contains(&data[i]));
            if *a == 0.0 {
                assert_eq!(data[i], 255.0, "band {band} pixel {i} not filled");
            }
        }
    }
}

#[test]
fn test_crop_outside_raster_writes_nothing() {
    let ortho = create_orthophoto();
    let codec = MemoryCodec::new();
    let opts = ExportOptions {
        crop: Some("POLYGON((100 10, 101 10, 101 11, 100 11, 100 10))".to_string()),
        ..options(ExportFormat::Gtiff)
    };

    let result = Exporter::new(codec.clone()).export(&ortho, &output_path("crop.tif"), &opts);
    assert!(matches!(result, Err(ExportError::Geometry(_))), "{result:?}");
    assert_eq!(codec.output_count(), 0);
}

#[test]
fn test_crop_inside_raster_limits_window() {
    let ortho = create_orthophoto();
    let codec = MemoryCodec::new();
    let output = output_path("crop.tif");
    // Covers columns 1..3 and rows 1..3 of the 4x3 grid.
    let opts = ExportOptions {
        crop: Some(
            "POLYGON((10.012 49.988, 10.028 49.988, 10.028 49.972, 10.012 49.972, 10.012 49.988))"
                .to_string(),
        ),
        ..options(ExportFormat::Gtiff)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&ortho, &output, &opts)
        .unwrap();
    assert_eq!((outcome.profile.width, outcome.profile.height), (2, 2));
    let transform = outcome.profile.transform;
    assert!((transform.origin_x - 10.01).abs() < 1e-9);
    assert!((transform.origin_y - 49.99).abs() < 1e-9);

    let written = codec.output(&output).unwrap();
    let red = full_band(&ortho, 1);
    assert_eq!(
        written.band(1).unwrap(),
        &[red.get(1, 1), red.get(1, 2), red.get(2, 1), red.get(2, 2)]
    );
}

#[test]
fn test_lossless_geotiff_round_trip() {
    let dsm = create_dsm();
    let codec = MemoryCodec::new();
    let output = output_path("copy.tif");

    let outcome = Exporter::new(codec.clone())
        .export(&dsm, &output, &options(ExportFormat::Gtiff))
        .unwrap();
    assert_eq!(outcome.profile.data_type, DataType::Float32);
    assert_eq!(outcome.profile.nodata, Some(NODATA));

    let written = codec.output(&output).unwrap();
    assert_eq!(written.metadata().transform, dsm.metadata().transform);
    assert_eq!(written.metadata().crs, dsm.metadata().crs);
    assert_eq!(written.metadata().color_interp, vec![ColorInterp::Gray]);
    assert_eq!(written.band(1), dsm.band(1));
}

#[test]
fn test_matching_epsg_skips_reprojection() {
    let dsm = create_dsm();
    let codec = MemoryCodec::new();
    let output = output_path("same_crs.tif");
    let opts = ExportOptions {
        epsg: Some(32633),
        ..options(ExportFormat::Gtiff)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&dsm, &output, &opts)
        .unwrap();
    assert_eq!(outcome.profile.transform, dsm.metadata().transform);
    assert_eq!((outcome.profile.width, outcome.profile.height), (6, 6));
    assert_eq!(codec.output(&output).unwrap().band(1), dsm.band(1));
}

#[test]
fn test_reprojects_to_requested_epsg() {
    let ortho = create_orthophoto();
    let codec = MemoryCodec::new();
    let output = output_path("mercator.tif");
    let opts = ExportOptions {
        epsg: Some(3857),
        ..options(ExportFormat::Gtiff)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&ortho, &output, &opts)
        .unwrap();
    let profile = &outcome.profile;
    assert_eq!(profile.crs, Some(Crs::from_epsg(3857)));
    assert!(profile.width >= 1 && profile.height >= 1);
    // Web mercator easting of 10 degrees east.
    assert!((profile.transform.origin_x - 1_113_194.9).abs() < 1.0);
    assert!(profile.transform.pixel_height < 0.0);

    let written = codec.output(&output).unwrap();
    assert_eq!(written.metadata().band_count(), 4);
    assert_eq!(written.band(1).unwrap().len(), profile.width * profile.height);
}

const EARTH_RADIUS: f64 = 6_378_137.0;

fn mercator(lon: f64, lat: f64) -> (f64, f64) {
    let y = (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (EARTH_RADIUS * lon.to_radians(), EARTH_RADIUS * y)
}

fn inverse_mercator(x: f64, y: f64) -> (f64, f64) {
    let lat = 2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2;
    ((x / EARTH_RADIUS).to_degrees(), lat.to_degrees())
}

/// Every opaque output pixel must come from a pixel of the source window
/// `cols` x `rows` whose alpha is set.
fn assert_opaque_pixels_map_to_valid_source(
    written: &MemRaster,
    ortho: &MemRaster,
    cols: (f64, f64),
    rows: (f64, f64),
) -> usize {
    let meta = written.metadata();
    let source = ortho.metadata();
    let source_alpha = full_band(ortho, 4);
    let alpha = written.band(4).unwrap();
    let eps = 1e-6;
    let mut opaque = 0;

    for row in 0..meta.height {
        for col in 0..meta.width {
            if alpha[row * meta.width + col] == 0.0 {
                continue;
            }
            opaque += 1;
            let (x, y) = meta.transform.apply(col as f64 + 0.5, row as f64 + 0.5);
            let (lon, lat) = inverse_mercator(x, y);
            let src_col = (lon - source.transform.origin_x) / source.transform.pixel_width;
            let src_row = (lat - source.transform.origin_y) / source.transform.pixel_height;
            assert!(
                src_col >= cols.0 - eps && src_col <= cols.1 + eps,
                "pixel ({row}, {col}) maps to source column {src_col}"
            );
            assert!(
                src_row >= rows.0 - eps && src_row <= rows.1 + eps,
                "pixel ({row}, {col}) maps to source row {src_row}"
            );
            let c = (src_col.floor().max(0.0) as usize).min(source.width - 1);
            let r = (src_row.floor().max(0.0) as usize).min(source.height - 1);
            assert_ne!(source_alpha.get(r, c), 0.0, "pixel ({row}, {col}) is transparent in source");
        }
    }
    opaque
}

#[test]
fn test_cropped_reprojection_uses_crop_bounds() {
    let ortho = create_orthophoto();
    let codec = MemoryCodec::new();
    let output = output_path("crop_mercator.tif");
    // Crop window covers columns 1..3 and rows 1..3.
    let opts = ExportOptions {
        epsg: Some(3857),
        crop: Some(
            "POLYGON((10.012 49.988, 10.028 49.988, 10.028 49.972, 10.012 49.972, 10.012 49.988))"
                .to_string(),
        ),
        ..options(ExportFormat::GtiffRgb)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&ortho, &output, &opts)
        .unwrap();
    let profile = &outcome.profile;
    assert_eq!(profile.crs, Some(Crs::from_epsg(3857)));
    assert_eq!(profile.band_count, 4);

    let (min_x, max_y) = mercator(10.01, 49.99);
    let (max_x, min_y) = mercator(10.03, 49.97);
    assert!((profile.transform.origin_x - min_x).abs() < 0.01);
    assert!((profile.transform.origin_y - max_y).abs() < 0.01);

    let resolution = ((max_x - min_x).powi(2) + (max_y - min_y).powi(2)).sqrt() / 8f64.sqrt();
    assert!((profile.transform.pixel_width - resolution).abs() < 1e-3);
    assert!((profile.width as f64 - (max_x - min_x) / resolution).abs() <= 0.5 + 1e-6);
    assert!((profile.height as f64 - (max_y - min_y) / resolution).abs() <= 0.5 + 1e-6);

    let written = codec.output(&output).unwrap();
    assert_eq!(
        written.metadata().color_interp,
        vec![
            ColorInterp::Red,
            ColorInterp::Green,
            ColorInterp::Blue,
            ColorInterp::Alpha
        ]
    );
    let opaque = assert_opaque_pixels_map_to_valid_source(&written, &ortho, (1.0, 3.0), (1.0, 3.0));
    assert!(opaque > 0);
}

#[test]
fn test_reprojection_keeps_source_transparency() {
    let ortho = create_orthophoto();
    let codec = MemoryCodec::new();
    let output = output_path("ortho_mercator.tif");
    let opts = ExportOptions {
        epsg: Some(3857),
        ..options(ExportFormat::GtiffRgb)
    };

    Exporter::new(codec.clone())
        .export(&ortho, &output, &opts)
        .unwrap();

    let written = codec.output(&output).unwrap();
    // Row 0 of the source is transparent, so opaque pixels come from rows 1..3.
    let opaque = assert_opaque_pixels_map_to_valid_source(&written, &ortho, (0.0, 4.0), (1.0, 3.0));
    assert!(opaque > 0);
    let alpha = written.band(4).unwrap();
    assert!(alpha.iter().any(|a| *a == 0.0));
}

#[test]
fn test_expression_masks_alpha_and_overflow() {
    let meta = metadata(
        3,
        1,
        vec![ColorInterp::Gray, ColorInterp::Gray, ColorInterp::Alpha],
        Crs::from_epsg(32633),
        GeoTransform::north_up(0.0, 0.0, 1.0, -1.0),
        None,
        DataType::Float32,
    );
    let raster = MemRaster::new(
        meta,
        vec![
            vec![1.0, 2.0, 1e30],
            vec![3.0, 4.0, 1e30],
            vec![255.0, 0.0, 255.0],
        ],
    )
    .unwrap();
    let codec = MemoryCodec::new();
    let output = output_path("sum.tif");
    let opts = ExportOptions {
        expression: Some("b1+b2".to_string()),
        ..options(ExportFormat::Gtiff)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&raster, &output, &opts)
        .unwrap();
    assert_eq!(outcome.profile.band_count, 1);
    assert_eq!(outcome.profile.data_type, DataType::Float32);
    assert_eq!(outcome.profile.nodata, Some(NODATA));

    let written = codec.output(&output).unwrap();
    assert_eq!(written.band(1).unwrap(), &[4.0, NODATA, NODATA]);
}

#[test]
fn test_expression_with_colormap_renders_rgba() {
    let dsm = create_dsm();
    let codec = MemoryCodec::new();
    let output = output_path("ramp.png");
    let opts = ExportOptions {
        expression: Some("b1*2".to_string()),
        color_map: Some("rdylgn".to_string()),
        rescale: Some([20.0, 50.0]),
        ..options(ExportFormat::Png)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&dsm, &output, &opts)
        .unwrap();
    assert_eq!(outcome.profile.band_count, 4);
    let written = codec.output(&output).unwrap();
    assert_eq!(written.metadata().color_interp[3], ColorInterp::Alpha);
    assert_eq!(written.band(4).unwrap()[0], 0.0);
    assert_eq!(written.band(4).unwrap()[1], 255.0);
}

#[test]
fn test_expression_referencing_missing_band_fails() {
    let dsm = create_dsm();
    let codec = MemoryCodec::new();
    let opts = ExportOptions {
        expression: Some("b1-b3".to_string()),
        ..options(ExportFormat::Gtiff)
    };

    let result = Exporter::new(codec.clone()).export(&dsm, &output_path("bad.tif"), &opts);
    assert!(matches!(result, Err(ExportError::Expression { .. })), "{result:?}");
    assert_eq!(codec.output_count(), 0);
}

#[test]
fn test_unknown_colormap_is_not_fatal() {
    let dsm = create_dsm();
    let codec = MemoryCodec::new();
    let output = output_path("plain.png");
    let opts = ExportOptions {
        asset_type: AssetType::Dsm,
        color_map: Some("no-such-ramp".to_string()),
        ..options(ExportFormat::Png)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&dsm, &output, &opts)
        .unwrap();
    assert_eq!(outcome.profile.band_count, 2);

    let written = codec.output(&output).unwrap();
    assert_eq!(
        written.metadata().color_interp,
        vec![ColorInterp::Gray, ColorInterp::Alpha]
    );
    let alpha = written.band(2).unwrap();
    assert_eq!(alpha[0], 0.0, "nodata pixel must be transparent");
    assert!(alpha[1..].iter().all(|a| *a == 255.0));
}

#[test]
fn test_elevation_geotiff_has_no_alpha() {
    let dsm = create_dsm();
    let codec = MemoryCodec::new();
    let output = output_path("dsm.tif");
    let opts = ExportOptions {
        asset_type: AssetType::Dsm,
        ..options(ExportFormat::Gtiff)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&dsm, &output, &opts)
        .unwrap();
    assert_eq!(outcome.profile.band_count, 1);
    let written = codec.output(&output).unwrap();
    assert_eq!(written.metadata().color_interp, vec![ColorInterp::Gray]);
    assert_eq!(written.band(1), dsm.band(1));
}

#[test]
fn test_raw_expression_png_keeps_alpha() {
    let dsm = create_dsm();
    let codec = MemoryCodec::new();
    let output = output_path("bands.png");
    let opts = ExportOptions {
        expression: Some("b1, b1*2, b1*3".to_string()),
        rescale: Some([0.0, 100.0]),
        ..options(ExportFormat::Png)
    };

    let outcome = Exporter::new(codec.clone())
        .export(&dsm, &output, &opts)
        .unwrap();
    assert_eq!(outcome.profile.band_count, 4);

    let written = codec.output(&output).unwrap();
    assert_eq!(
        written.metadata().color_interp,
        vec![
            ColorInterp::Red,
            ColorInterp::Green,
            ColorInterp::Blue,
            ColorInterp::Alpha
        ]
    );
    let alpha = written.band(4).unwrap();
    assert_eq!(alpha[0], 0.0);
    assert_eq!(alpha[1], 255.0);
}

#[derive(Clone, Default)]
struct RecordingPackager {
    calls: Arc<Mutex<Vec<(PathBuf, PathBuf, String)>>>,
    fail: bool,
}

impl Packager for RecordingPackager {
    fn package(&self, input: &Path, output: &Path, name: &str) -> raster_export::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((input.to_path_buf(), output.to_path_buf(), name.to_string()));
        if self.fail {
            return Err(ExportError::Packaging {
                status: "exit status: 1".to_string(),
                output: "ERROR 4: cannot open input".to_string(),
            });
        }
        Ok(())
    }
}

#[test]
fn test_kmz_packages_rendered_intermediate() {
    let ortho = create_orthophoto();
    let codec = MemoryCodec::new();
    let packager = RecordingPackager::default();
    let output = output_path("overlay.kmz");
    let opts = ExportOptions {
        name: "Survey".to_string(),
        ..options(ExportFormat::Kmz)
    };

    let outcome = Exporter::new(codec.clone())
        .with_packager(packager.clone())
        .export(&ortho, &output, &opts)
        .unwrap();

    let intermediate = output_path("overlay.kmz.tif");
    assert_eq!(outcome.output, output);
    assert_eq!(outcome.intermediate.as_deref(), Some(intermediate.as_path()));
    assert_eq!(outcome.profile.band_count, 4);
    assert!(codec.output(&intermediate).is_some());
    assert!(codec.output(&output).is_none());

    let calls = packager.calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![(intermediate.clone(), output.clone(), "Survey".to_string())]
    );
}

#[test]
fn test_kmz_packaging_failure_is_reported() {
    let ortho = create_orthophoto();
    let codec = MemoryCodec::new();
    let packager = RecordingPackager {
        fail: true,
        ..RecordingPackager::default()
    };

    let result = Exporter::new(codec.clone())
        .with_packager(packager)
        .export(&ortho, &output_path("broken.kmz"), &options(ExportFormat::Kmz));
    match result {
        Err(ExportError::Packaging { status, output }) => {
            assert_eq!(status, "exit status: 1");
            assert!(output.contains("cannot open input"));
        }
        other => panic!("expected packaging error, got {other:?}"),
    }
}
