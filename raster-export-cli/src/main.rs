use anyhow::{Context, Result};
use clap::Parser;
use raster_export::{export_raster, AssetType, ExportFormat, ExportOptions};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input raster (any GDAL-readable file)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Output format: gtiff, gtiff-rgb, jpg, png or kmz
    #[arg(short, long)]
    format: Option<ExportFormat>,

    /// Reproject to this EPSG code
    #[arg(long)]
    epsg: Option<u16>,

    /// Band math such as "(b2-b1)/(b2+b1)"
    #[arg(short, long)]
    expression: Option<String>,

    /// Value range mapped onto 0-255, as LO,HI
    #[arg(long, value_name = "LO,HI", value_parser = parse_rescale, allow_hyphen_values = true)]
    rescale: Option<[f64; 2]>,

    /// Color ramp name
    #[arg(short = 'c', long)]
    color_map: Option<String>,

    /// Hillshade vertical exaggeration (elevation assets only)
    #[arg(long)]
    hillshade: Option<f64>,

    /// Asset type: generic, orthophoto, dsm or dtm
    #[arg(short, long)]
    asset_type: Option<AssetType>,

    /// Crop polygon as WKT in EPSG:4326
    #[arg(long, value_name = "WKT")]
    crop: Option<String>,

    /// Overlay name for kmz output
    #[arg(long)]
    name: Option<String>,

    /// JSON file with export options; flags override its values
    #[arg(long, value_name = "FILE")]
    options: Option<PathBuf>,
}

fn parse_rescale(value: &str) -> Result<[f64; 2], String> {
    let (lo, hi) = value
        .split_once(',')
        .ok_or_else(|| format!("expected LO,HI, got '{value}'"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid bound '{s}': {e}"))
    };
    Ok([parse(lo)?, parse(hi)?])
}

impl Args {
    fn export_options(&self) -> Result<ExportOptions> {
        let mut options = match &self.options {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read options file {}", path.display()))?;
                ExportOptions::from_json(&json)
                    .with_context(|| format!("Invalid options file {}", path.display()))?
            }
            None => ExportOptions::default(),
        };

        if let Some(format) = self.format {
            options.format = format;
        }
        if let Some(asset_type) = self.asset_type {
            options.asset_type = asset_type;
        }
        if let Some(name) = &self.name {
            options.name = name.clone();
        }
        options.epsg = self.epsg.or(options.epsg);
        options.expression = self.expression.clone().or(options.expression);
        options.rescale = self.rescale.or(options.rescale);
        options.color_map = self.color_map.clone().or(options.color_map);
        options.hillshade = self.hillshade.or(options.hillshade);
        options.crop = self.crop.clone().or(options.crop);

        options.validate()?;
        Ok(options)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let start_time = std::time::Instant::now();

    let options = args.export_options()?;
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let outcome = export_raster(&args.input, &args.output, &options).with_context(|| {
        format!(
            "Failed to export {} to {}",
            args.input.display(),
            args.output.display()
        )
    })?;

    info!("Written {}: {:?}", outcome.profile.driver.name(), outcome.output);
    if let Some(intermediate) = &outcome.intermediate {
        info!("Intermediate raster kept at {:?}", intermediate);
    }

    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    Ok(())
}
