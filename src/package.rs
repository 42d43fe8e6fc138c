//! Wrapping a rendered raster into a KML super-overlay.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{ExportError, Result};

/// Turns an intermediate raster into a packaged overlay.
pub trait Packager {
    fn package(&self, input: &Path, output: &Path, name: &str) -> Result<()>;
}

/// Path of the raster rendered before packaging: `<output stem>.kmz.tif` next
/// to the output.
pub fn intermediate_path(output: &Path) -> PathBuf {
    output.with_extension("kmz.tif")
}

/// Runs `gdal_translate -of KMLSUPEROVERLAY`.
#[derive(Debug, Clone)]
pub struct GdalTranslatePackager {
    program: PathBuf,
}

impl Default for GdalTranslatePackager {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gdal_translate"),
        }
    }
}

impl GdalTranslatePackager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific executable instead of `gdal_translate` from `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn arguments(input: &Path, output: &Path, name: &str) -> Vec<String> {
        vec![
            "-of".to_string(),
            "KMLSUPEROVERLAY".to_string(),
            "-co".to_string(),
            format!("Name={name}"),
            "-co".to_string(),
            "FORMAT=AUTO".to_string(),
            input.display().to_string(),
            output.display().to_string(),
        ]
    }
}

impl Packager for GdalTranslatePackager {
    fn package(&self, input: &Path, output: &Path, name: &str) -> Result<()> {
        let args = Self::arguments(input, output, name);
        tracing::info!("Running {} {}", self.program.display(), args.join(" "));

        let result = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| ExportError::Packaging {
                status: "not started".to_string(),
                output: format!("{}: {}", self.program.display(), e),
            })?;

        if !result.status.success() {
            let mut diagnostics = String::from_utf8_lossy(&result.stderr).into_owned();
            diagnostics.push_str(&String::from_utf8_lossy(&result.stdout));
            return Err(ExportError::Packaging {
                status: result.status.to_string(),
                output: diagnostics.trim().to_string(),
            });
        }
        Ok(())
    }
}
