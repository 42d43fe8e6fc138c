//! Strongly typed export options.

use std::str::FromStr;

use serde::Deserialize;

use crate::error::{ExportError, Result};
use crate::expression::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    /// Lossless GeoTIFF carrying the source values.
    #[default]
    Gtiff,
    /// JPEG-compressed RGBA GeoTIFF.
    GtiffRgb,
    Jpg,
    Png,
    /// KML super-overlay packaged from a `GtiffRgb` rendering.
    Kmz,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Gtiff | ExportFormat::GtiffRgb => "tif",
            ExportFormat::Jpg => "jpg",
            ExportFormat::Png => "png",
            ExportFormat::Kmz => "kmz",
        }
    }

    pub fn is_visual(&self) -> bool {
        !matches!(self, ExportFormat::Gtiff)
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gtiff" => Ok(ExportFormat::Gtiff),
            "gtiff-rgb" => Ok(ExportFormat::GtiffRgb),
            "jpg" | "jpeg" => Ok(ExportFormat::Jpg),
            "png" => Ok(ExportFormat::Png),
            "kmz" => Ok(ExportFormat::Kmz),
            other => Err(ExportError::Options(format!("unknown export format '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    #[default]
    Generic,
    Orthophoto,
    Dsm,
    Dtm,
}

impl AssetType {
    pub fn is_elevation(&self) -> bool {
        matches!(self, AssetType::Dsm | AssetType::Dtm)
    }

    pub fn is_photographic(&self) -> bool {
        matches!(self, AssetType::Orthophoto)
    }
}

impl FromStr for AssetType {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(AssetType::Generic),
            "orthophoto" => Ok(AssetType::Orthophoto),
            "dsm" => Ok(AssetType::Dsm),
            "dtm" => Ok(AssetType::Dtm),
            other => Err(ExportError::Options(format!("unknown asset type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExportOptions {
    /// Target EPSG code; reprojection happens only when it differs from the source.
    pub epsg: Option<u16>,
    /// Band math, e.g. `(b4-b1)/(b4+b1)`; commas separate output bands.
    pub expression: Option<String>,
    pub format: ExportFormat,
    pub rescale: Option<[f64; 2]>,
    pub color_map: Option<String>,
    /// Vertical exaggeration for hillshading elevation assets.
    pub hillshade: Option<f64>,
    pub asset_type: AssetType,
    /// Crop polygon as WKT in EPSG:4326.
    pub crop: Option<String>,
    /// Display name of a packaged overlay.
    pub name: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            epsg: None,
            expression: None,
            format: ExportFormat::Gtiff,
            rescale: None,
            color_map: None,
            hillshade: None,
            asset_type: AssetType::Generic,
            crop: None,
            name: "raster".to_string(),
        }
    }
}

impl ExportOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        let options: ExportOptions =
            serde_json::from_str(json).map_err(|e| ExportError::Options(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn parsed_expression(&self) -> Result<Option<Expression>> {
        self.expression.as_deref().map(Expression::parse).transpose()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(factor) = self.hillshade {
            if !factor.is_finite() || factor < 0.0 {
                return Err(ExportError::Options(format!(
                    "hillshade exaggeration must be a non-negative number, got {factor}"
                )));
            }
        }
        if let Some([lo, hi]) = self.rescale {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(ExportError::Options(format!(
                    "rescale bounds must be finite, got [{lo}, {hi}]"
                )));
            }
        }
        self.parsed_expression()?;
        Ok(())
    }

    /// Hillshade factor when it is in effect for this asset.
    pub fn hillshade_factor(&self) -> Option<f64> {
        self.hillshade
            .filter(|factor| *factor > 0.0 && self.asset_type.is_elevation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let options = ExportOptions::from_json("{}").unwrap();
        assert_eq!(options, ExportOptions::default());
        assert_eq!(options.name, "raster");
        assert_eq!(options.format, ExportFormat::Gtiff);
    }

    #[test]
    fn test_full_json() {
        let options = ExportOptions::from_json(
            r#"{
                "epsg": 3857,
                "expression": "(b2-b1)/(b2+b1)",
                "format": "gtiff-rgb",
                "rescale": [-1, 1],
                "color_map": "rdylgn",
                "asset_type": "orthophoto",
                "crop": "POLYGON((0 0, 1 0, 1 1, 0 0))",
                "name": "field"
            }"#,
        )
        .unwrap();
        assert_eq!(options.epsg, Some(3857));
        assert_eq!(options.format, ExportFormat::GtiffRgb);
        assert_eq!(options.rescale, Some([-1.0, 1.0]));
        assert_eq!(options.asset_type, AssetType::Orthophoto);
        assert_eq!(options.name, "field");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = ExportOptions::from_json(r#"{"colormap": "viridis"}"#).unwrap_err();
        assert!(matches!(err, ExportError::Options(_)), "{err}");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ExportOptions::from_json(r#"{"hillshade": -1}"#).is_err());
        assert!(ExportOptions::from_json(r#"{"format": "bmp"}"#).is_err());
        assert!(matches!(
            ExportOptions::from_json(r#"{"expression": "b1 +"}"#),
            Err(ExportError::Expression { .. })
        ));
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!("gtiff-rgb".parse::<ExportFormat>().unwrap(), ExportFormat::GtiffRgb);
        assert_eq!(ExportFormat::GtiffRgb.extension(), "tif");
        assert_eq!(ExportFormat::Kmz.extension(), "kmz");
        assert!(!ExportFormat::Gtiff.is_visual());
        assert!(ExportFormat::Kmz.is_visual());
    }

    #[test]
    fn test_hillshade_only_for_elevation() {
        let mut options = ExportOptions {
            hillshade: Some(2.0),
            asset_type: AssetType::Orthophoto,
            ..Default::default()
        };
        assert_eq!(options.hillshade_factor(), None);
        options.asset_type = AssetType::Dsm;
        assert_eq!(options.hillshade_factor(), Some(2.0));
        options.hillshade = Some(0.0);
        assert_eq!(options.hillshade_factor(), None);
    }
}
