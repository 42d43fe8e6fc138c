//! Coordinate transforms between reference systems.

use proj4rs::Proj;
use proj4rs::transform::transform;

use crate::error::{ExportError, Result};
use crate::model::Crs;

/// Point transform from one reference system into another, in degrees for
/// geographic systems.
pub trait CoordinateTransform: Send + Sync {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)>;

    fn transform_points(&self, points: &mut [(f64, f64)]) -> Result<()> {
        for point in points.iter_mut() {
            *point = self.transform(point.0, point.1)?;
        }
        Ok(())
    }
}

/// Transform between two equivalent systems.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl CoordinateTransform for Identity {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        Ok((x, y))
    }
}

/// Pure-Rust transform backed by proj4rs.
pub struct ProjTransformer {
    source: Proj,
    target: Proj,
    source_crs: Crs,
    target_crs: Crs,
}

fn proj_for(crs: &Crs) -> Result<Proj> {
    let proj = match (crs.epsg, &crs.proj4) {
        (Some(code), _) => Proj::from_epsg_code(code),
        (None, Some(definition)) => Proj::from_proj_string(definition),
        (None, None) => {
            return Err(ExportError::Projection(
                "coordinate system has neither an EPSG code nor a PROJ definition".to_string(),
            ))
        }
    };
    proj.map_err(|e| ExportError::Projection(format!("{crs}: {e}")))
}

impl ProjTransformer {
    pub fn new(source: &Crs, target: &Crs) -> Result<Self> {
        Ok(Self {
            source: proj_for(source)?,
            target: proj_for(target)?,
            source_crs: source.clone(),
            target_crs: target.clone(),
        })
    }
}

impl CoordinateTransform for ProjTransformer {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let mut point = if self.source.is_latlong() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(&self.source, &self.target, &mut point).map_err(|e| {
            ExportError::Projection(format!(
                "({x}, {y}) from {} to {}: {e}",
                self.source_crs, self.target_crs
            ))
        })?;

        if self.target.is_latlong() {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

/// Transform from `source` to `target`, skipping proj entirely when both
/// describe the same system.
pub fn transformer(source: &Crs, target: &Crs) -> Result<Box<dyn CoordinateTransform>> {
    if source.is_equivalent(target) {
        return Ok(Box::new(Identity));
    }
    Ok(Box::new(ProjTransformer::new(source, target)?))
}
