//! Nearest-neighbour resampling of window bands into another coordinate system.

use rayon::prelude::*;

use crate::error::{ExportError, Result};
use crate::model::{BandArray, Bounds, Crs, GeoTransform};
use crate::projection::{self, CoordinateTransform};

/// Samples taken along each edge of the source extent.
const EDGE_SAMPLES: usize = 21;

/// Worker threads used to resample bands.
pub const RESAMPLE_THREADS: usize = 4;

/// Output grid in the target reference system.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationGrid {
    pub crs: Crs,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

impl DestinationGrid {
    /// Grid covering a `width` x `height` window at `transform`, reprojected
    /// through `to_target`.
    ///
    /// The extent comes from densified window edges; the square pixel size keeps
    /// the number of pixels along the diagonal of the window.
    pub fn compute(
        target: &Crs,
        transform: &GeoTransform,
        width: usize,
        height: usize,
        to_target: &dyn CoordinateTransform,
    ) -> Result<Self> {
        let (w, h) = (width as f64, height as f64);
        let step = |i: usize| i as f64 / (EDGE_SAMPLES - 1) as f64;

        let mut edge = Vec::with_capacity(EDGE_SAMPLES * 4);
        for i in 0..EDGE_SAMPLES {
            let t = step(i);
            edge.push((t * w, 0.0));
            edge.push((t * w, h));
            edge.push((0.0, t * h));
            edge.push((w, t * h));
        }

        let projected = edge.into_iter().filter_map(|(col, row)| {
            let (x, y) = transform.apply(col, row);
            to_target.transform(x, y).ok()
        });
        let bounds = Bounds::enclosing(projected);
        if bounds.is_empty() {
            return Err(ExportError::Projection(format!(
                "window extent has no valid footprint in {target}"
            )));
        }

        let source_diagonal = (w * w + h * h).sqrt();
        let target_diagonal = (bounds.width().powi(2) + bounds.height().powi(2)).sqrt();
        let resolution = target_diagonal / source_diagonal;

        let grid = DestinationGrid {
            crs: target.clone(),
            transform: GeoTransform::north_up(bounds.min_x, bounds.max_y, resolution, -resolution),
            width: ((bounds.width() / resolution + 0.5) as usize).max(1),
            height: ((bounds.height() / resolution + 0.5) as usize).max(1),
        };
        tracing::info!(
            "Reprojecting to {}: {}x{} pixels at {}",
            grid.crs,
            grid.width,
            grid.height,
            resolution
        );
        Ok(grid)
    }
}

/// Resamples bands from a source window grid into a [`DestinationGrid`].
///
/// The source pixel of every destination pixel is resolved once, so writing
/// each band is a parallel gather.
pub struct Reprojector {
    grid: DestinationGrid,
    source_shape: (usize, usize),
    lookup: Vec<Option<usize>>,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reprojector")
            .field("grid", &self.grid)
            .field("source_shape", &self.source_shape)
            .finish()
    }
}

fn create_thread_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| ExportError::Write(format!("Failed to create resampling pool: {e}")))
}

impl Reprojector {
    pub fn new(
        source_crs: &Crs,
        source_transform: &GeoTransform,
        source_width: usize,
        source_height: usize,
        grid: DestinationGrid,
    ) -> Result<Self> {
        let to_source = projection::transformer(&grid.crs, source_crs)?;
        let inverse = source_transform.invert().ok_or_else(|| {
            ExportError::Projection("source transform is not invertible".to_string())
        })?;
        let pool = create_thread_pool(RESAMPLE_THREADS)?;

        let mut lookup = vec![None; grid.width * grid.height];
        let to_source = to_source.as_ref();
        pool.install(|| {
            lookup
                .par_chunks_mut(grid.width)
                .enumerate()
                .for_each(|(row, cells)| {
                    for (col, cell) in cells.iter_mut().enumerate() {
                        let (x, y) = grid.transform.apply(col as f64 + 0.5, row as f64 + 0.5);
                        *cell = to_source.transform(x, y).ok().and_then(|(sx, sy)| {
                            let (c, r) = inverse.apply(sx, sy);
                            let in_bounds = c >= 0.0
                                && r >= 0.0
                                && c < source_width as f64
                                && r < source_height as f64;
                            in_bounds.then(|| r as usize * source_width + c as usize)
                        });
                    }
                });
        });

        Ok(Self {
            grid,
            source_shape: (source_height, source_width),
            lookup,
            pool,
        })
    }

    /// Source shape as (rows, cols).
    pub fn source_shape(&self) -> (usize, usize) {
        self.source_shape
    }

    /// Resampled copy of `band`; destination pixels outside the source get `fill`.
    pub fn reproject(&self, band: &BandArray, fill: f64) -> BandArray {
        assert_eq!(
            band.shape(),
            self.source_shape,
            "band does not match the reprojection source grid"
        );
        let values = self.pool.install(|| {
            self.lookup
                .par_iter()
                .map(|cell| cell.map_or(fill, |idx| band.values[idx]))
                .collect()
        });
        BandArray::new(self.grid.height, self.grid.width, values)
    }
}
