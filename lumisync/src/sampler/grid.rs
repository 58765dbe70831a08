//! Cell-level aggregates.
//!
//! An accelerated capture path reduces the frame to one [`CellAggregate`]
//! per `cell_size`-square block and hands back the raw buffer. The same
//! reduction is available on the CPU through [`CellGrid::from_frame`].
//!
//! Cells only carry a weight sum and a count, so zone saliency statistics
//! are rebuilt from each cell's mean saliency. Variance is therefore
//! measured between cells rather than between pixels and comes out lower
//! than the pixel backend's for the same frame.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::frame::FrameView;
use crate::geometry::ZoneGeometry;
use crate::sampler::score::{saliency, SALIENCY_FLOOR};
use crate::sampler::{Accumulator, SaliencySampler};

/// Per-cell reduction, laid out as the accelerated path writes it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CellAggregate {
    pub color_sum: [f32; 3],
    pub weight: f32,
    pub peak_color: [f32; 3],
    pub peak_weight: f32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellGrid {
    width: u32,
    height: u32,
    cell_size: u32,
    columns: u32,
    rows: u32,
    cells: Vec<CellAggregate>,
}

impl CellGrid {
    /// Wraps cells for a `width` x `height` capture, row-major.
    pub fn new(width: u32, height: u32, cell_size: u32, cells: Vec<CellAggregate>) -> Result<Self> {
        if width == 0 || height == 0 || cell_size == 0 {
            return Err(Error::InvalidFrame(format!(
                "cell grid {}x{} with cell size {}",
                width, height, cell_size
            )));
        }

        let columns = width.div_ceil(cell_size);
        let rows = height.div_ceil(cell_size);
        let expected = columns as usize * rows as usize;
        if cells.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "cell grid holds {} cells, {}x{} needs {}",
                cells.len(),
                columns,
                rows,
                expected
            )));
        }

        Ok(Self {
            width,
            height,
            cell_size,
            columns,
            rows,
            cells,
        })
    }

    /// Reads a raw readback buffer. Alignment of `bytes` does not matter.
    pub fn from_bytes(width: u32, height: u32, cell_size: u32, bytes: &[u8]) -> Result<Self> {
        let stride = size_of::<CellAggregate>();
        if bytes.len() % stride != 0 {
            return Err(Error::InvalidFrame(format!(
                "cell buffer of {} bytes is not a multiple of {}",
                bytes.len(),
                stride
            )));
        }

        let cells = bytes
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned::<CellAggregate>)
            .collect();
        Self::new(width, height, cell_size, cells)
    }

    /// CPU reduction of a frame, sampling every `step`-th pixel of each cell.
    pub fn from_frame(frame: &FrameView<'_>, cell_size: u32, step: u32) -> Self {
        let cell_size = cell_size.max(1);
        let step = step.max(1) as usize;
        let width = frame.width();
        let height = frame.height();
        let columns = width.div_ceil(cell_size);
        let rows = height.div_ceil(cell_size);
        if columns == 0 || rows == 0 {
            return Self {
                width,
                height,
                cell_size,
                columns,
                rows,
                cells: Vec::new(),
            };
        }

        let mut cells = vec![CellAggregate::default(); columns as usize * rows as usize];
        cells
            .par_chunks_mut(columns as usize)
            .enumerate()
            .for_each(|(row, cells)| {
                let y0 = row as u32 * cell_size;
                let y1 = (y0 + cell_size).min(height);
                for (column, cell) in cells.iter_mut().enumerate() {
                    let x0 = column as u32 * cell_size;
                    let x1 = (x0 + cell_size).min(width);
                    reduce_cell(frame, x0..x1, y0..y1, step, cell);
                }
            });

        Self {
            width,
            height,
            cell_size,
            columns,
            rows,
            cells,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cells(&self) -> &[CellAggregate] {
        &self.cells
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.cells)
    }

    /// Center of cell `(column, row)`, clipped to the capture area.
    fn cell_center(&self, column: u32, row: u32) -> (f32, f32) {
        let x0 = column * self.cell_size;
        let y0 = row * self.cell_size;
        let x1 = (x0 + self.cell_size).min(self.width);
        let y1 = (y0 + self.cell_size).min(self.height);
        ((x0 + x1) as f32 * 0.5, (y0 + y1) as f32 * 0.5)
    }
}

fn reduce_cell(
    frame: &FrameView<'_>,
    xs: std::ops::Range<u32>,
    ys: std::ops::Range<u32>,
    step: usize,
    cell: &mut CellAggregate,
) {
    let mut color_sum = Vec3::ZERO;
    let mut peak_color = Vec3::ZERO;
    for y in ys.step_by(step) {
        for x in xs.clone().step_by(step) {
            let color = frame.pixel(x, y);
            let s = saliency(color);
            let weight = SALIENCY_FLOOR + s;
            color_sum += color * weight;
            cell.weight += weight;
            cell.count += 1;
            if s > cell.peak_weight {
                cell.peak_weight = s;
                peak_color = color;
            }
        }
    }
    cell.color_sum = color_sum.to_array();
    cell.peak_color = peak_color.to_array();
}

/// Bins cell aggregates into zones by cell-center angle.
#[derive(Debug, Clone)]
pub struct GridSampler {
    cell_size: u32,
    step: u32,
    radial_weight: f32,
}

impl GridSampler {
    pub fn new(cell_size: u32, step: u32, radial_weight: f32) -> Self {
        Self {
            cell_size: cell_size.max(1),
            step: step.max(1),
            radial_weight: radial_weight.max(0.0),
        }
    }

    /// Accumulates an already reduced grid. Grids of a different size than
    /// the geometry are scaled onto it.
    pub fn accumulate_cells(
        grid: &CellGrid,
        geometry: &ZoneGeometry,
        radial_weight: f32,
        out: &mut [Accumulator],
    ) {
        let zones = geometry.total_zones().min(out.len());
        if zones == 0 {
            return;
        }

        let scale_x = geometry.width() as f32 / grid.width as f32;
        let scale_y = geometry.height() as f32 / grid.height as f32;

        for row in 0..grid.rows {
            for column in 0..grid.columns {
                let cell = &grid.cells[(row * grid.columns + column) as usize];
                if cell.count == 0 || cell.weight <= 0.0 || !cell.weight.is_finite() {
                    continue;
                }

                let (cx, cy) = grid.cell_center(column, row);
                let (x, y) = (cx * scale_x, cy * scale_y);
                let Some(zone) = geometry.zone_at_point(x, y) else {
                    continue;
                };
                if zone >= zones {
                    continue;
                }

                let factor = 1.0 + radial_weight * geometry.radial_factor(x, y);
                let count = cell.count as f32;
                let mean_saliency = (cell.weight / count - SALIENCY_FLOOR).max(0.0);

                let acc = &mut out[zone];
                acc.color_sum += Vec3::from_array(cell.color_sum) * factor;
                acc.total_weight += cell.weight * factor;
                acc.saliency_sum += mean_saliency * count;
                acc.saliency_sq_sum += mean_saliency * mean_saliency * count;
                acc.sample_count += cell.count;
                if cell.peak_weight > acc.peak_weight {
                    acc.peak_weight = cell.peak_weight;
                    acc.peak_color = Vec3::from_array(cell.peak_color);
                }
            }
        }
    }
}

impl SaliencySampler for GridSampler {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn sample(&mut self, frame: &FrameView<'_>, geometry: &ZoneGeometry, out: &mut [Accumulator]) {
        let grid = CellGrid::from_frame(frame, self.cell_size, self.step);
        Self::accumulate_cells(&grid, geometry, self.radial_weight, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb8;
    use crate::frame::{Frame, PixelFormat};
    use crate::geometry::ZoneConfig;

    #[test]
    fn grid_dimensions_round_up() {
        let frame = Frame::solid(20, 10, PixelFormat::Rgb8, Rgb8::WHITE);
        let grid = CellGrid::from_frame(&frame.view(), 8, 1);
        assert_eq!((grid.columns(), grid.rows()), (3, 2));
        // the last column is 4 pixels wide
        assert_eq!(grid.cells()[2].count, 4 * 8);
        assert_eq!(grid.cells()[5].count, 4 * 2);
    }

    #[test]
    fn empty_frame_gives_empty_grid() {
        for (width, height) in [(0, 36), (64, 0), (0, 0)] {
            let frame = Frame::solid(width, height, PixelFormat::Rgb8, Rgb8::WHITE);
            let grid = CellGrid::from_frame(&frame.view(), 8, 1);
            assert_eq!(grid.columns() * grid.rows(), 0);
            assert!(grid.cells().is_empty());
        }
    }

    #[test]
    fn rejects_mismatched_cell_count() {
        let cells = vec![CellAggregate::default(); 5];
        assert!(matches!(
            CellGrid::new(20, 10, 8, cells),
            Err(Error::InvalidFrame(_))
        ));
        assert!(CellGrid::new(0, 10, 8, Vec::new()).is_err());
    }

    #[test]
    fn raw_buffer_reads_back() {
        let frame = Frame::from_fn(32, 16, PixelFormat::Bgra8, |x, y| {
            Rgb8::new(x as u8 * 8, y as u8 * 16, 40)
        });
        let grid = CellGrid::from_frame(&frame.view(), 8, 2);

        // offset by one byte so the slice is not aligned for f32
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(grid.as_bytes());
        let read = CellGrid::from_bytes(32, 16, 8, &bytes[1..]).unwrap();
        assert_eq!(read, grid);

        assert!(CellGrid::from_bytes(32, 16, 8, &bytes[..7]).is_err());
    }

    #[test]
    fn smaller_grid_is_scaled_onto_geometry() {
        let zones = ZoneConfig::new(2, 4, 2, 0);
        let geometry = ZoneGeometry::new(zones, 0.5, 256, 144);
        let frame = Frame::from_fn(64, 36, PixelFormat::Rgb8, |x, _| {
            if x < 32 {
                Rgb8::new(255, 0, 0)
            } else {
                Rgb8::new(0, 0, 255)
            }
        });
        let grid = CellGrid::from_frame(&frame.view(), 4, 1);

        let mut out = vec![Accumulator::default(); zones.total()];
        GridSampler::accumulate_cells(&grid, &geometry, 0.35, &mut out);

        let left = out[0].average().unwrap();
        let right = out[zones.total() - 1].average().unwrap();
        assert!(left.x > 250.0 && left.z < 5.0);
        assert!(right.z > 250.0 && right.x < 5.0);
    }

    #[test]
    fn cell_saliency_is_approximated_from_mean() {
        let frame = Frame::solid(16, 16, PixelFormat::Rgb8, Rgb8::new(255, 0, 0));
        let geometry = ZoneGeometry::new(ZoneConfig::new(0, 1, 0, 0), 0.5, 16, 16);
        let grid = CellGrid::from_frame(&frame.view(), 8, 1);

        let mut out = vec![Accumulator::default(); 1];
        GridSampler::accumulate_cells(&grid, &geometry, 0.0, &mut out);

        let expected = saliency(Vec3::new(255.0, 0.0, 0.0));
        assert!((out[0].saliency_mean() - expected).abs() < 1e-4);
        assert!(out[0].saliency_variance() < 1e-4);
        assert_eq!(out[0].sample_count, 256);
    }
}
