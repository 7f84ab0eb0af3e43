//! Reorders points for spatial or temporal locality.
use super::{ParameterReader, Stage, StageParameters};
use crate::error::Result;
use crate::point_cloud::PointCloud;
use log::debug;

/// Cells per axis of the grid the Morton code is computed on.
const GRID_RESOLUTION: u32 = 1 << 16;

/// Morton encoding for 2D grid coordinates.
/// Interleaves the low 16 bits of each axis, X on even bits.
pub fn morton_encode_2d(x: u32, y: u32) -> u32 {
    let mut result = 0u32;
    for i in 0..16 {
        result |= (x & (1 << i)) << i;
        result |= (y & (1 << i)) << (i + 1);
    }
    result
}

/// Sorts points along a Z-order curve of X/Y, or by GPS time.
#[derive(Debug, Clone)]
pub struct Sort {
    spatial: bool,
}

impl Default for Sort {
    fn default() -> Self {
        Self { spatial: true }
    }
}

impl Sort {
    /// Morton code of every point on a grid spanning the cloud's extent.
    fn morton_keys(cloud: &PointCloud) -> Vec<u32> {
        let bounds = cloud.compute_bounds();
        let max_cell = (GRID_RESOLUTION - 1) as f64;
        cloud
            .points()
            .map(|p| {
                let grid_x = (bounds.normalize_x(p[0]) * max_cell).clamp(0.0, max_cell) as u32;
                let grid_y = (bounds.normalize_y(p[1]) * max_cell).clamp(0.0, max_cell) as u32;
                morton_encode_2d(grid_x, grid_y)
            })
            .collect()
    }
}

impl Stage for Sort {
    fn name(&self) -> &str {
        "sort"
    }

    fn set_parameters(&mut self, params: &StageParameters) -> Result<()> {
        let mut reader = ParameterReader::new("sort", params);
        self.spatial = reader.optional_bool("spatial", true);
        reader.finish()
    }

    fn process(&mut self, cloud: &mut PointCloud) -> Result<()> {
        let mut order: Vec<usize> = (0..cloud.len()).collect();

        if self.spatial {
            let keys = Self::morton_keys(cloud);
            order.sort_by_key(|&i| keys[i]);
        } else if let Some(times) = cloud.column("gpstime") {
            order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));
        } else {
            debug!("No gpstime attribute, leaving point order unchanged");
            return Ok(());
        }

        cloud.reorder(&order)
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, AttributeType};
    use crate::header::Header;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn morton_interleaves_bits() {
        assert_eq!(morton_encode_2d(0, 0), 0);
        assert_eq!(morton_encode_2d(1, 0), 0b01);
        assert_eq!(morton_encode_2d(0, 1), 0b10);
        assert_eq!(morton_encode_2d(3, 3), 0b1111);
        assert_eq!(morton_encode_2d(2, 1), 0b0110);
        assert_eq!(morton_encode_2d(0xFFFF, 0xFFFF), u32::MAX);
    }

    #[test]
    fn spatial_sort_groups_quadrants() {
        let mut cloud = PointCloud::new(Arc::new(Header::default()));
        for (x, y) in [(9.0, 9.0), (0.0, 0.0), (9.0, 0.0), (0.0, 9.0)] {
            cloud.push(&[x, y, 0.0]).unwrap();
        }
        Sort::default().process(&mut cloud).unwrap();
        let xy: Vec<(f64, f64)> = cloud.points().map(|p| (p[0], p[1])).collect();
        assert_eq!(xy, vec![(0.0, 0.0), (9.0, 0.0), (0.0, 9.0), (9.0, 9.0)]);
    }

    #[test]
    fn temporal_sort_uses_gpstime() {
        let mut header = Header::default();
        header
            .schema
            .push(Attribute::new("gpstime", AttributeType::Float64, ""))
            .unwrap();
        let mut cloud = PointCloud::new(Arc::new(header));
        for (i, t) in [3.0, 1.0, 2.0].iter().enumerate() {
            cloud.push(&[i as f64, 0.0, 0.0, *t]).unwrap();
        }

        let mut stage = Sort::default();
        stage
            .set_parameters(json!({"spatial": false}).as_object().unwrap())
            .unwrap();
        stage.process(&mut cloud).unwrap();
        assert_eq!(cloud.column("gpstime").unwrap(), vec![1.0, 2.0, 3.0]);
    }
}
