//! Axis-aligned bounding box tracking for point clouds
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new()
    }
}

impl Bounds {
    /// Create new bounds initialised to infinity values
    pub fn new() -> Self {
        Self {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
            min_z: f64::INFINITY,
            max_z: f64::NEG_INFINITY,
        }
    }

    /// Planar query region with an unbounded Z range.
    pub fn xy(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
            min_z: f64::NEG_INFINITY,
            max_z: f64::INFINITY,
        }
    }

    /// True until at least one point has been added
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y || self.min_z > self.max_z
    }

    /// Update bounds with a new point
    pub fn update(&mut self, x: f64, y: f64, z: f64) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
        self.min_z = self.min_z.min(z);
        self.max_z = self.max_z.max(z);
    }

    /// Grow to cover another box
    pub fn merge(&mut self, other: &Bounds) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
        self.min_z = self.min_z.min(other.min_z);
        self.max_z = self.max_z.max(other.max_z);
    }

    pub fn contains_xy(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Whether the planar footprints of two boxes overlap
    pub fn intersects_xy(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Normalise X coordinate to 0-1 range
    pub fn normalize_x(&self, x: f64) -> f64 {
        normalize(x, self.min_x, self.max_x)
    }

    /// Normalise Y coordinate to 0-1 range
    pub fn normalize_y(&self, y: f64) -> f64 {
        normalize(y, self.min_y, self.max_y)
    }
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range > 0.0 {
        (value - min) / range
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_and_merge() {
        let mut a = Bounds::new();
        assert!(a.is_empty());
        a.update(1.0, 2.0, 3.0);
        a.update(-1.0, 5.0, 0.0);
        assert!(!a.is_empty());
        assert_eq!((a.min_x, a.max_y, a.max_z), (-1.0, 5.0, 3.0));

        let mut b = Bounds::new();
        b.update(10.0, 0.0, 0.0);
        a.merge(&b);
        assert_eq!(a.max_x, 10.0);
        assert_eq!(a.min_y, 0.0);
    }

    #[test]
    fn degenerate_range_normalises_to_zero() {
        let mut b = Bounds::new();
        b.update(4.0, 4.0, 4.0);
        assert_eq!(b.normalize_x(4.0), 0.0);
    }
}
