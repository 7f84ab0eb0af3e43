//! Per-source metadata read before point data.
use crate::attribute::AttributeSchema;
use crate::bounds::Bounds;
use constants::coordinate_system::DEFAULT_COORDINATE_SCALE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Format signature ("PCD", "LASF").
    pub signature: String,
    pub version_major: u8,
    pub version_minor: u8,
    /// Number of records, `None` when it cannot be known without a full scan.
    pub number_of_points: Option<u64>,
    pub bounds: Bounds,
    pub scale: [f64; 3],
    pub offset: [f64; 3],
    /// Attributes each record carries, coordinates first.
    pub schema: AttributeSchema,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            signature: String::new(),
            version_major: 0,
            version_minor: 0,
            number_of_points: None,
            bounds: Bounds::new(),
            scale: [DEFAULT_COORDINATE_SCALE; 3],
            offset: [0.0; 3],
            schema: AttributeSchema::default(),
        }
    }
}

impl Header {
    /// Set the coordinate quantization, keeping the schema's coordinate block in sync.
    pub fn set_transforms(&mut self, scale: [f64; 3], offset: [f64; 3]) {
        self.scale = scale;
        self.offset = offset;
        for axis in 0..3 {
            self.schema
                .set_coordinate_quantization(axis, scale[axis], offset[axis]);
        }
    }
}
