//! Chunk-scoped in-memory point store.
use crate::attribute::{Attribute, AttributeSchema};
use crate::bounds::Bounds;
use crate::error::{PipelineError, Result};
use crate::header::Header;
use std::sync::Arc;

/// Records of one chunk, stored row-major with a stride equal to the schema length.
///
/// The source header is shared read-only between the store and whoever produced
/// it; [`PointCloud::header_mut`] copies it on first write.
#[derive(Debug, Clone)]
pub struct PointCloud {
    header: Arc<Header>,
    schema: AttributeSchema,
    values: Vec<f64>,
}

impl PointCloud {
    pub fn new(header: Arc<Header>) -> Self {
        Self::with_capacity(header, 0)
    }

    /// Empty store with room for `points` records of the header's schema.
    pub fn with_capacity(header: Arc<Header>, points: usize) -> Self {
        let schema = header.schema.clone();
        let values = Vec::with_capacity(points * schema.len());
        Self {
            header,
            schema,
            values,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn shared_header(&self) -> Arc<Header> {
        Arc::clone(&self.header)
    }

    /// Mutable header, cloned first if other owners still hold it.
    pub fn header_mut(&mut self) -> &mut Header {
        Arc::make_mut(&mut self.header)
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        if self.schema.is_empty() {
            0
        } else {
            self.values.len() / self.schema.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, record: &[f64]) -> Result<()> {
        if record.len() != self.schema.len() {
            return Err(PipelineError::precondition(format!(
                "record has {} values but the schema has {} attributes",
                record.len(),
                self.schema.len()
            )));
        }
        self.values.extend_from_slice(record);
        Ok(())
    }

    pub fn point(&self, index: usize) -> &[f64] {
        let stride = self.schema.len();
        &self.values[index * stride..(index + 1) * stride]
    }

    pub fn points(&self) -> std::slice::ChunksExact<'_, f64> {
        self.values.chunks_exact(self.schema.len().max(1))
    }

    /// Value of one attribute for one point.
    pub fn get(&self, index: usize, name: &str) -> Option<f64> {
        let column = self.schema.index_of(name)?;
        self.values.get(index * self.schema.len() + column).copied()
    }

    /// All values of one column, in point order.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let column = self.schema.index_of(name)?;
        Some(self.points().map(|p| p[column]).collect())
    }

    /// Add a column and backfill its default value into every record.
    pub fn add_attribute(&mut self, attribute: Attribute) -> Result<()> {
        let old_stride = self.schema.len();
        let default = attribute.default_value();
        self.schema.push(attribute)?;

        let count = self.values.len() / old_stride.max(1);
        let mut values = Vec::with_capacity(count * (old_stride + 1));
        for record in self.values.chunks_exact(old_stride.max(1)) {
            values.extend_from_slice(record);
            values.push(default);
        }
        self.values = values;
        Ok(())
    }

    /// Strip a column from every record. Nothing changes if the schema rejects the name.
    pub fn remove_attribute(&mut self, name: &str) -> Result<()> {
        let old_stride = self.schema.len();
        let column = self.schema.remove(name)?;

        let mut values = Vec::with_capacity(self.values.len() / old_stride * (old_stride - 1));
        for record in self.values.chunks_exact(old_stride) {
            values.extend_from_slice(&record[..column]);
            values.extend_from_slice(&record[column + 1..]);
        }
        self.values = values;
        Ok(())
    }

    /// Rearrange points so that position `i` holds former point `order[i]`.
    pub fn reorder(&mut self, order: &[usize]) -> Result<()> {
        if order.len() != self.len() {
            return Err(PipelineError::precondition(format!(
                "permutation has {} entries for {} points",
                order.len(),
                self.len()
            )));
        }
        let mut seen = vec![false; order.len()];
        for &index in order {
            match seen.get_mut(index) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(PipelineError::precondition(format!(
                        "point {} appears twice in the permutation",
                        index
                    )))
                }
                None => {
                    return Err(PipelineError::precondition(format!(
                        "point {} is out of range for {} points",
                        index,
                        self.len()
                    )))
                }
            }
        }
        let mut values = Vec::with_capacity(self.values.len());
        for &index in order {
            values.extend_from_slice(self.point(index));
        }
        self.values = values;
        Ok(())
    }

    /// Extent of the points currently held.
    pub fn compute_bounds(&self) -> Bounds {
        let mut bounds = Bounds::new();
        for p in self.points() {
            bounds.update(p[0], p[1], p[2]);
        }
        bounds
    }

    /// Header describing the current content, for a write path.
    pub fn to_header(&self) -> Header {
        let mut header = (*self.header).clone();
        header.schema = self.schema.clone();
        header.number_of_points = Some(self.len() as u64);
        header.bounds = self.compute_bounds();
        header
    }
}
