//! Point count, extent and classification histogram of the processed points.
use super::{ParameterReader, Stage, StageOutput, StageParameters};
use crate::bounds::Bounds;
use crate::error::Result;
use crate::point_cloud::PointCloud;
use constants::class::get_class_name;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub npoints: u64,
    pub bounds: Bounds,
    /// Points per ASPRS class, present when the records carry a classification.
    pub classes: BTreeMap<u8, ClassCount>,
    /// Points per return number, present when the records carry one.
    pub returns: BTreeMap<u8, u64>,
}

impl Summary {
    pub fn add_class(&mut self, class: u8, count: u64) {
        self.classes
            .entry(class)
            .or_insert_with(|| ClassCount {
                name: get_class_name(class),
                count: 0,
            })
            .count += count;
    }

    /// Fold another summary into this one.
    pub fn merge(&mut self, other: &Summary) {
        self.npoints += other.npoints;
        self.bounds.merge(&other.bounds);
        for (class, entry) in &other.classes {
            self.add_class(*class, entry.count);
        }
        for (number, count) in &other.returns {
            *self.returns.entry(*number).or_insert(0) += count;
        }
    }
}

/// Accumulates a [`Summary`] over every chunk it is run on.
#[derive(Debug, Clone, Default)]
pub struct Summarise {
    summary: Summary,
}

impl Stage for Summarise {
    fn name(&self) -> &str {
        "summarise"
    }

    fn set_parameters(&mut self, params: &StageParameters) -> Result<()> {
        ParameterReader::new("summarise", params).finish()
    }

    fn process(&mut self, cloud: &mut PointCloud) -> Result<()> {
        let schema = cloud.schema();
        let class_column = schema.index_of("Classification");
        let return_column = schema.index_of("ReturnNumber");

        for p in cloud.points() {
            self.summary.npoints += 1;
            self.summary.bounds.update(p[0], p[1], p[2]);
            if let Some(column) = class_column {
                self.summary.add_class(p[column] as u8, 1);
            }
            if let Some(column) = return_column {
                *self.summary.returns.entry(p[column] as u8).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(Summarise::default())
    }

    fn output(&self) -> Option<StageOutput> {
        Some(StageOutput::Summary(self.summary.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, AttributeType};
    use crate::header::Header;
    use std::sync::Arc;

    fn classified_cloud(classes: &[u8]) -> PointCloud {
        let mut header = Header::default();
        header
            .schema
            .push(Attribute::new("Classification", AttributeType::UInt8, ""))
            .unwrap();
        let mut cloud = PointCloud::new(Arc::new(header));
        for (i, class) in classes.iter().enumerate() {
            cloud.push(&[i as f64, 0.0, 1.0, *class as f64]).unwrap();
        }
        cloud
    }

    #[test]
    fn counts_points_and_classes() {
        let mut stage = Summarise::default();
        stage.process(&mut classified_cloud(&[2, 2, 6])).unwrap();

        let Some(StageOutput::Summary(summary)) = stage.output() else {
            panic!("summarise always has an output");
        };
        assert_eq!(summary.npoints, 3);
        assert_eq!(summary.bounds.max_x, 2.0);
        assert_eq!(summary.classes[&2].count, 2);
        assert_eq!(summary.classes[&6].name, get_class_name(6));
        assert!(summary.returns.is_empty());
    }

    #[test]
    fn clones_start_empty_and_merge() {
        let mut template = Summarise::default();
        template.process(&mut classified_cloud(&[2])).unwrap();

        let mut a = template.clone_stage();
        let mut b = template.clone_stage();
        a.process(&mut classified_cloud(&[2, 9])).unwrap();
        b.process(&mut classified_cloud(&[9])).unwrap();

        let mut merged = a.output().unwrap();
        merged.merge(&b.output().unwrap());
        let StageOutput::Summary(summary) = merged;
        assert_eq!(summary.npoints, 3);
        assert_eq!(summary.classes[&9].count, 2);
        assert_eq!(summary.classes[&2].count, 1);
    }
}
