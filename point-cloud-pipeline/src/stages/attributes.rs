//! Schema-editing stages.
use super::{ParameterReader, Stage, StageParameters};
use crate::attribute::{Attribute, AttributeType};
use crate::error::{PipelineError, Result};
use crate::point_cloud::PointCloud;
use constants::coordinate_system::is_reserved_coordinate;
use log::debug;

/// Adds one typed attribute to every record, filled with its default value.
#[derive(Debug, Clone, Default)]
pub struct AddAttribute {
    attribute: Option<Attribute>,
}

impl AddAttribute {
    pub fn attribute(&self) -> Option<&Attribute> {
        self.attribute.as_ref()
    }
}

impl Stage for AddAttribute {
    fn name(&self) -> &str {
        "add_attribute"
    }

    fn set_parameters(&mut self, params: &StageParameters) -> Result<()> {
        let mut reader = ParameterReader::new("add_attribute", params);
        let name = reader.required_str("name");
        let data_type = reader.required_str("data_type");
        let description = reader.required_str("description");
        let scale = reader.optional_f64("scale", 1.0);
        let offset = reader.optional_f64("offset", 0.0);

        if name == Some("") {
            reader.error("'name' cannot be empty".to_string());
        }
        let data_type = data_type.map(|t| (t, AttributeType::from_name(t)));
        if let Some((text, AttributeType::NoType)) = data_type {
            reader.error(format!(
                "unknown data_type '{}' (expected one of: {})",
                text,
                AttributeType::ALL.map(|t| t.name()).join(", ")
            ));
        }
        if scale == 0.0 || !scale.is_finite() {
            reader.error(format!("'scale' must be a non-zero number, got {}", scale));
        }
        reader.finish()?;

        if let (Some(name), Some((_, data_type)), Some(description)) = (name, data_type, description)
        {
            self.attribute = Some(Attribute::with_quantization(
                name,
                data_type,
                scale,
                offset,
                description,
            ));
        }
        Ok(())
    }

    fn process(&mut self, cloud: &mut PointCloud) -> Result<()> {
        let attribute = self
            .attribute
            .clone()
            .ok_or_else(|| PipelineError::precondition("add_attribute is not configured"))?;
        debug!(
            "Adding attribute '{}' ({}) to {} points",
            attribute.name,
            attribute.data_type,
            cloud.len()
        );
        cloud.add_attribute(attribute)
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }
}

/// Drops one attribute from every record. Coordinates cannot be removed.
#[derive(Debug, Clone, Default)]
pub struct RemoveAttribute {
    name: Option<String>,
}

impl Stage for RemoveAttribute {
    fn name(&self) -> &str {
        "remove_attribute"
    }

    fn set_parameters(&mut self, params: &StageParameters) -> Result<()> {
        let mut reader = ParameterReader::new("remove_attribute", params);
        let name = reader.required_str("name");
        if name.is_some_and(is_reserved_coordinate) {
            reader.error("removing point coordinates is not allowed".to_string());
        }
        reader.finish()?;
        self.name = name.map(str::to_string);
        Ok(())
    }

    fn process(&mut self, cloud: &mut PointCloud) -> Result<()> {
        let name = self
            .name
            .as_deref()
            .ok_or_else(|| PipelineError::precondition("remove_attribute is not configured"))?;
        debug!("Removing attribute '{}' from {} points", name, cloud.len());
        cloud.remove_attribute(name)
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn params(value: Value) -> StageParameters {
        value.as_object().cloned().unwrap()
    }

    fn cloud() -> PointCloud {
        let mut header = Header::default();
        header
            .schema
            .push(Attribute::new("Intensity", AttributeType::UInt16, ""))
            .unwrap();
        let mut cloud = PointCloud::new(Arc::new(header));
        cloud.push(&[0.0, 0.0, 0.0, 7.0]).unwrap();
        cloud.push(&[1.0, 1.0, 1.0, 9.0]).unwrap();
        cloud
    }

    #[test]
    fn add_attribute_extends_every_record() {
        let mut stage = AddAttribute::default();
        stage
            .set_parameters(&params(json!({
                "name": "Intensity2", "data_type": "uint16", "description": "copy"
            })))
            .unwrap();

        let mut cloud = cloud();
        let before = cloud.schema().len();
        stage.process(&mut cloud).unwrap();

        assert_eq!(cloud.schema().len(), before + 1);
        let added = cloud.schema().find("Intensity2").unwrap();
        assert_eq!(added.description, "copy");
        for p in cloud.points() {
            assert_eq!(p.len(), before + 1);
            assert_eq!(p[before], 0.0);
        }
    }

    #[test]
    fn add_attribute_reports_all_parameter_errors() {
        let mut stage = AddAttribute::default();
        let err = stage
            .set_parameters(&params(json!({"data_type": "decimal", "scale": 0})))
            .unwrap_err();
        match err {
            PipelineError::Config(errors) => {
                assert_eq!(errors.len(), 4);
                assert!(errors.iter().any(|e| e.contains("'description'")));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(stage.attribute().is_none());
    }

    #[test]
    fn duplicate_attribute_is_a_domain_error() {
        let mut stage = AddAttribute::default();
        stage
            .set_parameters(&params(json!({
                "name": "Intensity", "data_type": "uint8", "description": "again"
            })))
            .unwrap();
        let mut cloud = cloud();
        assert!(matches!(
            stage.process(&mut cloud),
            Err(PipelineError::Domain(_))
        ));
        assert_eq!(cloud.schema().len(), 4);
    }

    #[test]
    fn unconfigured_stage_is_misuse() {
        let mut cloud = cloud();
        assert!(matches!(
            AddAttribute::default().process(&mut cloud),
            Err(PipelineError::Precondition(_))
        ));
    }

    #[test]
    fn remove_attribute_protects_coordinates() {
        for name in ["x", "X", "y", "Y", "z", "Z"] {
            let mut stage = RemoveAttribute::default();
            match stage.set_parameters(&params(json!({ "name": name }))) {
                Err(PipelineError::Config(errors)) => assert_eq!(
                    errors,
                    ["remove_attribute: removing point coordinates is not allowed"]
                ),
                other => panic!("unexpected result {other:?}"),
            }
            let mut cloud = cloud();
            assert!(matches!(
                stage.process(&mut cloud),
                Err(PipelineError::Precondition(_))
            ));
            assert!(matches!(
                cloud.remove_attribute(name),
                Err(PipelineError::Domain(_))
            ));
        }

        let mut stage = RemoveAttribute::default();
        stage
            .set_parameters(&params(json!({"name": "Intensity"})))
            .unwrap();
        let mut cloud = cloud();
        stage.process(&mut cloud).unwrap();
        assert_eq!(cloud.point(1), &[1.0, 1.0, 1.0]);
    }
}
