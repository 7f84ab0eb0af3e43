//! Pipeline stages: configurable transformations applied to a chunk's store.
pub mod attributes;
pub mod sort;
pub mod summarise;

use crate::error::{PipelineError, Result};
use crate::point_cloud::PointCloud;
use serde::Serialize;
use serde_json::{Map, Value};

pub use self::attributes::{AddAttribute, RemoveAttribute};
pub use self::sort::Sort;
pub use self::summarise::{Summarise, Summary};

/// Parameters of one stage as found in the configuration document.
pub type StageParameters = Map<String, Value>;

/// One step of a pipeline.
///
/// A configured stage is a template: the executor runs a fresh
/// [`Stage::clone_stage`] copy on every chunk, so `process` may keep
/// per-chunk state.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Validate and store parameters. Every problem found is reported in one `Config` error.
    fn set_parameters(&mut self, params: &StageParameters) -> Result<()>;

    fn process(&mut self, cloud: &mut PointCloud) -> Result<()>;

    fn clone_stage(&self) -> Box<dyn Stage>;

    /// Result collected after `process`, merged across chunks by the executor.
    fn output(&self) -> Option<StageOutput> {
        None
    }
}

/// Aggregatable result of a stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageOutput {
    Summary(Summary),
}

impl StageOutput {
    pub fn merge(&mut self, other: &StageOutput) {
        match (self, other) {
            (StageOutput::Summary(a), StageOutput::Summary(b)) => a.merge(b),
        }
    }
}

/// Names accepted by [`create_stage`].
pub const STAGE_NAMES: [&str; 4] = ["add_attribute", "remove_attribute", "sort", "summarise"];

/// Unconfigured stage for a configuration name.
pub fn create_stage(name: &str) -> Option<Box<dyn Stage>> {
    match name {
        "add_attribute" => Some(Box::new(AddAttribute::default())),
        "remove_attribute" => Some(Box::new(RemoveAttribute::default())),
        "sort" => Some(Box::new(Sort::default())),
        "summarise" | "summary" => Some(Box::new(Summarise::default())),
        _ => None,
    }
}

/// Create and configure a stage in one step.
pub fn build_stage(name: &str, params: &StageParameters) -> Result<Box<dyn Stage>> {
    let mut stage = create_stage(name).ok_or_else(|| {
        PipelineError::config(format!(
            "unknown stage '{}' (expected one of: {})",
            name,
            STAGE_NAMES.join(", ")
        ))
    })?;
    stage.set_parameters(params)?;
    Ok(stage)
}

/// Collects parameter problems of one stage.
pub(crate) struct ParameterReader<'a> {
    stage: &'static str,
    params: &'a StageParameters,
    errors: Vec<String>,
}

impl<'a> ParameterReader<'a> {
    pub(crate) fn new(stage: &'static str, params: &'a StageParameters) -> Self {
        Self {
            stage,
            params,
            errors: Vec::new(),
        }
    }

    pub(crate) fn error(&mut self, msg: String) {
        self.errors.push(format!("{}: {}", self.stage, msg));
    }

    pub(crate) fn required_str(&mut self, key: &str) -> Option<&'a str> {
        let params = self.params;
        match params.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            Some(other) => {
                self.error(format!("'{}' must be a string, got {}", key, other));
                None
            }
            None => {
                self.error(format!("missing required parameter '{}'", key));
                None
            }
        }
    }

    pub(crate) fn optional_str(&mut self, key: &str, default: &'a str) -> &'a str {
        let params = self.params;
        match params.get(key) {
            Some(Value::String(s)) => s.as_str(),
            None | Some(Value::Null) => default,
            Some(other) => {
                self.error(format!("'{}' must be a string, got {}", key, other));
                default
            }
        }
    }

    pub(crate) fn optional_f64(&mut self, key: &str, default: f64) -> f64 {
        let params = self.params;
        match params.get(key) {
            None | Some(Value::Null) => default,
            Some(value) => value.as_f64().unwrap_or_else(|| {
                self.error(format!("'{}' must be a number, got {}", key, value));
                default
            }),
        }
    }

    pub(crate) fn optional_bool(&mut self, key: &str, default: bool) -> bool {
        let params = self.params;
        match params.get(key) {
            None | Some(Value::Null) => default,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                self.error(format!("'{}' must be a boolean, got {}", key, other));
                default
            }
        }
    }

    pub(crate) fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Config(self.errors))
        }
    }
}
