//! Run configuration: processing options plus the ordered stage list.
use crate::backend::{BackendKind, BackendOptions};
use crate::bounds::Bounds;
use crate::chunking::ChunkingOptions;
use crate::error::{PipelineError, Result};
use crate::stages::StageParameters;
use constants::format::OUTPUT_TEMPLATE_WILDCARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Options that apply to the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub files: Vec<PathBuf>,
    /// Worker threads, 0 for every available core.
    pub ncores: usize,
    /// Records per sub-file chunk, 0 for one chunk per file.
    pub chunk: u64,
    pub progress: bool,
    /// Abort the run on the first chunk failure.
    pub all_or_nothing: bool,
    /// Extra read attempts after a transient IO error.
    pub retries: u32,
    /// Filter flags applied to every chunk, e.g. `-drop_class 7`.
    pub filter: String,
    /// Planar query region `[min_x, min_y, max_x, max_y]`.
    pub region: Option<[f64; 4]>,
    /// Output path template, `*` is replaced by the chunk name.
    pub output: Option<String>,
    /// Binary rather than ASCII PCD output.
    pub binary: bool,
    pub preread_bbox: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            ncores: 0,
            chunk: 0,
            progress: false,
            all_or_nothing: false,
            retries: 0,
            filter: String::new(),
            region: None,
            output: None,
            binary: true,
            preread_bbox: true,
        }
    }
}

impl ProcessingOptions {
    /// Check option consistency, reporting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Some([min_x, min_y, max_x, max_y]) = self.region {
            if min_x > max_x || min_y > max_y {
                errors.push(format!(
                    "processing: region [{}, {}, {}, {}] is inverted",
                    min_x, min_y, max_x, max_y
                ));
            }
        }
        if let Some(output) = &self.output {
            if let Err(PipelineError::Config(mut e)) = BackendKind::from_path(Path::new(output)) {
                errors.append(&mut e);
            }
        }
        if let Err(PipelineError::Config(mut e)) = crate::filters::Filter::parse_all(&[&self.filter]) {
            errors.append(&mut e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Config(errors))
        }
    }

    pub fn chunking_options(&self) -> ChunkingOptions {
        ChunkingOptions {
            chunk_size: self.chunk,
            filters: if self.filter.trim().is_empty() {
                Vec::new()
            } else {
                vec![self.filter.clone()]
            },
            region: self
                .region
                .map(|[min_x, min_y, max_x, max_y]| Bounds::xy(min_x, min_y, max_x, max_y)),
        }
    }

    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            binary: self.binary,
            preread_bbox: self.preread_bbox,
        }
    }

    /// Output path of a chunk, `None` when the run writes nothing.
    pub fn output_path(&self, chunk_name: &str) -> Option<PathBuf> {
        self.output.as_ref().map(|template| {
            PathBuf::from(template.replace(OUTPUT_TEMPLATE_WILDCARD, chunk_name))
        })
    }

    pub fn output_has_wildcard(&self) -> bool {
        self.output
            .as_ref()
            .is_some_and(|t| t.contains(OUTPUT_TEMPLATE_WILDCARD))
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub processing: ProcessingOptions,
    /// Stage entries: `{"algoname": name, ...params}` or `{name: {params}}`.
    #[serde(default)]
    pub pipeline: Vec<Value>,
}

impl PipelineConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io_at(path, e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Stage names and parameter objects in pipeline order.
    pub fn stage_configs(&self) -> Result<Vec<(String, StageParameters)>> {
        let mut stages = Vec::new();
        let mut errors = Vec::new();

        for (i, entry) in self.pipeline.iter().enumerate() {
            let Some(object) = entry.as_object() else {
                errors.push(format!("pipeline[{}]: stage entry must be an object", i));
                continue;
            };

            if let Some(name) = object.get("algoname") {
                match name.as_str() {
                    Some(name) => {
                        let mut params = object.clone();
                        params.remove("algoname");
                        stages.push((name.to_string(), params));
                    }
                    None => errors.push(format!("pipeline[{}]: 'algoname' must be a string", i)),
                }
                continue;
            }

            let mut keys = object.iter();
            match (keys.next(), keys.next()) {
                (Some((name, Value::Object(params))), None) => {
                    stages.push((name.clone(), params.clone()))
                }
                (Some((name, Value::Null)), None) => {
                    stages.push((name.clone(), StageParameters::new()))
                }
                _ => errors.push(format!(
                    "pipeline[{}]: expected {{\"algoname\": ...}} or a single {{stage: {{params}}}} mapping",
                    i
                )),
            }
        }

        if errors.is_empty() {
            Ok(stages)
        } else {
            Err(PipelineError::Config(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_unknown_keys() {
        let config = PipelineConfig::parse(
            r#"{"processing": {"files": ["a.pcd"], "colour": "red"}, "extra": 1}"#,
        )
        .unwrap();
        let p = &config.processing;
        assert_eq!(p.files, vec![PathBuf::from("a.pcd")]);
        assert!(p.binary);
        assert!(p.preread_bbox);
        assert_eq!(p.ncores, 0);
        assert!(config.pipeline.is_empty());
    }

    #[test]
    fn both_entry_shapes_are_accepted() {
        let config = PipelineConfig::parse(
            r#"{"pipeline": [
                {"algoname": "add_attribute", "name": "Intensity2", "data_type": "uint16"},
                {"remove_attribute": {"name": "Intensity"}},
                {"summarise": null}
            ]}"#,
        )
        .unwrap();
        let stages = config.stage_configs().unwrap();
        let names: Vec<&str> = stages.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["add_attribute", "remove_attribute", "summarise"]);
        assert!(!stages[0].1.contains_key("algoname"));
        assert_eq!(stages[1].1["name"], "Intensity");
    }

    #[test]
    fn malformed_entries_are_all_reported() {
        let config = PipelineConfig::parse(
            r#"{"pipeline": [3, {"algoname": 1}, {"a": {}, "b": {}}]}"#,
        )
        .unwrap();
        match config.stage_configs() {
            Err(PipelineError::Config(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn output_template_and_validation() {
        let mut options = ProcessingOptions {
            output: Some("out/*_clean.pcd".into()),
            ..Default::default()
        };
        assert_eq!(
            options.output_path("tile_2"),
            Some(PathBuf::from("out/tile_2_clean.pcd"))
        );
        assert!(options.output_has_wildcard());
        options.validate().unwrap();

        options.output = Some("out/result.txt".into());
        options.region = Some([1.0, 0.0, 0.0, 1.0]);
        options.filter = "-bogus".into();
        match options.validate() {
            Err(PipelineError::Config(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
