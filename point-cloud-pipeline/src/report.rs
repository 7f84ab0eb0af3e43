//! Run report: per-chunk outcomes and merged stage outputs.
use crate::error::{ChunkError, PipelineError, Result};
use crate::stages::StageOutput;
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Succeeded,
    Failed,
    /// Never started because the run was cancelled.
    Skipped,
}

/// What happened to one chunk.
#[derive(Debug, Serialize)]
pub struct ChunkOutcome {
    pub chunk_id: usize,
    pub chunk_name: String,
    pub source: PathBuf,
    pub status: ChunkStatus,
    pub points_read: u64,
    pub points_written: u64,
    pub output: Option<PathBuf>,
    pub error: Option<ChunkError>,
    /// Output of each stage, in pipeline order.
    #[serde(skip)]
    pub stage_outputs: Vec<Option<StageOutput>>,
}

/// Merged output of one stage across every successful chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub output: StageOutput,
}

#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub chunks: Vec<ChunkOutcome>,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    /// Build a report from outcomes, merging stage outputs chunk by chunk.
    pub fn new(mut chunks: Vec<ChunkOutcome>, stage_names: &[String]) -> Self {
        chunks.sort_by_key(|c| c.chunk_id);

        let mut merged: Vec<Option<StageOutput>> = vec![None; stage_names.len()];
        for chunk in chunks.iter().filter(|c| c.status == ChunkStatus::Succeeded) {
            for (slot, output) in merged.iter_mut().zip(&chunk.stage_outputs) {
                if let Some(output) = output {
                    match slot {
                        Some(total) => total.merge(output),
                        None => *slot = Some(output.clone()),
                    }
                }
            }
        }

        let count = |status: ChunkStatus| chunks.iter().filter(|c| c.status == status).count();
        Self {
            succeeded: count(ChunkStatus::Succeeded),
            failed: count(ChunkStatus::Failed),
            skipped: count(ChunkStatus::Skipped),
            stages: stage_names
                .iter()
                .zip(merged)
                .filter_map(|(stage, output)| {
                    output.map(|output| StageReport {
                        stage: stage.clone(),
                        output,
                    })
                })
                .collect(),
            chunks,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    pub fn errors(&self) -> impl Iterator<Item = &ChunkError> {
        self.chunks.iter().filter_map(|c| c.error.as_ref())
    }

    /// Merged output of the first stage with this name.
    pub fn stage_output(&self, stage: &str) -> Option<&StageOutput> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| &s.output)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?).map_err(|e| PipelineError::io_at(path, e))?;
        info!("Wrote run report: {}", path.display());
        Ok(())
    }

    /// Log a short summary of the run.
    pub fn log_summary(&self) {
        info!("Run summary:");
        info!(
            "  Chunks: {} succeeded, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        );
        let points: u64 = self.chunks.iter().map(|c| c.points_read).sum();
        info!("  Points read: {}", points);
        for error in self.errors() {
            info!("  Failed {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::Summary;

    fn outcome(id: usize, status: ChunkStatus, npoints: u64) -> ChunkOutcome {
        let summary = Summary {
            npoints,
            ..Default::default()
        };
        ChunkOutcome {
            chunk_id: id,
            chunk_name: format!("c{id}"),
            source: PathBuf::from("in.pcd"),
            status,
            points_read: npoints,
            points_written: 0,
            output: None,
            error: (status == ChunkStatus::Failed)
                .then(|| ChunkError::new(id, "c", PipelineError::format("bad"))),
            stage_outputs: vec![None, Some(StageOutput::Summary(summary))],
        }
    }

    #[test]
    fn merges_successful_chunks_only() {
        let report = RunReport::new(
            vec![
                outcome(2, ChunkStatus::Succeeded, 5),
                outcome(0, ChunkStatus::Succeeded, 3),
                outcome(1, ChunkStatus::Failed, 100),
            ],
            &["add_attribute".to_string(), "summarise".to_string()],
        );

        assert_eq!((report.succeeded, report.failed, report.skipped), (2, 1, 0));
        assert!(!report.is_success());
        let ids: Vec<usize> = report.chunks.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, [0, 1, 2]);
        assert_eq!(report.stages.len(), 1);
        match report.stage_output("summarise") {
            Some(StageOutput::Summary(s)) => assert_eq!(s.npoints, 8),
            other => panic!("unexpected output {other:?}"),
        }
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = RunReport::new(vec![outcome(0, ChunkStatus::Failed, 0)], &[]);
        report.write(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["failed"], 1);
        assert_eq!(value["chunks"][0]["status"], "failed");
        assert_eq!(value["chunks"][0]["error"]["kind"], "Format");
    }
}
