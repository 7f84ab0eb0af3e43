//! Pipeline construction and the chunk-parallel executor.
use crate::backend::{BackendKind, FormatBackend};
use crate::chunking::{Chunk, ChunkManager};
use crate::config::{PipelineConfig, ProcessingOptions};
use crate::error::{ChunkError, PipelineError, Result};
use crate::header::Header;
use crate::parallel::{ParallelismProvider, SystemParallelism, worker_count};
use crate::point_cloud::PointCloud;
use crate::report::{ChunkOutcome, ChunkStatus, RunReport};
use crate::stages::{Stage, StageOutput, StageParameters, build_stage};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Ordered, fully configured stages.
///
/// Only built when every stage accepted its parameters, so an invalid
/// pipeline can never run.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Instantiate and configure every stage, reporting all configuration errors together.
    pub fn from_stage_configs(configs: &[(String, StageParameters)]) -> Result<Self> {
        let mut stages = Vec::with_capacity(configs.len());
        let mut errors = Vec::new();

        for (i, (name, params)) in configs.iter().enumerate() {
            match build_stage(name, params) {
                Ok(stage) => stages.push(stage),
                Err(PipelineError::Config(messages)) => errors.extend(
                    messages
                        .into_iter()
                        .map(|m| format!("pipeline[{}]: {}", i, m)),
                ),
                Err(other) => return Err(other),
            }
        }

        if errors.is_empty() {
            Ok(Self { stages })
        } else {
            Err(PipelineError::Config(errors))
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::from_stage_configs(&config.stage_configs()?)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Fresh copies of the stages for one chunk.
    fn instantiate(&self) -> Vec<Box<dyn Stage>> {
        self.stages.iter().map(|s| s.clone_stage()).collect()
    }

    /// Run every stage in order on one store. Returns each stage's output.
    pub fn process(&self, cloud: &mut PointCloud) -> Result<Vec<Option<StageOutput>>> {
        let mut stages = self.instantiate();
        for stage in stages.iter_mut() {
            stage.process(cloud)?;
            debug!("Stage {} done, {} points", stage.name(), cloud.len());
        }
        Ok(stages.iter().map(|s| s.output()).collect())
    }
}

/// Successful result of one chunk.
struct ChunkResult {
    points_read: u64,
    points_written: u64,
    output: Option<PathBuf>,
    stage_outputs: Vec<Option<StageOutput>>,
}

/// Drives a pipeline over chunks on a worker pool.
pub struct PipelineExecutor {
    pipeline: Pipeline,
    options: ProcessingOptions,
    provider: Arc<dyn ParallelismProvider>,
}

impl PipelineExecutor {
    pub fn new(pipeline: Pipeline, options: ProcessingOptions) -> Self {
        let limit = (options.ncores > 0).then_some(options.ncores);
        Self {
            pipeline,
            options,
            provider: Arc::new(SystemParallelism::new(limit)),
        }
    }

    /// Build the pipeline and executor from a configuration document.
    ///
    /// Option and stage problems are reported together in one `Config` error.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut errors = Vec::new();
        match config.processing.validate() {
            Ok(()) => {}
            Err(PipelineError::Config(mut e)) => errors.append(&mut e),
            Err(e) => return Err(e),
        }
        let pipeline = match Pipeline::from_config(config) {
            Ok(pipeline) => Some(pipeline),
            Err(PipelineError::Config(mut e)) => {
                errors.append(&mut e);
                None
            }
            Err(e) => return Err(e),
        };

        match pipeline {
            Some(pipeline) if errors.is_empty() => {
                Ok(Self::new(pipeline, config.processing.clone()))
            }
            _ => Err(PipelineError::Config(errors)),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ParallelismProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Partition the configured files and process every chunk.
    pub fn run(&self) -> Result<RunReport> {
        self.options.validate()?;
        let chunks = ChunkManager::new(&self.options.files, &self.options.chunking_options())?
            .into_chunks();
        if chunks.len() > 1 && self.options.output.is_some() && !self.options.output_has_wildcard()
        {
            return Err(PipelineError::config(
                "processing: output template needs a '*' when there are several chunks",
            ));
        }
        self.run_chunks(&chunks)
    }

    /// Process the given chunks.
    ///
    /// Per-chunk failures are recorded in the report. A fatal failure, or any
    /// failure with `all_or_nothing`, stops dispatching new chunks and the run
    /// returns [`PipelineError::Aborted`] once in-flight chunks are done.
    pub fn run_chunks(&self, chunks: &[Chunk]) -> Result<RunReport> {
        let workers = worker_count(self.provider.as_ref(), self.options.ncores, chunks.len());
        info!(
            "Processing {} chunk(s) through {} stage(s) with {} worker(s)",
            chunks.len(),
            self.pipeline.len(),
            workers
        );

        let pb = self.progress_bar(chunks.len() as u64);
        let cancel = AtomicBool::new(false);
        let outcomes = Mutex::new(Vec::with_capacity(chunks.len()));

        let work = |chunk: &Chunk| {
            let outcome = if cancel.load(Ordering::SeqCst) {
                skipped_outcome(chunk)
            } else {
                let outcome = self.run_one(chunk);
                if let Some(error) = &outcome.error {
                    warn!("{}", error);
                    if error.error.is_fatal() || self.options.all_or_nothing {
                        cancel.store(true, Ordering::SeqCst);
                    }
                }
                outcome
            };
            pb.inc(1);
            outcomes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(outcome);
        };
        dispatch(chunks, workers, &work)?;
        pb.finish_with_message("Chunks processed");

        let outcomes = outcomes
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let report = RunReport::new(outcomes, &self.pipeline.stage_names());

        if cancel.load(Ordering::SeqCst) {
            let errors = report.chunks.into_iter().filter_map(|c| c.error).collect();
            return Err(PipelineError::Aborted(errors));
        }
        report.log_summary();
        Ok(report)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.options.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{bar:40.green/blue}] {pos}/{len} chunks ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("▉▊▋▌▍▎▏ "));
        }
        pb.set_message("Processing chunks");
        pb
    }

    fn run_one(&self, chunk: &Chunk) -> ChunkOutcome {
        debug!(
            "Chunk {} ({}): {} records {}..{:?}",
            chunk.id,
            chunk.name,
            chunk.path.display(),
            chunk.start,
            chunk.end
        );
        let mut outcome = ChunkOutcome {
            chunk_id: chunk.id,
            chunk_name: chunk.name.clone(),
            source: chunk.path.clone(),
            status: ChunkStatus::Succeeded,
            points_read: 0,
            points_written: 0,
            output: None,
            error: None,
            stage_outputs: Vec::new(),
        };
        match self.process_chunk(chunk) {
            Ok(result) => {
                outcome.points_read = result.points_read;
                outcome.points_written = result.points_written;
                outcome.output = result.output;
                outcome.stage_outputs = result.stage_outputs;
            }
            Err(e) => {
                outcome.status = ChunkStatus::Failed;
                outcome.error = Some(ChunkError::new(chunk.id, &chunk.name, e));
            }
        }
        outcome
    }

    /// Read, process and write one chunk.
    fn process_chunk(&self, chunk: &Chunk) -> Result<ChunkResult> {
        let mut reader = chunk.kind.backend(&self.options.backend_options());
        let read = self.read_chunk(reader.as_mut(), chunk);
        let closed = reader.close();
        let mut cloud = read?;
        closed?;

        let points_read = cloud.len() as u64;
        let stage_outputs = self.pipeline.process(&mut cloud)?;

        let output = self.options.output_path(&chunk.name);
        if let Some(path) = &output {
            self.write_chunk(&cloud, path)?;
        }

        Ok(ChunkResult {
            points_read,
            points_written: if output.is_some() {
                cloud.len() as u64
            } else {
                0
            },
            output,
            stage_outputs,
        })
    }

    /// Load the chunk window into a store, retrying transient IO failures.
    fn read_chunk(&self, backend: &mut dyn FormatBackend, chunk: &Chunk) -> Result<PointCloud> {
        backend.open_chunk(chunk, &[])?;
        let mut header = Header::default();
        backend.populate_header(&mut header, true)?;
        let header = Arc::new(header);
        let expected = backend.p_count().unwrap_or(0) as usize;

        let mut attempt = 0;
        loop {
            match read_all(backend, &header, expected) {
                Ok(cloud) => return Ok(cloud),
                Err(e) if e.is_transient() && attempt < self.options.retries => {
                    attempt += 1;
                    warn!(
                        "Chunk {} ({}): {}, retrying ({}/{})",
                        chunk.id, chunk.name, e, attempt, self.options.retries
                    );
                    backend.reset_accessor()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn write_chunk(&self, cloud: &PointCloud, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io_at(parent, e))?;
        }
        let kind = BackendKind::from_path(path)?;
        let mut writer = kind.backend(&self.options.backend_options());
        writer.create(path)?;
        let written = write_all(writer.as_mut(), cloud);
        let closed = writer.close();
        written?;
        closed?;
        debug!("Wrote {} points to {}", cloud.len(), path.display());
        Ok(())
    }
}

fn read_all(
    backend: &mut dyn FormatBackend,
    header: &Arc<Header>,
    expected: usize,
) -> Result<PointCloud> {
    let mut cloud = PointCloud::with_capacity(Arc::clone(header), expected);
    let mut record = Vec::with_capacity(header.schema.len());
    while backend.read_point(&mut record)? {
        cloud.push(&record)?;
    }
    Ok(cloud)
}

fn write_all(backend: &mut dyn FormatBackend, cloud: &PointCloud) -> Result<()> {
    backend.init(&cloud.to_header())?;
    for point in cloud.points() {
        backend.write_point(point)?;
    }
    Ok(())
}

fn skipped_outcome(chunk: &Chunk) -> ChunkOutcome {
    ChunkOutcome {
        chunk_id: chunk.id,
        chunk_name: chunk.name.clone(),
        source: chunk.path.clone(),
        status: ChunkStatus::Skipped,
        points_read: 0,
        points_written: 0,
        output: None,
        error: None,
        stage_outputs: Vec::new(),
    }
}

#[cfg(feature = "parallel")]
fn dispatch<F: Fn(&Chunk) + Sync>(chunks: &[Chunk], workers: usize, work: &F) -> Result<()> {
    use rayon::prelude::*;

    if workers <= 1 {
        chunks.iter().for_each(work);
        return Ok(());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("chunk-worker-{}", i))
        .build()
        .map_err(|e| PipelineError::io("build worker pool", std::io::Error::other(e)))?;
    pool.install(|| chunks.par_iter().for_each(work));
    Ok(())
}

#[cfg(not(feature = "parallel"))]
fn dispatch<F: Fn(&Chunk)>(chunks: &[Chunk], _workers: usize, work: &F) -> Result<()> {
    chunks.iter().for_each(work);
    Ok(())
}
