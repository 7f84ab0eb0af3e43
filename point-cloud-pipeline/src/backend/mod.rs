//! Format backends: readers and writers for on-disk point representations.
pub mod bbox;
pub mod laz;
pub mod pcd;

use crate::chunking::Chunk;
use crate::error::{PipelineError, Result};
use crate::header::Header;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use self::laz::LasBackend;
pub use self::pcd::PcdBackend;

/// Reader/writer contract shared by every on-disk format.
///
/// An instance is bound to one stream at a time and is never shared between
/// workers. Lifecycle: `Closed -> Reading | Writing -> Initialized -> Closed`.
pub trait FormatBackend {
    /// Bind for reading the record window of a chunk, with extra filters.
    fn open_chunk(&mut self, chunk: &Chunk, filters: &[String]) -> Result<()>;

    /// Bind for reading a whole file.
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Bind for writing, truncating any existing file.
    fn create(&mut self, path: &Path) -> Result<()>;

    /// Parse the source metadata into `header`.
    fn populate_header(&mut self, header: &mut Header, read_first_point: bool) -> Result<()>;

    /// Write the stream header. Must follow `create` and precede `write_point`.
    fn init(&mut self, header: &Header) -> Result<()>;

    /// Read the next record passing the filters. `false` once the window is exhausted.
    fn read_point(&mut self, point: &mut Vec<f64>) -> Result<bool>;

    fn write_point(&mut self, point: &[f64]) -> Result<()>;

    /// Records in the bound window, `None` when unknown without a scan.
    fn p_count(&self) -> Option<u64>;

    /// Rewind to the first record of the window without reopening.
    fn reset_accessor(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Whether record boundaries can be reached without reading preceding records.
    fn supports_random_access(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackendState {
    Closed,
    Reading,
    Writing,
    Initialized,
}

impl BackendState {
    pub(crate) fn require(self, wanted: BackendState, operation: &str) -> Result<()> {
        if self == wanted {
            Ok(())
        } else {
            Err(PipelineError::precondition(format!(
                "{} requires a {:?} backend, current state is {:?}",
                operation, wanted, self
            )))
        }
    }
}

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Pcd,
    Las,
}

impl BackendKind {
    /// Pick a backend from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "pcd" => Ok(BackendKind::Pcd),
            "las" | "laz" => Ok(BackendKind::Las),
            _ => Err(PipelineError::config(format!(
                "unsupported point cloud format: {}",
                path.display()
            ))),
        }
    }

    /// Fresh, unbound backend instance of this kind.
    pub fn backend(&self, options: &BackendOptions) -> Box<dyn FormatBackend> {
        match self {
            BackendKind::Pcd => {
                let mut backend = PcdBackend::new();
                backend.set_binary_mode(options.binary);
                backend.preread_bbox = options.preread_bbox;
                Box::new(backend)
            }
            BackendKind::Las => Box::new(LasBackend::new()),
        }
    }
}

/// Knobs applied to every backend the executor creates.
#[derive(Debug, Clone, Copy)]
pub struct BackendOptions {
    /// Write PCD output in binary rather than ASCII.
    pub binary: bool,
    /// Scan PCD sources for their extent when no side-file is usable.
    pub preread_bbox: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            binary: true,
            preread_bbox: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(
            BackendKind::from_path(Path::new("a/b.PCD")).unwrap(),
            BackendKind::Pcd
        );
        assert_eq!(
            BackendKind::from_path(Path::new("tile.laz")).unwrap(),
            BackendKind::Las
        );
        assert!(matches!(
            BackendKind::from_path(Path::new("tile.xyz")),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn closed_backend_rejects_io() {
        let mut backend = BackendKind::Pcd.backend(&BackendOptions::default());
        let mut row = Vec::new();
        assert!(!backend.is_open());
        assert!(matches!(
            backend.read_point(&mut row),
            Err(PipelineError::Precondition(_))
        ));
        assert!(matches!(
            backend.write_point(&[0.0, 0.0, 0.0]),
            Err(PipelineError::Precondition(_))
        ));
    }
}
