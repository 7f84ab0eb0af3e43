//! Partitioning of input files into independently processable chunks.
use crate::backend::{BackendKind, BackendOptions};
use crate::bounds::Bounds;
use crate::error::Result;
use crate::header::Header;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A record window of one input file plus the filters applying to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: usize,
    /// Output name: the file stem, suffixed with the part number for sub-file chunks.
    pub name: String,
    pub path: PathBuf,
    pub kind: BackendKind,
    /// First record index of the window.
    pub start: u64,
    /// One past the last record index, `None` for "to the end of the file".
    pub end: Option<u64>,
    pub filters: Vec<String>,
    pub region: Option<Bounds>,
}

impl Chunk {
    /// Filter flags for this chunk, the query region included.
    pub fn filter_specs(&self) -> Vec<String> {
        let mut specs = self.filters.clone();
        if let Some(region) = &self.region {
            specs.push(format!(
                "-keep_xy {} {} {} {}",
                region.min_x, region.min_y, region.max_x, region.max_y
            ));
        }
        specs
    }

    /// Records in the window, when its end is known.
    pub fn record_count(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkingOptions {
    /// Records per sub-file chunk. 0 keeps one chunk per file.
    pub chunk_size: u64,
    /// Filter flags applied to every chunk.
    pub filters: Vec<String>,
    /// Planar query region. Files whose extent misses it are skipped.
    pub region: Option<Bounds>,
}

/// Chunks of a set of input files, numbered in input order.
#[derive(Debug, Clone)]
pub struct ChunkManager {
    chunks: Vec<Chunk>,
}

impl ChunkManager {
    /// Partition the given files.
    ///
    /// Unsupported extensions are configuration errors. A file whose header
    /// cannot be read still yields one whole-file chunk, so the failure is
    /// reported against that chunk when it is processed.
    pub fn new<P: AsRef<Path>>(files: &[P], options: &ChunkingOptions) -> Result<Self> {
        let mut chunks = Vec::new();
        let mut names = HashSet::new();
        for file in files {
            let path = file.as_ref();
            let kind = BackendKind::from_path(path)?;
            let stem = path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();

            let need_extent = options.region.is_some() || options.chunk_size > 0;
            let inspected = inspect_file(path, kind, need_extent);
            if let (Ok((header, _, _)), Some(region)) = (&inspected, &options.region) {
                if !header.bounds.is_empty() && !header.bounds.intersects_xy(region) {
                    info!("Skipping {}: outside the query region", path.display());
                    continue;
                }
            }

            let windows = match inspected {
                Ok((_, Some(count), true)) if options.chunk_size > 0 && count > options.chunk_size => {
                    split_range(count, options.chunk_size)
                }
                Ok(_) => vec![(0, None)],
                Err(e) => {
                    warn!("Could not read header of {}: {}", path.display(), e);
                    vec![(0, None)]
                }
            };

            let parts = windows.len();
            for (part, (start, end)) in windows.into_iter().enumerate() {
                let id = chunks.len();
                let wanted = if parts > 1 {
                    format!("{}_{}", stem, part)
                } else {
                    stem.clone()
                };
                let mut name = wanted.clone();
                while names.contains(&name) {
                    name = format!("{}_{}", name, id);
                }
                if name != wanted {
                    warn!(
                        "Chunk name '{}' is taken, using '{}' for {}",
                        wanted,
                        name,
                        path.display()
                    );
                }
                names.insert(name.clone());
                chunks.push(Chunk {
                    id,
                    name,
                    path: path.to_path_buf(),
                    kind,
                    start,
                    end,
                    filters: options.filters.clone(),
                    region: options.region,
                });
            }
            debug!("{}: {} chunk(s)", path.display(), parts);
        }

        Ok(Self { chunks })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Header, record count and random-access support of a file.
///
/// Sources without a stored extent are only scanned when `need_extent` is set.
/// The scan caches the extent in a side-file, so the chunks of a split file
/// find it there instead of scanning the whole file each.
fn inspect_file(
    path: &Path,
    kind: BackendKind,
    need_extent: bool,
) -> Result<(Header, Option<u64>, bool)> {
    let options = BackendOptions {
        preread_bbox: need_extent,
        ..BackendOptions::default()
    };
    let mut backend = kind.backend(&options);
    backend.open(path)?;
    let mut header = Header::default();
    let opened = backend.populate_header(&mut header, false).map(|_| {
        (
            backend.p_count(),
            backend.supports_random_access(),
        )
    });
    backend.close()?;
    let (count, random_access) = opened?;
    Ok((header, count, random_access))
}

/// Record windows of at most `size` records covering `0..count`.
fn split_range(count: u64, size: u64) -> Vec<(u64, Option<u64>)> {
    (0..count.div_ceil(size))
        .map(|i| {
            let start = i * size;
            (start, Some((start + size).min(count)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::fs;

    fn write_binary_pcd(path: &Path, n: usize) {
        let mut bytes = format!(
            "VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH {n}\nHEIGHT 1\nPOINTS {n}\nDATA binary\n"
        )
        .into_bytes();
        for i in 0..n {
            for v in [i as f32, 0.0, 1.0] {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn split_range_covers_everything_once() {
        assert_eq!(
            split_range(10, 4),
            vec![(0, Some(4)), (4, Some(8)), (8, Some(10))]
        );
        assert_eq!(split_range(4, 4), vec![(0, Some(4))]);
    }

    #[test]
    fn binary_files_are_split_when_large() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.pcd");
        write_binary_pcd(&path, 10);

        let options = ChunkingOptions {
            chunk_size: 4,
            ..Default::default()
        };
        let manager = ChunkManager::new(&[&path], &options).unwrap();
        let names: Vec<&str> = manager.chunks().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["tile_0", "tile_1", "tile_2"]);
        assert_eq!(manager.chunks()[2].record_count(), Some(2));
        assert_eq!(manager.chunks()[1].id, 1);
        assert!(crate::backend::bbox::side_file_path(&path).exists());
    }

    #[test]
    fn ascii_and_unreadable_files_stay_whole() {
        let dir = tempfile::tempdir().unwrap();
        let ascii = dir.path().join("ascii.pcd");
        fs::write(
            &ascii,
            "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nPOINTS 3\nDATA ascii\n0 0 0\n1 1 1\n2 2 2\n",
        )
        .unwrap();
        let broken = dir.path().join("broken.pcd");
        fs::write(&broken, "abc").unwrap();

        let options = ChunkingOptions {
            chunk_size: 1,
            ..Default::default()
        };
        let manager = ChunkManager::new(&[&ascii, &broken], &options).unwrap();
        assert_eq!(manager.len(), 2);
        assert!(manager.chunks().iter().all(|c| c.start == 0 && c.end.is_none()));
    }

    #[test]
    fn same_stem_files_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for sub in ["a", "b", "c"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
            let path = dir.path().join(sub).join("tile.pcd");
            write_binary_pcd(&path, 3);
            paths.push(path);
        }

        let manager = ChunkManager::new(&paths, &ChunkingOptions::default()).unwrap();
        let names: Vec<&str> = manager.chunks().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["tile", "tile_1", "tile_2"]);
    }

    #[test]
    fn unknown_extension_is_a_config_error() {
        let result = ChunkManager::new(&["points.xyz"], &ChunkingOptions::default());
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn region_prunes_files_and_becomes_a_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.pcd");
        write_binary_pcd(&path, 5);

        let far = ChunkingOptions {
            region: Some(Bounds::xy(100.0, 100.0, 200.0, 200.0)),
            ..Default::default()
        };
        assert!(ChunkManager::new(&[&path], &far).unwrap().is_empty());

        let near = ChunkingOptions {
            region: Some(Bounds::xy(0.0, 0.0, 2.0, 2.0)),
            ..Default::default()
        };
        let manager = ChunkManager::new(&[&path], &near).unwrap();
        assert_eq!(manager.chunks()[0].filter_specs(), vec!["-keep_xy 0 0 2 2"]);
    }
}
