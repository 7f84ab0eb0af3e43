//! Bounding-box side-file next to a point file.
//!
//! Plain `key value` lines holding the point count and extent, so the extent
//! of a source without explicit bounds need not be recomputed on every read.
use crate::bounds::Bounds;
use crate::error::{PipelineError, Result};
use constants::format::BBOX_SIDE_FILE_SUFFIX;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Side-file location for a point file: the full file name plus the suffix.
pub fn side_file_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BBOX_SIDE_FILE_SUFFIX);
    PathBuf::from(name)
}

/// Write the side-file of `path` through a temporary file renamed into place,
/// so concurrent readers see either the old or the new content.
pub fn write_bbox(path: &Path, bounds: &Bounds, npoints: u64) -> Result<()> {
    let side_file = side_file_path(path);
    let content = format!(
        "npoints {}\nmin_x {}\nmin_y {}\nmin_z {}\nmax_x {}\nmax_y {}\nmax_z {}\n",
        npoints,
        bounds.min_x,
        bounds.min_y,
        bounds.min_z,
        bounds.max_x,
        bounds.max_y,
        bounds.max_z
    );

    let mut temp = side_file.clone().into_os_string();
    temp.push(format!(
        ".{}-{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let temp = PathBuf::from(temp);
    fs::write(&temp, content).map_err(|e| PipelineError::io_at(&temp, e))?;
    fs::rename(&temp, &side_file).map_err(|e| {
        let _ = fs::remove_file(&temp);
        PipelineError::io_at(&side_file, e)
    })
}

/// Read the side-file of `path`. `Ok(None)` if there is none, `Format` if it is unreadable.
pub fn read_bbox(path: &Path) -> Result<Option<(Bounds, u64)>> {
    let side_file = side_file_path(path);
    let content = match fs::read_to_string(&side_file) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PipelineError::io_at(&side_file, e)),
    };

    let mut entries = HashMap::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| PipelineError::format(format!("bad side-file line '{}'", line)))?;
        entries.insert(key, value.trim());
    }

    let number = |key: &str| -> Result<f64> {
        entries
            .get(key)
            .ok_or_else(|| PipelineError::format(format!("side-file misses '{}'", key)))?
            .parse::<f64>()
            .map_err(|_| PipelineError::format(format!("side-file value of '{}' is invalid", key)))
    };

    let npoints = entries
        .get("npoints")
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| PipelineError::format("side-file misses a valid 'npoints'"))?;
    let bounds = Bounds {
        min_x: number("min_x")?,
        min_y: number("min_y")?,
        min_z: number("min_z")?,
        max_x: number("max_x")?,
        max_y: number("max_y")?,
        max_z: number("max_z")?,
    };
    if npoints > 0 && bounds.is_empty() {
        return Err(PipelineError::format("side-file extent is inverted"));
    }

    Ok(Some((bounds, npoints)))
}
