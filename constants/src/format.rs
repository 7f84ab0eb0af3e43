/// PCD version written into generated headers.
pub const PCD_VERSION: &str = "0.7";

/// Suffix appended to a point file name to locate its bounding-box side-file.
pub const BBOX_SIDE_FILE_SUFFIX: &str = ".bbox";

/// Placeholder in output templates replaced by the chunk name.
pub const OUTPUT_TEMPLATE_WILDCARD: char = '*';
