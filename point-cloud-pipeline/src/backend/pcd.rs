//! PCD (Point Cloud Data) backend with ASCII and binary record encodings.
//!
//! The record codec is chosen once per stream: from the `DATA` line when
//! reading, from [`PcdBackend::set_binary_mode`] when writing. Field scale and
//! offset travel in `# SCALE` / `# OFFSET` comment lines, which other PCD
//! readers skip.
use super::bbox;
use super::{BackendState, FormatBackend};
use crate::attribute::{Attribute, AttributeSchema, AttributeType};
use crate::bounds::Bounds;
use crate::chunking::Chunk;
use crate::error::{PipelineError, Result};
use crate::filters::{BoundFilters, Filter};
use crate::header::Header;
use constants::coordinate_system::{DEFAULT_COORDINATE_SCALE, canonical_coordinate_name};
use constants::format::PCD_VERSION;
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Header lines scanned before giving up on finding `DATA`.
const MAX_HEADER_LINES: usize = 64;

/// Width reserved for WIDTH/POINTS values so they can be patched on close.
const COUNT_WIDTH: usize = 20;

type ReadFn = fn(&mut PcdInput) -> Result<bool>;
type WriteFn = fn(&mut PcdOutput, &[f64]) -> Result<()>;

/// One on-disk field and where it lands in the source schema.
#[derive(Debug, Clone)]
struct PcdField {
    data_type: AttributeType,
    scale: f64,
    offset: f64,
    column: usize,
}

impl PcdField {
    fn decode(&self, raw: f64) -> f64 {
        if self.data_type.is_float() {
            raw
        } else {
            raw * self.scale + self.offset
        }
    }
}

#[derive(Debug)]
struct PcdLayout {
    version: String,
    fields: Vec<PcdField>,
    schema: AttributeSchema,
    npoints: Option<u64>,
    binary: bool,
    data_offset: u64,
    record_size: usize,
}

struct PcdInput {
    stream: BufReader<File>,
    fields: Vec<PcdField>,
    record_size: usize,
    line: String,
    bytes: Vec<u8>,
    /// Last decoded record, in source schema order.
    record: Vec<f64>,
}

struct PcdOutput {
    stream: BufWriter<File>,
    path: PathBuf,
    /// Attributes as stored on disk (coordinates widened to float64).
    fields: Vec<Attribute>,
    count_positions: Vec<u64>,
    bounds: Bounds,
    count: u64,
    line: String,
    bytes: Vec<u8>,
}

pub struct PcdBackend {
    state: BackendState,
    path: Option<PathBuf>,
    filters: Vec<Filter>,
    bound_filters: Option<BoundFilters>,
    window_start: u64,
    window_end: Option<u64>,
    position: u64,
    npoints: Option<u64>,
    data_offset: u64,
    input_binary: bool,
    write_binary: bool,
    input: Option<PcdInput>,
    output: Option<PcdOutput>,
    read_record: ReadFn,
    write_record: WriteFn,
    /// Scan the whole file for its extent when no usable side-file exists.
    pub preread_bbox: bool,
}

impl Default for PcdBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PcdBackend {
    pub fn new() -> Self {
        Self {
            state: BackendState::Closed,
            path: None,
            filters: Vec::new(),
            bound_filters: None,
            window_start: 0,
            window_end: None,
            position: 0,
            npoints: None,
            data_offset: 0,
            input_binary: false,
            write_binary: true,
            input: None,
            output: None,
            read_record: read_unbound,
            write_record: write_unbound,
            preread_bbox: true,
        }
    }

    /// Encoding used by the next write stream. Read streams detect their own.
    pub fn set_binary_mode(&mut self, binary: bool) {
        self.write_binary = binary;
    }

    fn bind_input(
        &mut self,
        path: &Path,
        filters: Vec<Filter>,
        start: u64,
        end: Option<u64>,
    ) -> Result<()> {
        self.state.require(BackendState::Closed, "open")?;
        let file = File::open(path).map_err(|e| PipelineError::io_at(path, e))?;

        self.input = Some(PcdInput {
            stream: BufReader::new(file),
            fields: Vec::new(),
            record_size: 0,
            line: String::new(),
            bytes: Vec::new(),
            record: Vec::new(),
        });
        self.path = Some(path.to_path_buf());
        self.filters = filters;
        self.bound_filters = None;
        self.window_start = start;
        self.window_end = end;
        self.position = start;
        self.npoints = None;
        self.read_record = read_unbound;
        self.state = BackendState::Reading;
        Ok(())
    }

    /// Extent and point count from the side-file, a full scan, or the first record.
    fn resolve_extent(
        &mut self,
        path: &Path,
        read_first_point: bool,
    ) -> Result<(Bounds, Option<u64>)> {
        match bbox::read_bbox(path) {
            Ok(Some((bounds, n))) if self.npoints.is_none_or(|p| p == n) => {
                debug!("Using bounding box side-file of {}", path.display());
                return Ok((bounds, Some(n)));
            }
            Ok(Some((_, n))) => warn!(
                "Side-file of {} declares {} points, header declares {:?}; recomputing",
                path.display(),
                n,
                self.npoints
            ),
            Ok(None) => {}
            Err(e) => warn!(
                "Ignoring bounding box side-file of {}: {}",
                path.display(),
                e
            ),
        }

        if self.preread_bbox {
            let (bounds, n) = self.scan_extent()?;
            if let Err(e) = bbox::write_bbox(path, &bounds, n) {
                warn!("Could not cache bounding box of {}: {}", path.display(), e);
            }
            return Ok((bounds, Some(n)));
        }

        let mut bounds = Bounds::new();
        if read_first_point {
            let read = self.read_record;
            let data_offset = self.data_offset;
            let input = self.input_mut()?;
            input
                .stream
                .seek(SeekFrom::Start(data_offset))
                .map_err(|e| PipelineError::io("seek to first point", e))?;
            if read(input)? {
                bounds.update(input.record[0], input.record[1], input.record[2]);
            }
        }
        Ok((bounds, None))
    }

    /// Read every record of the file, ignoring window and filters.
    fn scan_extent(&mut self) -> Result<(Bounds, u64)> {
        let read = self.read_record;
        let data_offset = self.data_offset;
        let limit = self.npoints;
        let input = self.input_mut()?;
        input
            .stream
            .seek(SeekFrom::Start(data_offset))
            .map_err(|e| PipelineError::io("seek to point data", e))?;

        let mut bounds = Bounds::new();
        let mut count = 0u64;
        while limit.is_none_or(|n| count < n) && read(input)? {
            bounds.update(input.record[0], input.record[1], input.record[2]);
            count += 1;
        }
        Ok((bounds, count))
    }

    fn input_mut(&mut self) -> Result<&mut PcdInput> {
        self.input
            .as_mut()
            .ok_or_else(|| PipelineError::precondition("PCD backend has no input stream"))
    }

    fn finish_output(output: &mut PcdOutput) -> Result<()> {
        let count = format!("{:<width$}", output.count, width = COUNT_WIDTH);
        for &position in &output.count_positions {
            output
                .stream
                .seek(SeekFrom::Start(position))
                .and_then(|_| output.stream.write_all(count.as_bytes()))
                .map_err(|e| PipelineError::io_at(&output.path, e))?;
        }
        output
            .stream
            .flush()
            .map_err(|e| PipelineError::io_at(&output.path, e))?;

        if output.count > 0 {
            if let Err(e) = bbox::write_bbox(&output.path, &output.bounds, output.count) {
                warn!(
                    "Could not write bounding box side-file for {}: {}",
                    output.path.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

impl FormatBackend for PcdBackend {
    fn open_chunk(&mut self, chunk: &Chunk, filters: &[String]) -> Result<()> {
        let mut specs = chunk.filter_specs();
        specs.extend(filters.iter().cloned());
        let filters = Filter::parse_all(&specs)?;
        self.bind_input(&chunk.path, filters, chunk.start, chunk.end)
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        self.bind_input(path, Vec::new(), 0, None)
    }

    fn create(&mut self, path: &Path) -> Result<()> {
        self.state.require(BackendState::Closed, "create")?;
        let file = File::create(path).map_err(|e| PipelineError::io_at(path, e))?;
        self.output = Some(PcdOutput {
            stream: BufWriter::new(file),
            path: path.to_path_buf(),
            fields: Vec::new(),
            count_positions: Vec::new(),
            bounds: Bounds::new(),
            count: 0,
            line: String::new(),
            bytes: Vec::new(),
        });
        self.path = Some(path.to_path_buf());
        self.write_record = write_unbound;
        self.state = BackendState::Writing;
        Ok(())
    }

    fn populate_header(&mut self, header: &mut Header, read_first_point: bool) -> Result<()> {
        self.state.require(BackendState::Reading, "populate_header")?;
        let path = self
            .path
            .clone()
            .ok_or_else(|| PipelineError::precondition("PCD backend has no path"))?;

        let input = self.input_mut()?;
        let layout = parse_header(&mut input.stream)
            .map_err(|e| match e {
                PipelineError::Format(msg) => {
                    PipelineError::format(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })?;
        input.fields = layout.fields.clone();
        input.record_size = layout.record_size;
        input.record = vec![0.0; layout.schema.len()];

        let bound = BoundFilters::bind(&self.filters, &layout.schema)?;
        self.read_record = if layout.binary {
            read_binary
        } else {
            read_ascii
        };
        self.input_binary = layout.binary;
        self.data_offset = layout.data_offset;
        self.npoints = layout.npoints;

        let (major, minor) = parse_version(&layout.version);
        header.signature = "PCD".to_string();
        header.version_major = major;
        header.version_minor = minor;
        header.schema = bound.schema().clone();
        for axis in 0..3 {
            if let Some(attribute) = header.schema.get(axis) {
                header.scale[axis] = attribute.scale;
                header.offset[axis] = attribute.offset;
            }
        }
        self.bound_filters = Some(bound);

        let (bounds, counted) = self.resolve_extent(&path, read_first_point)?;
        if self.npoints.is_none() {
            self.npoints = counted;
        }
        header.number_of_points = self.npoints;
        header.bounds = bounds;

        debug!(
            "{}: {} fields, {:?} points, {} data",
            path.display(),
            layout.fields.len(),
            self.npoints,
            if layout.binary { "binary" } else { "ascii" }
        );
        self.reset_accessor()
    }

    fn init(&mut self, header: &Header) -> Result<()> {
        self.state.require(BackendState::Writing, "init")?;
        let binary = self.write_binary;
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| PipelineError::precondition("PCD backend has no output stream"))?;

        output.fields = header
            .schema
            .iter()
            .enumerate()
            .map(|(i, attribute)| {
                let mut field = attribute.clone();
                if i < 3 {
                    field.data_type = AttributeType::Float64;
                }
                field
            })
            .collect();

        let names: Vec<String> = output
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| match i {
                0..=2 => f.name.to_lowercase(),
                _ => f.name.split_whitespace().collect::<Vec<_>>().join("_"),
            })
            .collect();
        let join = |values: Vec<String>| values.join(" ");
        let codes: Vec<(char, usize)> = output
            .fields
            .iter()
            .map(|f| {
                f.data_type.pcd_code().ok_or_else(|| {
                    PipelineError::domain(format!("attribute '{}' has no data type", f.name))
                })
            })
            .collect::<Result<_>>()?;
        let declared = format!(
            "{:<width$}",
            header.number_of_points.unwrap_or(0),
            width = COUNT_WIDTH
        );

        let mut text = format!("# .PCD v{} - Point Cloud Data file format\n", PCD_VERSION);
        text += &format!(
            "# SCALE {}\n",
            join(output.fields.iter().map(|f| f.scale.to_string()).collect())
        );
        text += &format!(
            "# OFFSET {}\n",
            join(output.fields.iter().map(|f| f.offset.to_string()).collect())
        );
        text += &format!("VERSION {}\n", PCD_VERSION);
        text += &format!("FIELDS {}\n", join(names));
        text += &format!(
            "SIZE {}\n",
            join(codes.iter().map(|(_, s)| s.to_string()).collect())
        );
        text += &format!(
            "TYPE {}\n",
            join(codes.iter().map(|(c, _)| c.to_string()).collect())
        );
        text += &format!("COUNT {}\n", join(vec!["1".to_string(); codes.len()]));
        text += "WIDTH ";
        output.count_positions.push(text.len() as u64);
        text += &declared;
        text += "\nHEIGHT 1\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS ";
        output.count_positions.push(text.len() as u64);
        text += &declared;
        text += if binary {
            "\nDATA binary\n"
        } else {
            "\nDATA ascii\n"
        };

        output
            .stream
            .write_all(text.as_bytes())
            .map_err(|e| PipelineError::io_at(&output.path, e))?;

        self.write_record = if binary { write_binary } else { write_ascii };
        self.state = BackendState::Initialized;
        Ok(())
    }

    fn read_point(&mut self, point: &mut Vec<f64>) -> Result<bool> {
        self.state.require(BackendState::Reading, "read_point")?;
        let read = self.read_record;
        let (Some(input), Some(filters)) = (self.input.as_mut(), self.bound_filters.as_ref())
        else {
            return Err(PipelineError::precondition(
                "read_point called before populate_header",
            ));
        };

        loop {
            if self.window_end.is_some_and(|end| self.position >= end) {
                return Ok(false);
            }
            if self.input_binary && self.npoints.is_some_and(|n| self.position >= n) {
                return Ok(false);
            }
            if !read(input)? {
                return Ok(false);
            }
            self.position += 1;
            if filters.accepts(&input.record) {
                filters.project(&input.record, point);
                return Ok(true);
            }
        }
    }

    fn write_point(&mut self, point: &[f64]) -> Result<()> {
        self.state.require(BackendState::Initialized, "write_point")?;
        let write = self.write_record;
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| PipelineError::precondition("PCD backend has no output stream"))?;
        if point.len() != output.fields.len() {
            return Err(PipelineError::precondition(format!(
                "record has {} values, stream expects {}",
                point.len(),
                output.fields.len()
            )));
        }
        write(output, point)?;
        output.bounds.update(point[0], point[1], point[2]);
        output.count += 1;
        Ok(())
    }

    fn p_count(&self) -> Option<u64> {
        let total = self.npoints?;
        let end = self.window_end.map_or(total, |e| e.min(total));
        Some(end.saturating_sub(self.window_start))
    }

    fn reset_accessor(&mut self) -> Result<()> {
        self.state.require(BackendState::Reading, "reset_accessor")?;
        let read = self.read_record;
        let binary = self.input_binary;
        let start = self.window_start;
        let data_offset = self.data_offset;
        let input = self.input_mut()?;
        if input.fields.is_empty() {
            return Err(PipelineError::precondition(
                "reset_accessor called before populate_header",
            ));
        }

        let target = if binary {
            data_offset + start * input.record_size as u64
        } else {
            data_offset
        };
        input
            .stream
            .seek(SeekFrom::Start(target))
            .map_err(|e| PipelineError::io("rewind PCD stream", e))?;
        if !binary {
            for _ in 0..start {
                if !read(input)? {
                    break;
                }
            }
        }
        self.position = start;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let result = match (self.state, self.output.as_mut()) {
            (BackendState::Initialized, Some(output)) => Self::finish_output(output),
            (BackendState::Writing, Some(output)) => output
                .stream
                .flush()
                .map_err(|e| PipelineError::io_at(&output.path, e)),
            _ => Ok(()),
        };
        self.input = None;
        self.output = None;
        self.bound_filters = None;
        self.read_record = read_unbound;
        self.write_record = write_unbound;
        self.state = BackendState::Closed;
        result
    }

    fn is_open(&self) -> bool {
        self.state != BackendState::Closed
    }

    fn supports_random_access(&self) -> bool {
        self.state == BackendState::Reading && self.input_binary && self.bound_filters.is_some()
    }
}

fn parse_version(version: &str) -> (u8, u8) {
    let mut parts = version.trim_start_matches('.').split('.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor)
}

fn parse_list<T: std::str::FromStr>(key: &str, values: &[&str]) -> Result<Vec<T>> {
    values
        .iter()
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| PipelineError::format(format!("invalid {} value '{}'", key, v)))
        })
        .collect()
}

fn parse_header(stream: &mut BufReader<File>) -> Result<PcdLayout> {
    stream
        .seek(SeekFrom::Start(0))
        .map_err(|e| PipelineError::io("rewind PCD header", e))?;

    let mut consumed = 0u64;
    let mut raw = Vec::new();
    let mut version = String::new();
    let mut names: Vec<String> = Vec::new();
    let mut sizes: Vec<usize> = Vec::new();
    let mut types: Vec<char> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut scales: Option<Vec<f64>> = None;
    let mut offsets: Option<Vec<f64>> = None;
    let mut width: Option<u64> = None;
    let mut height: Option<u64> = None;
    let mut points: Option<u64> = None;
    let mut data: Option<String> = None;

    for _ in 0..MAX_HEADER_LINES {
        raw.clear();
        let n = stream
            .read_until(b'\n', &mut raw)
            .map_err(|e| PipelineError::io("read PCD header", e))?;
        if n == 0 {
            break;
        }
        consumed += n as u64;

        let text = String::from_utf8_lossy(&raw);
        let line = text.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            let tokens: Vec<&str> = comment.split_whitespace().collect();
            match tokens.split_first() {
                Some((&"SCALE", values)) => scales = Some(parse_list("SCALE", values)?),
                Some((&"OFFSET", values)) => offsets = Some(parse_list("OFFSET", values)?),
                _ => {}
            }
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (key, values) = match tokens.split_first() {
            Some((key, values)) => (key.to_ascii_uppercase(), values),
            None => continue,
        };
        match key.as_str() {
            "VERSION" => version = values.first().unwrap_or(&"").to_string(),
            "FIELDS" => names = values.iter().map(|s| s.to_string()).collect(),
            "SIZE" => sizes = parse_list("SIZE", values)?,
            "TYPE" => {
                types = values
                    .iter()
                    .map(|t| t.chars().next().unwrap_or('?'))
                    .collect()
            }
            "COUNT" => counts = parse_list("COUNT", values)?,
            "WIDTH" => width = parse_list("WIDTH", values)?.first().copied(),
            "HEIGHT" => height = parse_list("HEIGHT", values)?.first().copied(),
            "POINTS" => points = parse_list("POINTS", values)?.first().copied(),
            "VIEWPOINT" => {}
            "DATA" => {
                data = Some(values.first().unwrap_or(&"").to_lowercase());
                break;
            }
            _ => {
                let shown: String = line.chars().take(32).collect();
                return Err(PipelineError::format(format!(
                    "not a PCD header, unexpected line '{}'",
                    shown
                )));
            }
        }
    }

    if consumed == 0 {
        return Err(PipelineError::format("empty file"));
    }
    let binary = match data.as_deref() {
        Some("ascii") => false,
        Some("binary") => true,
        Some("binary_compressed") => {
            return Err(PipelineError::format(
                "binary_compressed PCD data is not supported",
            ));
        }
        Some(other) => {
            return Err(PipelineError::format(format!(
                "unknown DATA encoding '{}'",
                other
            )));
        }
        None => return Err(PipelineError::format("header has no DATA line")),
    };
    if names.is_empty() {
        return Err(PipelineError::format("header declares no FIELDS"));
    }
    if sizes.len() != names.len() || types.len() != names.len() {
        return Err(PipelineError::format(
            "FIELDS, SIZE and TYPE lengths differ",
        ));
    }
    if counts.iter().any(|&c| c != 1) {
        return Err(PipelineError::format(
            "fields with COUNT other than 1 are not supported",
        ));
    }
    let scales = scales.filter(|s| s.len() == names.len());
    let offsets = offsets.filter(|o| o.len() == names.len());

    let mut coordinate_scale = [DEFAULT_COORDINATE_SCALE; 3];
    let mut coordinate_offset = [0.0; 3];
    let mut axes: [Option<usize>; 3] = [None; 3];
    for (i, name) in names.iter().enumerate() {
        let axis = match canonical_coordinate_name(name) {
            Some("X") => 0,
            Some("Y") => 1,
            Some("Z") => 2,
            _ => continue,
        };
        if axes[axis].replace(i).is_some() {
            return Err(PipelineError::format(format!("duplicate field '{}'", name)));
        }
        if let Some(s) = &scales {
            coordinate_scale[axis] = s[i];
        }
        if let Some(o) = &offsets {
            coordinate_offset[axis] = o[i];
        }
    }
    if axes.iter().any(Option::is_none) {
        return Err(PipelineError::format("header lacks x, y or z field"));
    }

    let mut schema = AttributeSchema::with_coordinates(coordinate_scale, coordinate_offset);
    let mut fields = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let data_type = AttributeType::from_pcd_code(types[i], sizes[i]);
        if data_type == AttributeType::NoType {
            return Err(PipelineError::format(format!(
                "field '{}' has unsupported type {}{}",
                name, types[i], sizes[i]
            )));
        }
        let scale = scales.as_ref().map_or(1.0, |s| s[i]);
        let offset = offsets.as_ref().map_or(0.0, |o| o[i]);
        let column = match axes.iter().position(|a| *a == Some(i)) {
            Some(axis) => axis,
            None => schema
                .push(Attribute::with_quantization(name, data_type, scale, offset, ""))
                .map_err(|e| PipelineError::format(e.to_string()))?,
        };
        fields.push(PcdField {
            data_type,
            scale,
            offset,
            column,
        });
    }

    let npoints = points.or(match (width, height) {
        (Some(w), Some(h)) => Some(w * h),
        _ => None,
    });

    Ok(PcdLayout {
        version,
        record_size: sizes.iter().sum(),
        fields,
        schema,
        npoints,
        binary,
        data_offset: consumed,
    })
}

fn read_unbound(_input: &mut PcdInput) -> Result<bool> {
    Err(PipelineError::precondition("PCD stream is not bound"))
}

fn write_unbound(_output: &mut PcdOutput, _point: &[f64]) -> Result<()> {
    Err(PipelineError::precondition("PCD stream is not initialised"))
}

fn read_ascii(input: &mut PcdInput) -> Result<bool> {
    loop {
        input.line.clear();
        let n = input
            .stream
            .read_line(&mut input.line)
            .map_err(|e| PipelineError::io("read PCD record", e))?;
        if n == 0 {
            return Ok(false);
        }
        if !input.line.trim().is_empty() {
            break;
        }
    }

    let mut tokens = input.line.split_whitespace();
    for field in &input.fields {
        let token = tokens
            .next()
            .ok_or_else(|| PipelineError::format("ASCII record has too few values"))?;
        let raw = token
            .parse::<f64>()
            .map_err(|_| PipelineError::format(format!("'{}' is not a number", token)))?;
        input.record[field.column] = field.decode(raw);
    }
    if tokens.next().is_some() {
        return Err(PipelineError::format("ASCII record has too many values"));
    }
    Ok(true)
}

fn read_binary(input: &mut PcdInput) -> Result<bool> {
    let at_end = input
        .stream
        .fill_buf()
        .map_err(|e| PipelineError::io("read PCD record", e))?
        .is_empty();
    if at_end {
        return Ok(false);
    }

    input.bytes.resize(input.record_size, 0);
    input.stream.read_exact(&mut input.bytes).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            PipelineError::format("truncated binary record")
        } else {
            PipelineError::io("read PCD record", e)
        }
    })?;

    let mut at = 0;
    for field in &input.fields {
        let size = field.data_type.size();
        let raw = field.data_type.decode_le(&input.bytes[at..at + size]);
        input.record[field.column] = field.decode(raw);
        at += size;
    }
    Ok(true)
}

fn write_ascii(output: &mut PcdOutput, point: &[f64]) -> Result<()> {
    output.line.clear();
    for (i, field) in output.fields.iter().enumerate() {
        if i > 0 {
            output.line.push(' ');
        }
        let raw = field.quantize(point[i]);
        let token = match field.data_type {
            AttributeType::Float32 => (raw as f32).to_string(),
            AttributeType::Float64 => raw.to_string(),
            AttributeType::UInt64 => (raw as u64).to_string(),
            _ => (raw as i64).to_string(),
        };
        output.line.push_str(&token);
    }
    output.line.push('\n');
    output
        .stream
        .write_all(output.line.as_bytes())
        .map_err(|e| PipelineError::io_at(&output.path, e))
}

fn write_binary(output: &mut PcdOutput, point: &[f64]) -> Result<()> {
    output.bytes.clear();
    for (i, field) in output.fields.iter().enumerate() {
        field
            .data_type
            .encode_le(field.quantize(point[i]), &mut output.bytes);
    }
    output
        .stream
        .write_all(&output.bytes)
        .map_err(|e| PipelineError::io_at(&output.path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const ASCII_CLOUD: &str = "\
# .PCD v0.7 - Point Cloud Data file format
VERSION 0.7
FIELDS x y z intensity
SIZE 4 4 4 2
TYPE F F F U
COUNT 1 1 1 1
WIDTH 3
HEIGHT 1
VIEWPOINT 0 0 0 1 0 0 0
POINTS 3
DATA ascii
1.5 2.5 3.5 10
4 5 6 20
-1 -2 -3 30
";

    fn read_all(backend: &mut PcdBackend) -> Vec<Vec<f64>> {
        let mut rows = Vec::new();
        let mut row = Vec::new();
        while backend.read_point(&mut row).unwrap() {
            rows.push(row.clone());
        }
        rows
    }

    #[test]
    fn reads_ascii_cloud() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.pcd");
        fs::write(&path, ASCII_CLOUD).unwrap();

        let mut backend = PcdBackend::new();
        backend.open(&path).unwrap();
        let mut header = Header::default();
        backend.populate_header(&mut header, false).unwrap();

        assert_eq!(header.signature, "PCD");
        assert_eq!((header.version_major, header.version_minor), (0, 7));
        assert_eq!(header.number_of_points, Some(3));
        assert_eq!(header.schema.len(), 4);
        assert_eq!(header.bounds.min_z, -3.0);
        assert_eq!(backend.p_count(), Some(3));
        assert!(!backend.supports_random_access());

        let rows = read_all(&mut backend);
        assert_eq!(rows[0], vec![1.5, 2.5, 3.5, 10.0]);
        assert_eq!(rows.len(), 3);
        backend.close().unwrap();
        assert!(bbox::side_file_path(&path).exists());
    }

    #[test]
    fn field_order_is_normalised_to_coordinates_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.pcd");
        fs::write(
            &path,
            "VERSION 0.7\nFIELDS intensity z y x\nSIZE 1 8 8 8\nTYPE U F F F\nPOINTS 1\nDATA ascii\n7 3 2 1\n",
        )
        .unwrap();

        let mut backend = PcdBackend::new();
        backend.open(&path).unwrap();
        let mut header = Header::default();
        backend.populate_header(&mut header, false).unwrap();
        assert_eq!(read_all(&mut backend), vec![vec![1.0, 2.0, 3.0, 7.0]]);
    }

    #[test]
    fn malformed_headers_are_format_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            ("junk.pcd", "abc"),
            ("empty.pcd", ""),
            ("nodata.pcd", "VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\n"),
            (
                "compressed.pcd",
                "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nDATA binary_compressed\n",
            ),
            ("noxyz.pcd", "FIELDS a b\nSIZE 4 4\nTYPE F F\nDATA ascii\n"),
            ("badtype.pcd", "FIELDS x y z\nSIZE 4 4 3\nTYPE F F F\nDATA ascii\n"),
        ];
        for (name, content) in cases {
            let path = dir.path().join(name);
            fs::write(&path, content).unwrap();
            let mut backend = PcdBackend::new();
            backend.open(&path).unwrap();
            let result = backend.populate_header(&mut Header::default(), false);
            assert!(
                matches!(result, Err(PipelineError::Format(_))),
                "{name}: {result:?}"
            );
        }
    }

    #[test]
    fn corrupt_side_file_falls_back_to_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.pcd");
        fs::write(&path, ASCII_CLOUD).unwrap();
        fs::write(bbox::side_file_path(&path), "min_x what\n").unwrap();

        let mut backend = PcdBackend::new();
        backend.open(&path).unwrap();
        let mut header = Header::default();
        backend.populate_header(&mut header, false).unwrap();
        assert_eq!(header.bounds.max_x, 4.0);

        let (bounds, n) = bbox::read_bbox(&path).unwrap().unwrap();
        assert_eq!(n, 3);
        assert_eq!(bounds, header.bounds);
    }

    #[test]
    fn first_point_seeds_bounds_without_preread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.pcd");
        fs::write(&path, ASCII_CLOUD).unwrap();

        let mut backend = PcdBackend::new();
        backend.preread_bbox = false;
        backend.open(&path).unwrap();
        let mut header = Header::default();
        backend.populate_header(&mut header, true).unwrap();
        assert_eq!(header.bounds.min_x, 1.5);
        assert_eq!(header.bounds.max_x, 1.5);
        assert!(!bbox::side_file_path(&path).exists());
        assert_eq!(read_all(&mut backend).len(), 3);
    }

    #[test]
    fn write_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = PcdBackend::new();
        backend.create(&dir.path().join("out.pcd")).unwrap();
        assert!(matches!(
            backend.write_point(&[0.0, 0.0, 0.0]),
            Err(PipelineError::Precondition(_))
        ));
        assert!(matches!(
            backend.read_point(&mut Vec::new()),
            Err(PipelineError::Precondition(_))
        ));
        backend.close().unwrap();
        assert!(!backend.is_open());
    }
}
