//! LAS/LAZ backend on top of the `las` crate.
//!
//! Standard point record fields map to their LAS counterparts. Any other
//! attribute travels in the per-point extra bytes, described by an
//! extra-bytes VLR.
use super::{BackendState, FormatBackend};
use crate::attribute::{Attribute, AttributeSchema, AttributeType};
use crate::bounds::Bounds;
use crate::chunking::Chunk;
use crate::error::{PipelineError, Result};
use crate::filters::{BoundFilters, Filter};
use crate::header::Header;
use las::{Color, Reader, Vlr, Writer};
use log::{debug, warn};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Standard LAS point record fields exposed as attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LasField {
    X,
    Y,
    Z,
    Intensity,
    ReturnNumber,
    NumberOfReturns,
    Classification,
    UserData,
    PointSourceId,
    ScanAngle,
    Withheld,
    Synthetic,
    Keypoint,
    Overlap,
    GpsTime,
    Red,
    Green,
    Blue,
    Nir,
}

impl LasField {
    const CORE: [LasField; 14] = [
        LasField::X,
        LasField::Y,
        LasField::Z,
        LasField::Intensity,
        LasField::ReturnNumber,
        LasField::NumberOfReturns,
        LasField::Classification,
        LasField::UserData,
        LasField::PointSourceId,
        LasField::ScanAngle,
        LasField::Withheld,
        LasField::Synthetic,
        LasField::Keypoint,
        LasField::Overlap,
    ];
    const COLOR: [LasField; 3] = [LasField::Red, LasField::Green, LasField::Blue];

    fn name(self) -> &'static str {
        match self {
            LasField::X => "X",
            LasField::Y => "Y",
            LasField::Z => "Z",
            LasField::Intensity => "Intensity",
            LasField::ReturnNumber => "ReturnNumber",
            LasField::NumberOfReturns => "NumberOfReturns",
            LasField::Classification => "Classification",
            LasField::UserData => "UserData",
            LasField::PointSourceId => "PointSourceID",
            LasField::ScanAngle => "ScanAngle",
            LasField::Withheld => "Withheld",
            LasField::Synthetic => "Synthetic",
            LasField::Keypoint => "Keypoint",
            LasField::Overlap => "Overlap",
            LasField::GpsTime => "gpstime",
            LasField::Red => "R",
            LasField::Green => "G",
            LasField::Blue => "B",
            LasField::Nir => "NIR",
        }
    }

    fn data_type(self) -> AttributeType {
        match self {
            LasField::X | LasField::Y | LasField::Z => AttributeType::Int32,
            LasField::Intensity
            | LasField::PointSourceId
            | LasField::Red
            | LasField::Green
            | LasField::Blue
            | LasField::Nir => AttributeType::UInt16,
            LasField::ScanAngle => AttributeType::Float32,
            LasField::GpsTime => AttributeType::Float64,
            _ => AttributeType::UInt8,
        }
    }

    fn description(self) -> &'static str {
        match self {
            LasField::X | LasField::Y | LasField::Z => "",
            LasField::Intensity => "Pulse return magnitude",
            LasField::ReturnNumber => "Pulse return number",
            LasField::NumberOfReturns => "Total number of returns for a given pulse",
            LasField::Classification => "ASPRS classification",
            LasField::UserData => "Used at the user's discretion",
            LasField::PointSourceId => "Source from which this point originated",
            LasField::ScanAngle => "Rounded angle at which the laser pulse was output",
            LasField::Withheld => "Point should not be included in processing",
            LasField::Synthetic => "Point created by a technique other than sensing",
            LasField::Keypoint => "Point is a model key-point",
            LasField::Overlap => "Point is within the overlap region",
            LasField::GpsTime => "Time tag value at which the point was observed",
            LasField::Red => "Red image channel",
            LasField::Green => "Green image channel",
            LasField::Blue => "Blue image channel",
            LasField::Nir => "Near infrared channel",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        let name = constants::coordinate_system::canonical_coordinate_name(name).unwrap_or(name);
        LasField::CORE
            .iter()
            .chain([LasField::GpsTime, LasField::Nir].iter())
            .chain(LasField::COLOR.iter())
            .copied()
            .find(|f| f.name() == name)
    }

    fn read(self, point: &las::Point) -> f64 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            LasField::X => point.x,
            LasField::Y => point.y,
            LasField::Z => point.z,
            LasField::Intensity => point.intensity as f64,
            LasField::ReturnNumber => point.return_number as f64,
            LasField::NumberOfReturns => point.number_of_returns as f64,
            LasField::Classification => u8::from(point.classification) as f64,
            LasField::UserData => point.user_data as f64,
            LasField::PointSourceId => point.point_source_id as f64,
            LasField::ScanAngle => point.scan_angle as f64,
            LasField::Withheld => flag(point.is_withheld),
            LasField::Synthetic => flag(point.is_synthetic),
            LasField::Keypoint => flag(point.is_key_point),
            LasField::Overlap => flag(point.is_overlap),
            LasField::GpsTime => point.gps_time.unwrap_or(0.0),
            LasField::Red => point.color.map_or(0.0, |c| c.red as f64),
            LasField::Green => point.color.map_or(0.0, |c| c.green as f64),
            LasField::Blue => point.color.map_or(0.0, |c| c.blue as f64),
            LasField::Nir => point.nir.unwrap_or(0) as f64,
        }
    }

    fn write(self, point: &mut las::Point, value: f64) -> Result<()> {
        fn color(point: &mut las::Point) -> &mut Color {
            point.color.get_or_insert_with(|| Color::new(0, 0, 0))
        }
        match self {
            LasField::X => point.x = value,
            LasField::Y => point.y = value,
            LasField::Z => point.z = value,
            LasField::Intensity => point.intensity = value as u16,
            LasField::ReturnNumber => point.return_number = value as u8,
            LasField::NumberOfReturns => point.number_of_returns = value as u8,
            LasField::Classification => {
                point.classification = las::point::Classification::new(value as u8)?
            }
            LasField::UserData => point.user_data = value as u8,
            LasField::PointSourceId => point.point_source_id = value as u16,
            LasField::ScanAngle => point.scan_angle = value as f32,
            LasField::Withheld => point.is_withheld = value != 0.0,
            LasField::Synthetic => point.is_synthetic = value != 0.0,
            LasField::Keypoint => point.is_key_point = value != 0.0,
            LasField::Overlap => point.is_overlap = value != 0.0,
            LasField::GpsTime => point.gps_time = Some(value),
            LasField::Red => color(point).red = value as u16,
            LasField::Green => color(point).green = value as u16,
            LasField::Blue => color(point).blue = value as u16,
            LasField::Nir => point.nir = Some(value as u16),
        }
        Ok(())
    }
}

/// Fields present for a point format, in schema order.
fn fields_for(format: &las::point::Format) -> Vec<LasField> {
    let mut fields = LasField::CORE.to_vec();
    if format.has_gps_time {
        fields.push(LasField::GpsTime);
    }
    if format.has_color {
        fields.extend(LasField::COLOR);
    }
    if format.has_nir {
        fields.push(LasField::Nir);
    }
    fields
}

/// Smallest legacy-compatible point format carrying the given fields.
fn guess_point_format(fields: &[LasField]) -> u8 {
    let has = |f: LasField| fields.contains(&f);
    let gps = has(LasField::GpsTime);
    let rgb = LasField::COLOR.iter().any(|&f| has(f));
    if has(LasField::Nir) {
        8
    } else if gps && rgb {
        3
    } else if rgb {
        2
    } else if gps {
        1
    } else {
        0
    }
}

const EXTRA_BYTES_USER_ID: &str = "LASF_Spec";
const EXTRA_BYTES_RECORD_ID: u16 = 4;
const DESCRIPTOR_SIZE: usize = 192;
const DESCRIPTOR_TEXT: usize = 32;
const OPTION_SCALE: u8 = 1 << 3;
const OPTION_OFFSET: u8 = 1 << 4;

/// Attribute stored in the extra bytes of each point record.
#[derive(Debug, Clone, PartialEq)]
struct ExtraField {
    attribute: Attribute,
    /// Byte offset inside the point's extra bytes.
    offset: usize,
}

impl ExtraField {
    fn read(&self, extra_bytes: &[u8]) -> Result<f64> {
        let end = self.offset + self.attribute.data_type.size();
        let bytes = extra_bytes.get(self.offset..end).ok_or_else(|| {
            PipelineError::format(format!(
                "point has {} extra bytes, '{}' needs {}",
                extra_bytes.len(),
                self.attribute.name,
                end
            ))
        })?;
        Ok(self
            .attribute
            .dequantize(self.attribute.data_type.decode_le(bytes)))
    }
}

fn put_text(slot: &mut [u8], text: &str) {
    let len = text.len().min(slot.len());
    slot[..len].copy_from_slice(&text.as_bytes()[..len]);
}

fn get_text(slot: &[u8]) -> String {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).trim().to_string()
}

fn get_f64(descriptor: &[u8], at: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&descriptor[at..at + 8]);
    f64::from_le_bytes(bytes)
}

/// Extra-bytes VLR payload describing `attributes` in record order.
fn encode_descriptors(attributes: &[Attribute]) -> Result<Vec<u8>> {
    let mut data = vec![0u8; attributes.len() * DESCRIPTOR_SIZE];
    for (attribute, descriptor) in attributes.iter().zip(data.chunks_exact_mut(DESCRIPTOR_SIZE)) {
        let code = attribute.data_type.las_code().ok_or_else(|| {
            PipelineError::domain(format!("attribute '{}' has no type", attribute.name))
        })?;
        if attribute.name.len() > DESCRIPTOR_TEXT {
            return Err(PipelineError::format(format!(
                "attribute name '{}' is longer than {} bytes",
                attribute.name, DESCRIPTOR_TEXT
            )));
        }
        descriptor[2] = code;
        put_text(&mut descriptor[4..36], &attribute.name);
        if !attribute.data_type.is_float() {
            descriptor[3] = OPTION_SCALE | OPTION_OFFSET;
            descriptor[112..120].copy_from_slice(&attribute.scale.to_le_bytes());
            descriptor[136..144].copy_from_slice(&attribute.offset.to_le_bytes());
        }
        put_text(&mut descriptor[160..192], &attribute.description);
    }
    Ok(data)
}

/// Parse extra-bytes descriptors. Undocumented or array entries are skipped
/// but still advance the byte offset of the fields that follow.
fn decode_descriptors(data: &[u8], path: &Path) -> Vec<ExtraField> {
    let mut fields = Vec::new();
    let mut offset = 0;
    for descriptor in data.chunks_exact(DESCRIPTOR_SIZE) {
        let code = descriptor[2];
        let options = descriptor[3];
        let name = get_text(&descriptor[4..36]);
        let data_type = AttributeType::from_las_code(code);
        if data_type == AttributeType::NoType {
            let size = match code {
                0 => options as usize,
                11..=30 => {
                    let element = AttributeType::from_las_code((code - 1) % 10 + 1);
                    element.size() * ((code as usize - 1) / 10 + 1)
                }
                _ => 0,
            };
            warn!(
                "{}: extra bytes '{}' of type {} are not read",
                path.display(),
                name,
                code
            );
            offset += size;
            continue;
        }

        let scale = if options & OPTION_SCALE != 0 {
            get_f64(descriptor, 112)
        } else {
            1.0
        };
        let value_offset = if options & OPTION_OFFSET != 0 {
            get_f64(descriptor, 136)
        } else {
            0.0
        };
        let description = get_text(&descriptor[160..192]);
        fields.push(ExtraField {
            attribute: Attribute::with_quantization(
                &name,
                data_type,
                if scale == 0.0 { 1.0 } else { scale },
                value_offset,
                &description,
            ),
            offset,
        });
        offset += data_type.size();
    }
    fields
}

fn is_extra_bytes_vlr(vlr: &Vlr) -> bool {
    vlr.user_id.trim_end_matches('\0') == EXTRA_BYTES_USER_ID
        && vlr.record_id == EXTRA_BYTES_RECORD_ID
}

struct LasInput {
    reader: Reader,
    fields: Vec<LasField>,
    extras: Vec<ExtraField>,
    record: Vec<f64>,
}

struct LasOutput {
    writer: Option<Writer<BufWriter<File>>>,
    path: PathBuf,
    /// Schema column feeding each LAS field.
    columns: Vec<(LasField, usize)>,
    /// Schema column feeding each extra-bytes attribute.
    extras: Vec<(Attribute, usize)>,
    format: las::point::Format,
}

pub struct LasBackend {
    state: BackendState,
    path: Option<PathBuf>,
    filters: Vec<Filter>,
    bound_filters: Option<BoundFilters>,
    window_start: u64,
    window_end: Option<u64>,
    position: u64,
    npoints: Option<u64>,
    input: Option<LasInput>,
    output: Option<LasOutput>,
}

impl Default for LasBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LasBackend {
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
            input: None,
            output: None,
        }
    }

    /// Open a LAS or LAZ reader for the file.
    fn create_reader(path: &Path) -> Result<Reader> {
        let file = File::open(path).map_err(|e| PipelineError::io_at(path, e))?;
        Ok(Reader::new(BufReader::new(file))?)
    }

    fn bind_input(
        &mut self,
        path: &Path,
        filters: Vec<Filter>,
        start: u64,
        end: Option<u64>,
    ) -> Result<()> {
        self.state.require(BackendState::Closed, "open")?;
        let reader = Self::create_reader(path)?;
        let las_header = reader.header();
        let fields = fields_for(las_header.point_format());
        let extra_bytes = las_header.point_format().extra_bytes as usize;
        let extras = match las_header
            .vlrs()
            .iter()
            .chain(las_header.evlrs())
            .find(|vlr| is_extra_bytes_vlr(vlr))
        {
            Some(vlr) => decode_descriptors(&vlr.data, path)
                .into_iter()
                .filter(|extra| {
                    let fits = extra.offset + extra.attribute.data_type.size() <= extra_bytes;
                    if !fits {
                        warn!(
                            "{}: extra bytes '{}' exceed the point record",
                            path.display(),
                            extra.attribute.name
                        );
                    }
                    fits
                })
                .collect(),
            None => Vec::new(),
        };

        self.input = Some(LasInput {
            reader,
            record: vec![0.0; fields.len() + extras.len()],
            fields,
            extras,
        });
        self.path = Some(path.to_path_buf());
        self.filters = filters;
        self.bound_filters = None;
        self.window_start = start;
        self.window_end = end;
        self.position = start;
        self.state = BackendState::Reading;
        Ok(())
    }

    fn input_mut(&mut self) -> Result<&mut LasInput> {
        self.input
            .as_mut()
            .ok_or_else(|| PipelineError::precondition("LAS backend has no input stream"))
    }
}

impl FormatBackend for LasBackend {
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
        // The las writer needs the header up front, so the file is created in `init`.
        self.output = Some(LasOutput {
            writer: None,
            path: path.to_path_buf(),
            columns: Vec::new(),
            extras: Vec::new(),
            format: las::point::Format::default(),
        });
        self.path = Some(path.to_path_buf());
        self.state = BackendState::Writing;
        Ok(())
    }

    fn populate_header(&mut self, header: &mut Header, _read_first_point: bool) -> Result<()> {
        self.state.require(BackendState::Reading, "populate_header")?;
        let path = self.path.clone().unwrap_or_default();
        let input = self.input_mut()?;
        let las_header = input.reader.header();

        let transforms = las_header.transforms();
        let scale = [transforms.x.scale, transforms.y.scale, transforms.z.scale];
        let offset = [transforms.x.offset, transforms.y.offset, transforms.z.offset];
        let mut source = AttributeSchema::with_coordinates(scale, offset);
        for field in input.fields.iter().skip(3) {
            source.push(Attribute::new(
                field.name(),
                field.data_type(),
                field.description(),
            ))?;
        }
        let mut kept = Vec::with_capacity(input.extras.len());
        for extra in input.extras.drain(..) {
            match source.push(extra.attribute.clone()) {
                Ok(_) => kept.push(extra),
                Err(e) => warn!(
                    "{}: extra bytes '{}' are not read: {}",
                    path.display(),
                    extra.attribute.name,
                    e
                ),
            }
        }
        input.extras = kept;
        input.record.resize(input.fields.len() + input.extras.len(), 0.0);

        let las_bounds = las_header.bounds();
        let mut bounds = Bounds::new();
        if las_header.number_of_points() > 0 {
            bounds.update(las_bounds.min.x, las_bounds.min.y, las_bounds.min.z);
            bounds.update(las_bounds.max.x, las_bounds.max.y, las_bounds.max.z);
        }
        let version = las_header.version();
        let npoints = las_header.number_of_points();

        header.signature = "LASF".to_string();
        header.version_major = version.major;
        header.version_minor = version.minor;
        header.number_of_points = Some(npoints);
        header.bounds = bounds;

        let bound = BoundFilters::bind(&self.filters, &source)?;
        header.schema = bound.schema().clone();
        header.set_transforms(scale, offset);
        self.bound_filters = Some(bound);
        self.npoints = Some(npoints);

        debug!(
            "{}: LAS {}.{}, {} points",
            self.path.as_deref().unwrap_or(Path::new("")).display(),
            version.major,
            version.minor,
            npoints
        );
        self.reset_accessor()
    }

    fn init(&mut self, header: &Header) -> Result<()> {
        self.state.require(BackendState::Writing, "init")?;
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| PipelineError::precondition("LAS backend has no output stream"))?;

        let mut columns = Vec::new();
        let mut extras = Vec::new();
        for (column, attribute) in header.schema.iter().enumerate() {
            match LasField::from_name(&attribute.name) {
                Some(field) => columns.push((field, column)),
                None => extras.push((attribute.clone(), column)),
            }
        }
        let fields: Vec<LasField> = columns.iter().map(|(f, _)| *f).collect();
        let mut format = las::point::Format::new(guess_point_format(&fields))?;
        let extra_attributes: Vec<Attribute> = extras.iter().map(|(a, _)| a.clone()).collect();
        let extra_size: usize = extra_attributes.iter().map(|a| a.data_type.size()).sum();
        format.extra_bytes = u16::try_from(extra_size).map_err(|_| {
            PipelineError::format(format!(
                "{} extra bytes do not fit a LAS point record",
                extra_size
            ))
        })?;

        // Keep quantized coordinates inside the i32 range of the point record.
        let mut offset = header.offset;
        if !header.bounds.is_empty() {
            let min = [header.bounds.min_x, header.bounds.min_y, header.bounds.min_z];
            let max = [header.bounds.max_x, header.bounds.max_y, header.bounds.max_z];
            for axis in 0..3 {
                let scale = header.scale[axis];
                let low = (min[axis] - offset[axis]) / scale;
                let high = (max[axis] - offset[axis]) / scale;
                if low < i32::MIN as f64 || high > i32::MAX as f64 {
                    offset[axis] = (min[axis] / scale).floor() * scale;
                }
            }
        }

        let mut builder = las::Builder::from((1, 4));
        builder.point_format = format;
        if !extra_attributes.is_empty() {
            builder.vlrs.push(Vlr {
                user_id: EXTRA_BYTES_USER_ID.to_string(),
                record_id: EXTRA_BYTES_RECORD_ID,
                description: "Extra bytes".to_string(),
                data: encode_descriptors(&extra_attributes)?,
            });
            debug!(
                "{}: {} attributes written as extra bytes",
                output.path.display(),
                extra_attributes.len()
            );
        }
        builder.transforms = las::Vector {
            x: las::Transform {
                scale: header.scale[0],
                offset: offset[0],
            },
            y: las::Transform {
                scale: header.scale[1],
                offset: offset[1],
            },
            z: las::Transform {
                scale: header.scale[2],
                offset: offset[2],
            },
        };
        let las_header = builder.into_header()?;
        output.writer = Some(Writer::from_path(&output.path, las_header)?);
        output.columns = columns;
        output.extras = extras;
        output.format = format;
        self.state = BackendState::Initialized;
        Ok(())
    }

    fn read_point(&mut self, point: &mut Vec<f64>) -> Result<bool> {
        self.state.require(BackendState::Reading, "read_point")?;
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
            let Some(las_point) = input.reader.points().next().transpose()? else {
                return Ok(false);
            };
            self.position += 1;
            let (standard, extra) = input.record.split_at_mut(input.fields.len());
            for (value, field) in standard.iter_mut().zip(&input.fields) {
                *value = field.read(&las_point);
            }
            for (value, field) in extra.iter_mut().zip(&input.extras) {
                *value = field.read(&las_point.extra_bytes)?;
            }
            if filters.accepts(&input.record) {
                filters.project(&input.record, point);
                return Ok(true);
            }
        }
    }

    fn write_point(&mut self, point: &[f64]) -> Result<()> {
        self.state.require(BackendState::Initialized, "write_point")?;
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| PipelineError::precondition("LAS backend has no output stream"))?;
        let writer = output
            .writer
            .as_mut()
            .ok_or_else(|| PipelineError::precondition("LAS writer is not initialised"))?;

        let value_at = |column: usize| {
            point.get(column).copied().ok_or_else(|| {
                PipelineError::precondition(format!(
                    "record has {} values, column {} expected",
                    point.len(),
                    column
                ))
            })
        };
        let mut las_point = las::Point::default();
        for &(field, column) in &output.columns {
            field.write(&mut las_point, value_at(column)?)?;
        }
        las_point.extra_bytes = Vec::with_capacity(output.format.extra_bytes as usize);
        for (attribute, column) in &output.extras {
            let raw = attribute.quantize(value_at(*column)?);
            attribute.data_type.encode_le(raw, &mut las_point.extra_bytes);
        }

        let format = &output.format;
        las_point.gps_time = match format.has_gps_time {
            true => las_point.gps_time.or(Some(0.0)),
            false => None,
        };
        las_point.color = match format.has_color {
            true => las_point.color.or(Some(Color::new(0, 0, 0))),
            false => None,
        };
        las_point.nir = match format.has_nir {
            true => las_point.nir.or(Some(0)),
            false => None,
        };
        writer.write_point(las_point)?;
        Ok(())
    }

    fn p_count(&self) -> Option<u64> {
        let total = self.npoints?;
        let end = self.window_end.map_or(total, |e| e.min(total));
        Some(end.saturating_sub(self.window_start))
    }

    fn reset_accessor(&mut self) -> Result<()> {
        self.state.require(BackendState::Reading, "reset_accessor")?;
        let start = self.window_start;
        let input = self.input_mut()?;
        input.reader.seek(start)?;
        self.position = start;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let result = match self.output.as_mut().and_then(|o| o.writer.as_mut()) {
            Some(writer) => writer.close().map_err(PipelineError::from),
            None => Ok(()),
        };
        self.input = None;
        self.output = None;
        self.bound_filters = None;
        self.state = BackendState::Closed;
        result
    }

    fn is_open(&self) -> bool {
        self.state != BackendState::Closed
    }

    fn supports_random_access(&self) -> bool {
        self.state == BackendState::Reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_format_follows_fields() {
        assert_eq!(guess_point_format(&LasField::CORE), 0);
        assert_eq!(
            guess_point_format(&[LasField::X, LasField::GpsTime, LasField::Red]),
            3
        );
        assert_eq!(guess_point_format(&[LasField::Blue]), 2);
        assert_eq!(guess_point_format(&[LasField::Nir]), 8);
    }

    #[test]
    fn field_names_resolve_with_aliases() {
        assert_eq!(LasField::from_name("x"), Some(LasField::X));
        assert_eq!(LasField::from_name("PointSourceID"), Some(LasField::PointSourceId));
        assert_eq!(LasField::from_name("R"), Some(LasField::Red));
        assert_eq!(LasField::from_name("Intensity2"), None);
    }

    #[test]
    fn writes_and_reads_back_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.las");

        let mut header = Header::default();
        header
            .schema
            .push(Attribute::new("Intensity", AttributeType::UInt16, ""))
            .unwrap();
        header
            .schema
            .push(Attribute::new("Classification", AttributeType::UInt8, ""))
            .unwrap();
        header
            .schema
            .push(Attribute::new("Extra", AttributeType::Float32, "free text"))
            .unwrap();
        header
            .schema
            .push(Attribute::with_quantization(
                "Height",
                AttributeType::Int16,
                0.01,
                5.0,
                "height above ground",
            ))
            .unwrap();
        header.bounds.update(1.0, 2.0, 3.0);
        header.bounds.update(4.0, 5.0, 6.0);

        let mut writer = LasBackend::new();
        writer.create(&path).unwrap();
        writer.init(&header).unwrap();
        writer
            .write_point(&[1.0, 2.0, 3.0, 100.0, 2.0, 0.5, 7.25])
            .unwrap();
        writer
            .write_point(&[4.0, 5.0, 6.0, 200.0, 6.0, -1.5, 3.0])
            .unwrap();
        writer.close().unwrap();

        let mut reader = LasBackend::new();
        reader.open(&path).unwrap();
        let mut read_header = Header::default();
        reader.populate_header(&mut read_header, false).unwrap();
        assert_eq!(read_header.signature, "LASF");
        assert_eq!(read_header.number_of_points, Some(2));
        assert!(reader.supports_random_access());

        let extra = read_header.schema.find("Extra").unwrap();
        assert_eq!(extra.data_type, AttributeType::Float32);
        assert_eq!(extra.description, "free text");
        let height = read_header.schema.find("Height").unwrap();
        assert_eq!(height.data_type, AttributeType::Int16);
        assert_eq!((height.scale, height.offset), (0.01, 5.0));
        assert_eq!(height.description, "height above ground");

        let intensity = read_header.schema.index_of("Intensity").unwrap();
        let class = read_header.schema.index_of("Classification").unwrap();
        let extra = read_header.schema.index_of("Extra").unwrap();
        let height = read_header.schema.index_of("Height").unwrap();
        let mut row = Vec::new();
        assert!(reader.read_point(&mut row).unwrap());
        assert!((row[0] - 1.0).abs() < 1e-3);
        assert_eq!(row[intensity], 100.0);
        assert_eq!(row[extra], 0.5);
        assert!((row[height] - 7.25).abs() < 1e-9);
        assert!(reader.read_point(&mut row).unwrap());
        assert_eq!(row[class], 6.0);
        assert_eq!(row[extra], -1.5);
        assert!((row[height] - 3.0).abs() < 1e-9);
        assert!(!reader.read_point(&mut row).unwrap());

        reader.reset_accessor().unwrap();
        assert!(reader.read_point(&mut row).unwrap());
        assert_eq!(row[intensity], 100.0);
        reader.close().unwrap();
    }

    #[test]
    fn descriptors_skip_unreadable_entries() {
        let attributes = [
            Attribute::new("Amplitude", AttributeType::UInt16, ""),
            Attribute::with_quantization("Range", AttributeType::Int32, 0.001, 0.0, "metres"),
        ];
        let encoded = encode_descriptors(&attributes).unwrap();
        assert_eq!(encoded.len(), 2 * DESCRIPTOR_SIZE);

        // Three undocumented bytes in front shift the offsets of the others.
        let mut data = vec![0u8; DESCRIPTOR_SIZE];
        data[3] = 3;
        put_text(&mut data[4..36], "opaque");
        data.extend_from_slice(&encoded);

        let fields = decode_descriptors(&data, Path::new("tile.las"));
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].attribute, attributes[0]);
        assert_eq!(fields[0].offset, 3);
        assert_eq!(fields[1].attribute, attributes[1]);
        assert_eq!(fields[1].offset, 5);

        assert!(fields[1].read(&[0u8; 8]).is_err());
    }

    #[test]
    fn long_extra_names_are_refused() {
        let name = "a".repeat(DESCRIPTOR_TEXT + 1);
        let attribute = Attribute::new(&name, AttributeType::UInt8, "");
        assert!(matches!(
            encode_descriptors(&[attribute]),
            Err(PipelineError::Format(_))
        ));
    }
}
