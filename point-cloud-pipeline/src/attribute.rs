//! Typed point attributes and the ordered schema describing a record.
use crate::error::{PipelineError, Result};
use constants::coordinate_system::{
    COORDINATE_ATTRIBUTES, DEFAULT_COORDINATE_SCALE, canonical_coordinate_name,
    is_reserved_coordinate,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage type of an attribute. `NoType` marks a failed type lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    NoType,
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float32,
    Float64,
}

impl AttributeType {
    pub const ALL: [AttributeType; 10] = [
        AttributeType::UInt8,
        AttributeType::Int8,
        AttributeType::UInt16,
        AttributeType::Int16,
        AttributeType::UInt32,
        AttributeType::Int32,
        AttributeType::UInt64,
        AttributeType::Int64,
        AttributeType::Float32,
        AttributeType::Float64,
    ];

    /// Parse a configuration type name. Unknown names give `NoType`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "uint8" | "uchar" => AttributeType::UInt8,
            "int8" | "char" => AttributeType::Int8,
            "uint16" | "ushort" => AttributeType::UInt16,
            "int16" | "short" => AttributeType::Int16,
            "uint32" | "uint" => AttributeType::UInt32,
            "int32" | "int" => AttributeType::Int32,
            "uint64" => AttributeType::UInt64,
            "int64" => AttributeType::Int64,
            "float32" | "float" => AttributeType::Float32,
            "float64" | "double" => AttributeType::Float64,
            _ => AttributeType::NoType,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttributeType::NoType => "notype",
            AttributeType::UInt8 => "uint8",
            AttributeType::Int8 => "int8",
            AttributeType::UInt16 => "uint16",
            AttributeType::Int16 => "int16",
            AttributeType::UInt32 => "uint32",
            AttributeType::Int32 => "int32",
            AttributeType::UInt64 => "uint64",
            AttributeType::Int64 => "int64",
            AttributeType::Float32 => "float32",
            AttributeType::Float64 => "float64",
        }
    }

    /// Size in bytes of one value.
    pub fn size(&self) -> usize {
        match self {
            AttributeType::NoType => 0,
            AttributeType::UInt8 | AttributeType::Int8 => 1,
            AttributeType::UInt16 | AttributeType::Int16 => 2,
            AttributeType::UInt32 | AttributeType::Int32 | AttributeType::Float32 => 4,
            AttributeType::UInt64 | AttributeType::Int64 | AttributeType::Float64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, AttributeType::Float32 | AttributeType::Float64)
    }

    /// PCD `TYPE` character and `SIZE` for this type.
    pub fn pcd_code(&self) -> Option<(char, usize)> {
        let code = match self {
            AttributeType::NoType => return None,
            AttributeType::UInt8
            | AttributeType::UInt16
            | AttributeType::UInt32
            | AttributeType::UInt64 => 'U',
            AttributeType::Int8
            | AttributeType::Int16
            | AttributeType::Int32
            | AttributeType::Int64 => 'I',
            AttributeType::Float32 | AttributeType::Float64 => 'F',
        };
        Some((code, self.size()))
    }

    /// Inverse of [`AttributeType::pcd_code`]. Unknown pairs give `NoType`.
    pub fn from_pcd_code(code: char, size: usize) -> Self {
        match (code.to_ascii_uppercase(), size) {
            ('U', 1) => AttributeType::UInt8,
            ('I', 1) => AttributeType::Int8,
            ('U', 2) => AttributeType::UInt16,
            ('I', 2) => AttributeType::Int16,
            ('U', 4) => AttributeType::UInt32,
            ('I', 4) => AttributeType::Int32,
            ('U', 8) => AttributeType::UInt64,
            ('I', 8) => AttributeType::Int64,
            ('F', 4) => AttributeType::Float32,
            ('F', 8) => AttributeType::Float64,
            _ => AttributeType::NoType,
        }
    }

    /// LAS extra-bytes `data_type` code for this type.
    pub fn las_code(&self) -> Option<u8> {
        let code = match self {
            AttributeType::NoType => return None,
            AttributeType::UInt8 => 1,
            AttributeType::Int8 => 2,
            AttributeType::UInt16 => 3,
            AttributeType::Int16 => 4,
            AttributeType::UInt32 => 5,
            AttributeType::Int32 => 6,
            AttributeType::UInt64 => 7,
            AttributeType::Int64 => 8,
            AttributeType::Float32 => 9,
            AttributeType::Float64 => 10,
        };
        Some(code)
    }

    /// Inverse of [`AttributeType::las_code`]. Unknown codes give `NoType`.
    pub fn from_las_code(code: u8) -> Self {
        match code {
            1..=10 => AttributeType::ALL[code as usize - 1],
            _ => AttributeType::NoType,
        }
    }

    /// Decode one little-endian raw value. `bytes` holds at least `size()` bytes.
    pub fn decode_le(&self, bytes: &[u8]) -> f64 {
        match self {
            AttributeType::NoType => 0.0,
            AttributeType::UInt8 => bytes[0] as f64,
            AttributeType::Int8 => bytes[0] as i8 as f64,
            AttributeType::UInt16 => u16::from_le_bytes(array(bytes)) as f64,
            AttributeType::Int16 => i16::from_le_bytes(array(bytes)) as f64,
            AttributeType::UInt32 => u32::from_le_bytes(array(bytes)) as f64,
            AttributeType::Int32 => i32::from_le_bytes(array(bytes)) as f64,
            AttributeType::UInt64 => u64::from_le_bytes(array(bytes)) as f64,
            AttributeType::Int64 => i64::from_le_bytes(array(bytes)) as f64,
            AttributeType::Float32 => f32::from_le_bytes(array(bytes)) as f64,
            AttributeType::Float64 => f64::from_le_bytes(array(bytes)),
        }
    }

    /// Append one raw value in little-endian order.
    pub fn encode_le(&self, raw: f64, out: &mut Vec<u8>) {
        match self {
            AttributeType::NoType => {}
            AttributeType::UInt8 => out.push(raw as u8),
            AttributeType::Int8 => out.push(raw as i8 as u8),
            AttributeType::UInt16 => out.extend_from_slice(&(raw as u16).to_le_bytes()),
            AttributeType::Int16 => out.extend_from_slice(&(raw as i16).to_le_bytes()),
            AttributeType::UInt32 => out.extend_from_slice(&(raw as u32).to_le_bytes()),
            AttributeType::Int32 => out.extend_from_slice(&(raw as i32).to_le_bytes()),
            AttributeType::UInt64 => out.extend_from_slice(&(raw as u64).to_le_bytes()),
            AttributeType::Int64 => out.extend_from_slice(&(raw as i64).to_le_bytes()),
            AttributeType::Float32 => out.extend_from_slice(&(raw as f32).to_le_bytes()),
            AttributeType::Float64 => out.extend_from_slice(&raw.to_le_bytes()),
        }
    }

    /// Clamp a raw value into the representable range of the type.
    fn clamp_raw(&self, raw: f64) -> f64 {
        let (min, max) = match self {
            AttributeType::UInt8 => (u8::MIN as f64, u8::MAX as f64),
            AttributeType::Int8 => (i8::MIN as f64, i8::MAX as f64),
            AttributeType::UInt16 => (u16::MIN as f64, u16::MAX as f64),
            AttributeType::Int16 => (i16::MIN as f64, i16::MAX as f64),
            AttributeType::UInt32 => (u32::MIN as f64, u32::MAX as f64),
            AttributeType::Int32 => (i32::MIN as f64, i32::MAX as f64),
            AttributeType::UInt64 => (u64::MIN as f64, u64::MAX as f64),
            AttributeType::Int64 => (i64::MIN as f64, i64::MAX as f64),
            _ => return raw,
        };
        raw.clamp(min, max)
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One typed field of a point record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub data_type: AttributeType,
    pub scale: f64,
    pub offset: f64,
    pub description: String,
}

impl Attribute {
    pub fn new(name: &str, data_type: AttributeType, description: &str) -> Self {
        Self::with_quantization(name, data_type, 1.0, 0.0, description)
    }

    pub fn with_quantization(
        name: &str,
        data_type: AttributeType,
        scale: f64,
        offset: f64,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            scale,
            offset,
            description: description.to_string(),
        }
    }

    /// Real value to the raw number stored on disk.
    pub fn quantize(&self, value: f64) -> f64 {
        if self.data_type.is_float() {
            return value;
        }
        self.data_type
            .clamp_raw(((value - self.offset) / self.scale).round())
    }

    /// Raw number read from disk to the real value kept in memory.
    pub fn dequantize(&self, raw: f64) -> f64 {
        if self.data_type.is_float() {
            return raw;
        }
        raw * self.scale + self.offset
    }

    /// Value backfilled into existing records when the attribute is added.
    pub fn default_value(&self) -> f64 {
        self.dequantize(0.0)
    }
}

/// Ordered set of attributes. The first three are always `X`, `Y`, `Z`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    attributes: Vec<Attribute>,
}

impl Default for AttributeSchema {
    fn default() -> Self {
        Self::with_coordinates([DEFAULT_COORDINATE_SCALE; 3], [0.0; 3])
    }
}

impl AttributeSchema {
    /// Schema holding only the quantized coordinate block.
    pub fn with_coordinates(scale: [f64; 3], offset: [f64; 3]) -> Self {
        let attributes = COORDINATE_ATTRIBUTES
            .iter()
            .enumerate()
            .map(|(i, name)| {
                Attribute::with_quantization(
                    name,
                    AttributeType::Int32,
                    scale[i],
                    offset[i],
                    &format!("{} coordinate", name.to_lowercase()),
                )
            })
            .collect();
        Self { attributes }
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.attributes.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Attribute> {
        self.attributes.get(index)
    }

    /// Column index of an attribute, resolving lower-case coordinate aliases.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let name = canonical_coordinate_name(name).unwrap_or(name);
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.index_of(name).map(|i| &self.attributes[i])
    }

    /// Append an attribute, rejecting `NoType` and duplicate names.
    pub fn push(&mut self, attribute: Attribute) -> Result<usize> {
        if attribute.data_type == AttributeType::NoType {
            return Err(PipelineError::domain(format!(
                "attribute '{}' has no valid data type",
                attribute.name
            )));
        }
        if attribute.name.is_empty() {
            return Err(PipelineError::domain("attribute name cannot be empty"));
        }
        if self.contains(&attribute.name) {
            return Err(PipelineError::domain(format!(
                "attribute '{}' already exists",
                attribute.name
            )));
        }
        self.attributes.push(attribute);
        Ok(self.attributes.len() - 1)
    }

    /// Remove an attribute by name and return its former column index.
    pub fn remove(&mut self, name: &str) -> Result<usize> {
        if is_reserved_coordinate(name) {
            return Err(PipelineError::domain(
                "removing point coordinates is not allowed",
            ));
        }
        let index = self
            .index_of(name)
            .ok_or_else(|| PipelineError::domain(format!("no attribute named '{}'", name)))?;
        self.attributes.remove(index);
        Ok(index)
    }

    /// Replace the quantization of one coordinate axis.
    pub fn set_coordinate_quantization(&mut self, axis: usize, scale: f64, offset: f64) {
        if let Some(attribute) = self.attributes.get_mut(axis) {
            attribute.scale = scale;
            attribute.offset = offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_and_legacy_aliases_agree() {
        assert_eq!(AttributeType::from_name("uint16"), AttributeType::UInt16);
        assert_eq!(AttributeType::from_name("ushort"), AttributeType::UInt16);
        assert_eq!(AttributeType::from_name("double"), AttributeType::Float64);
        assert_eq!(AttributeType::from_name("decimal"), AttributeType::NoType);
        assert_eq!(AttributeType::from_name("UINT16"), AttributeType::NoType);

        for ty in AttributeType::ALL {
            assert_eq!(AttributeType::from_name(ty.name()), ty);
        }
    }

    #[test]
    fn pcd_codes_are_total_and_invertible() {
        let mut seen = std::collections::HashSet::new();
        for ty in AttributeType::ALL {
            let (code, size) = ty.pcd_code().expect("every real type has a code");
            assert!(seen.insert((code, size)), "duplicate code for {}", ty);
            assert_eq!(AttributeType::from_pcd_code(code, size), ty);
        }
        assert_eq!(AttributeType::NoType.pcd_code(), None);
        assert_eq!(AttributeType::from_pcd_code('F', 2), AttributeType::NoType);
    }

    #[test]
    fn las_codes_follow_the_extra_bytes_table() {
        assert_eq!(AttributeType::UInt8.las_code(), Some(1));
        assert_eq!(AttributeType::Float64.las_code(), Some(10));
        assert_eq!(AttributeType::NoType.las_code(), None);
        for ty in AttributeType::ALL {
            assert_eq!(AttributeType::from_las_code(ty.las_code().unwrap()), ty);
        }
        assert_eq!(AttributeType::from_las_code(0), AttributeType::NoType);
        assert_eq!(AttributeType::from_las_code(11), AttributeType::NoType);
    }

    #[test]
    fn little_endian_values_keep_their_sign() {
        let mut bytes = Vec::new();
        AttributeType::Int8.encode_le(-3.0, &mut bytes);
        AttributeType::Int32.encode_le(-70000.0, &mut bytes);
        assert_eq!(bytes.len(), 5);
        assert_eq!(AttributeType::Int8.decode_le(&bytes[..1]), -3.0);
        assert_eq!(AttributeType::Int32.decode_le(&bytes[1..]), -70000.0);
    }

    #[test]
    fn quantization_rounds_and_clamps() {
        let attr = Attribute::with_quantization("h", AttributeType::UInt8, 0.5, 10.0, "");
        assert_eq!(attr.quantize(11.0), 2.0);
        assert_eq!(attr.dequantize(2.0), 11.0);
        assert_eq!(attr.quantize(1000.0), 255.0);
        assert_eq!(attr.quantize(0.0), 0.0);
        assert_eq!(attr.default_value(), 10.0);
    }

    #[test]
    fn coordinate_aliases_resolve() {
        let schema = AttributeSchema::default();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.index_of("x"), Some(0));
        assert_eq!(schema.index_of("Z"), Some(2));
        assert_eq!(schema.index_of("Intensity"), None);
    }

    #[test]
    fn push_rejects_notype_and_duplicates() {
        let mut schema = AttributeSchema::default();
        let bad = Attribute::new("Foo", AttributeType::NoType, "");
        assert!(matches!(schema.push(bad), Err(PipelineError::Domain(_))));

        schema
            .push(Attribute::new("Intensity", AttributeType::UInt16, ""))
            .unwrap();
        let dup = Attribute::new("Intensity", AttributeType::UInt8, "");
        assert!(matches!(schema.push(dup), Err(PipelineError::Domain(_))));
        assert!(matches!(
            schema.push(Attribute::new("x", AttributeType::Float64, "")),
            Err(PipelineError::Domain(_))
        ));
    }

    #[test]
    fn coordinates_cannot_be_removed() {
        let mut schema = AttributeSchema::default();
        for name in ["x", "X", "y", "Y", "z", "Z"] {
            assert!(matches!(schema.remove(name), Err(PipelineError::Domain(_))));
        }
        assert_eq!(schema.len(), 3);
    }
}
