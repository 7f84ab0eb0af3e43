/// Quantized coordinate attribute names, in schema order.
pub const COORDINATE_ATTRIBUTES: [&str; 3] = ["X", "Y", "Z"];

/// Every spelling that resolves to a coordinate column. None of them may be removed.
pub const RESERVED_COORDINATE_NAMES: [&str; 6] = ["x", "X", "y", "Y", "z", "Z"];

/// Scale applied to quantized coordinates when a source declares none (millimetre).
pub const DEFAULT_COORDINATE_SCALE: f64 = 0.001;

/// Resolve a lower-case coordinate alias to its quantized attribute name.
pub fn canonical_coordinate_name(name: &str) -> Option<&'static str> {
    match name {
        "x" | "X" => Some("X"),
        "y" | "Y" => Some("Y"),
        "z" | "Z" => Some("Z"),
        _ => None,
    }
}

pub fn is_reserved_coordinate(name: &str) -> bool {
    RESERVED_COORDINATE_NAMES.contains(&name)
}
