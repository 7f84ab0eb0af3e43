//! Named read filters applied by backends while materializing records.
//!
//! Filters are written as flag strings, e.g. `-keep_class 2 9` or
//! `-drop_z_below 0 -keep_attributes Intensity`. A single string may hold
//! several flags.
use crate::attribute::AttributeSchema;
use crate::bounds::Bounds;
use crate::error::{PipelineError, Result};
use std::io;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    KeepClass(Vec<u8>),
    DropClass(Vec<u8>),
    DropZBelow(f64),
    DropZAbove(f64),
    KeepXy(Bounds),
    KeepAttributes(Vec<String>),
}

impl Filter {
    /// Parse every flag found in the given strings.
    pub fn parse_all<S: AsRef<str>>(specs: &[S]) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        let mut errors = Vec::new();

        for spec in specs {
            let mut tokens = spec.as_ref().split_whitespace().peekable();
            while let Some(flag) = tokens.next() {
                let mut args = Vec::new();
                while let Some(next) = tokens.peek() {
                    if is_flag(next) {
                        break;
                    }
                    args.push(*next);
                    tokens.next();
                }
                match Filter::parse(flag, &args) {
                    Ok(filter) => filters.push(filter),
                    Err(msg) => errors.push(msg),
                }
            }
        }

        if errors.is_empty() {
            Ok(filters)
        } else {
            Err(PipelineError::Config(errors))
        }
    }

    fn parse(flag: &str, args: &[&str]) -> std::result::Result<Filter, String> {
        match flag {
            "-keep_class" => parse_classes(flag, args).map(Filter::KeepClass),
            "-drop_class" => parse_classes(flag, args).map(Filter::DropClass),
            "-drop_z_below" => parse_numbers(flag, args, 1).map(|v| Filter::DropZBelow(v[0])),
            "-drop_z_above" => parse_numbers(flag, args, 1).map(|v| Filter::DropZAbove(v[0])),
            "-keep_xy" => parse_numbers(flag, args, 4)
                .map(|v| Filter::KeepXy(Bounds::xy(v[0], v[1], v[2], v[3]))),
            "-keep_attributes" if !args.is_empty() => Ok(Filter::KeepAttributes(
                args.iter().map(|s| s.to_string()).collect(),
            )),
            "-keep_attributes" => Err(format!("{} needs at least one attribute name", flag)),
            _ => Err(format!("unknown filter '{}'", flag)),
        }
    }

    /// Attribute a predicate needs to evaluate, if any.
    fn required_attribute(&self) -> Option<&'static str> {
        match self {
            Filter::KeepClass(_) | Filter::DropClass(_) => Some("Classification"),
            Filter::DropZBelow(_) | Filter::DropZAbove(_) => Some("Z"),
            Filter::KeepXy(_) => Some("X"),
            Filter::KeepAttributes(_) => None,
        }
    }
}

fn is_flag(token: &str) -> bool {
    token.starts_with('-') && token[1..].starts_with(|c: char| c.is_ascii_alphabetic())
}

fn parse_classes(flag: &str, args: &[&str]) -> std::result::Result<Vec<u8>, String> {
    if args.is_empty() {
        return Err(format!("{} needs at least one class", flag));
    }
    args.iter()
        .map(|a| {
            a.parse::<u8>()
                .map_err(|_| format!("{}: '{}' is not a class code", flag, a))
        })
        .collect()
}

fn parse_numbers(flag: &str, args: &[&str], count: usize) -> std::result::Result<Vec<f64>, String> {
    if args.len() != count {
        return Err(format!("{} expects {} value(s), got {}", flag, count, args.len()));
    }
    args.iter()
        .map(|a| {
            a.parse::<f64>()
                .map_err(|_| format!("{}: '{}' is not a number", flag, a))
        })
        .collect()
}

/// Filters resolved against a source schema.
#[derive(Debug, Clone)]
pub struct BoundFilters {
    predicates: Vec<(Filter, usize)>,
    /// Source column feeding each materialized column.
    projection: Vec<usize>,
    schema: AttributeSchema,
}

impl BoundFilters {
    /// Resolve filters against the attributes a source declares.
    ///
    /// Filters that need a missing attribute make the source unreadable as
    /// requested and fail as an `InvalidInput` IO error.
    pub fn bind(filters: &[Filter], source: &AttributeSchema) -> Result<Self> {
        let mut predicates = Vec::new();
        let mut keep: Option<Vec<String>> = None;

        for filter in filters {
            if let Filter::KeepAttributes(names) = filter {
                keep.get_or_insert_with(Vec::new).extend(names.iter().cloned());
                continue;
            }
            let name = filter.required_attribute().unwrap_or_default();
            let column = source.index_of(name).ok_or_else(|| unsatisfiable(filter, name))?;
            predicates.push((filter.clone(), column));
        }

        let (projection, schema) = match keep {
            None => ((0..source.len()).collect(), source.clone()),
            Some(names) => {
                for name in &names {
                    if !source.contains(name) {
                        return Err(unsatisfiable(&Filter::KeepAttributes(names.clone()), name));
                    }
                }
                let mut schema = source.clone();
                let mut projection = Vec::new();
                for (i, attribute) in source.iter().enumerate() {
                    let kept = i < 3 || names.iter().any(|n| source.index_of(n) == Some(i));
                    if kept {
                        projection.push(i);
                    } else {
                        schema.remove(&attribute.name)?;
                    }
                }
                (projection, schema)
            }
        };

        Ok(Self {
            predicates,
            projection,
            schema,
        })
    }

    /// Schema of the records handed out after projection.
    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    /// Whether a full source record passes every predicate.
    pub fn accepts(&self, record: &[f64]) -> bool {
        self.predicates.iter().all(|(filter, column)| {
            let value = record[*column];
            match filter {
                Filter::KeepClass(classes) => classes.contains(&(value as u8)),
                Filter::DropClass(classes) => !classes.contains(&(value as u8)),
                Filter::DropZBelow(z) => value >= *z,
                Filter::DropZAbove(z) => value <= *z,
                Filter::KeepXy(region) => region.contains_xy(value, record[column + 1]),
                Filter::KeepAttributes(_) => true,
            }
        })
    }

    /// Copy the kept columns of a source record into `out`.
    pub fn project(&self, record: &[f64], out: &mut Vec<f64>) {
        out.clear();
        out.extend(self.projection.iter().map(|&i| record[i]));
    }
}

fn unsatisfiable(filter: &Filter, name: &str) -> PipelineError {
    PipelineError::io(
        format!("filter {:?}", filter),
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("source has no attribute '{}'", name),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, AttributeType};

    fn schema() -> AttributeSchema {
        let mut schema = AttributeSchema::default();
        schema
            .push(Attribute::new("Intensity", AttributeType::UInt16, ""))
            .unwrap();
        schema
            .push(Attribute::new("Classification", AttributeType::UInt8, ""))
            .unwrap();
        schema
    }

    #[test]
    fn parses_several_flags_per_string() {
        let filters =
            Filter::parse_all(&["-keep_class 2 9 -drop_z_below -1.5", "-keep_xy 0 0 10 10"])
                .unwrap();
        assert_eq!(
            filters,
            vec![
                Filter::KeepClass(vec![2, 9]),
                Filter::DropZBelow(-1.5),
                Filter::KeepXy(Bounds::xy(0.0, 0.0, 10.0, 10.0)),
            ]
        );
    }

    #[test]
    fn reports_every_bad_flag() {
        let err = Filter::parse_all(&["-keep_class", "-frobnicate 3 -drop_z_above x"]).unwrap_err();
        match err {
            PipelineError::Config(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn predicates_and_projection() {
        let filters = Filter::parse_all(&["-drop_class 7 -keep_attributes Classification"]).unwrap();
        let bound = BoundFilters::bind(&filters, &schema()).unwrap();

        assert_eq!(bound.schema().len(), 4);
        assert!(!bound.schema().contains("Intensity"));
        assert!(bound.accepts(&[0.0, 0.0, 0.0, 100.0, 2.0]));
        assert!(!bound.accepts(&[0.0, 0.0, 0.0, 100.0, 7.0]));

        let mut out = Vec::new();
        bound.project(&[1.0, 2.0, 3.0, 100.0, 2.0], &mut out);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 2.0]);
    }

    #[test]
    fn missing_attribute_is_unsatisfiable() {
        let filters = Filter::parse_all(&["-keep_class 2"]).unwrap();
        let err = BoundFilters::bind(&filters, &AttributeSchema::default()).unwrap_err();
        match err {
            PipelineError::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn keep_xy_uses_x_and_y_columns() {
        let filters = Filter::parse_all(&["-keep_xy 0 0 1 1"]).unwrap();
        let bound = BoundFilters::bind(&filters, &schema()).unwrap();
        assert!(bound.accepts(&[0.5, 0.5, 99.0, 0.0, 0.0]));
        assert!(!bound.accepts(&[0.5, 1.5, 99.0, 0.0, 0.0]));
    }
}
