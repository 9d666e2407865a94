//! Whitespace-separated numeric tables
//!
//! Layout: a `# text-table <shape>` header, then one row per line with
//! every number in `%.6e` notation (`1.500000e+00`). A scalar is one row of
//! one number, a vector is one number per line, a matrix is one line per
//! row. Files without the header are read as a vector when they have a
//! single column or a single row, and as a matrix otherwise. Numbers are
//! always pulled back as floats.

use serde_json::{Number, Value};

const HEADER: &str = "# text-table";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Shape {
    Scalar,
    Vector,
    Matrix,
}

impl Shape {
    fn as_str(&self) -> &'static str {
        match self {
            Shape::Scalar => "scalar",
            Shape::Vector => "vector",
            Shape::Matrix => "matrix",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "scalar" => Some(Shape::Scalar),
            "vector" => Some(Shape::Vector),
            "matrix" => Some(Shape::Matrix),
            _ => None,
        }
    }
}

/// The table shape of `value`, or why it has none.
pub(super) fn shape_of(value: &Value) -> Result<Shape, String> {
    match value {
        Value::Number(_) => Ok(Shape::Scalar),
        Value::Array(items) if items.iter().all(Value::is_number) => Ok(Shape::Vector),
        Value::Array(rows) if rows.iter().all(is_numeric_row) => {
            let width = rows.first().and_then(Value::as_array).map_or(0, Vec::len);
            if width == 0 {
                return Err("table rows are empty".to_string());
            }
            if rows
                .iter()
                .filter_map(Value::as_array)
                .all(|row| row.len() == width)
            {
                Ok(Shape::Matrix)
            } else {
                Err("table rows have unequal lengths".to_string())
            }
        }
        Value::Array(_) => Err("a table holds numbers or rows of numbers".to_string()),
        other => Err(format!("a table cannot hold {}", kind_of(other))),
    }
}

fn is_numeric_row(value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|row| row.iter().all(Value::is_number))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

/// Render `value` as table text.
pub(super) fn render(value: &Value) -> Result<String, String> {
    let shape = shape_of(value)?;
    let rows: Vec<Vec<f64>> = match (shape, value) {
        (Shape::Scalar, v) => vec![vec![number(v)]],
        (Shape::Vector, Value::Array(items)) => items.iter().map(|v| vec![number(v)]).collect(),
        (Shape::Matrix, Value::Array(rows)) => rows
            .iter()
            .filter_map(Value::as_array)
            .map(|row| row.iter().map(number).collect())
            .collect(),
        _ => Vec::new(),
    };

    let mut out = format!("{HEADER} {}\n", shape.as_str());
    for row in rows {
        let line: Vec<String> = row.into_iter().map(format_scientific).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    Ok(out)
}

/// Parse table text back into a number, vector or matrix.
pub(super) fn parse(text: &str) -> Result<Value, String> {
    let mut declared = None;
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix(HEADER) {
            declared = Shape::parse(rest.trim());
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|field| {
                field
                    .parse::<f64>()
                    .map_err(|e| format!("line {}: '{}': {}", index + 1, field, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }

    let shape = match declared {
        Some(shape) => shape,
        None if rows.len() == 1 || rows.iter().all(|r| r.len() == 1) => Shape::Vector,
        None => Shape::Matrix,
    };

    match shape {
        Shape::Scalar => {
            let x = rows
                .first()
                .and_then(|r| r.first())
                .copied()
                .ok_or("scalar table is empty")?;
            to_value(x)
        }
        Shape::Vector => rows
            .into_iter()
            .flatten()
            .map(to_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Shape::Matrix => rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(to_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
    }
}

fn number(value: &Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}

fn to_value(x: f64) -> Result<Value, String> {
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| format!("{x} is not a finite number"))
}

/// `%.6e` formatting: six fraction digits, signed two-digit exponent.
fn format_scientific(x: f64) -> String {
    let raw = format!("{x:.6e}");
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => raw,
    }
}
