//! Position tables read from text or Igor wave files.

#[cfg(feature = "waves")]
mod wave;

use patchstim_core::params::TableSchema;
use patchstim_core::{Result, StimError};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarRow {
    /// Microns from the stim location along the pass direction.
    pub radius: f64,
    pub trigger: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordRow {
    /// Microns, relative to the stim location, before rotation.
    pub xy: [f64; 2],
    pub trigger: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowAngle {
    /// Degrees relative to the pass direction.
    Degrees(f64),
    /// Straight along the pass direction.
    Preferred,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionRow {
    /// Microns per second.
    pub speed: f64,
    pub angle: RowAngle,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableData {
    Polar(Vec<PolarRow>),
    Coordinate(Vec<CoordRow>),
    Direction(Vec<DirectionRow>),
}

impl TableData {
    pub fn schema(&self) -> TableSchema {
        match self {
            TableData::Polar(_) => TableSchema::Polar,
            TableData::Coordinate(_) => TableSchema::Coordinate,
            TableData::Direction(_) => TableSchema::Direction,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TableData::Polar(rows) => rows.len(),
            TableData::Coordinate(rows) => rows.len(),
            TableData::Direction(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Encoding {
    Text,
    Ibw,
    Pxp,
}

fn encoding(path: &Path) -> Result<Encoding> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "csv" | "tsv" => Ok(Encoding::Text),
        "ibw" => Ok(Encoding::Ibw),
        "pxp" => Ok(Encoding::Pxp),
        _ => Err(StimError::UnsupportedTable {
            path: path.to_path_buf(),
            reason: format!(
                "extension `{ext}` is not one of txt, csv, tsv, ibw, pxp"
            ),
        }),
    }
}

/// Reads a position table in the given schema.
pub fn load_table(path: &Path, schema: TableSchema) -> Result<TableData> {
    let table = match encoding(path)? {
        Encoding::Text => {
            let text = std::fs::read_to_string(path).map_err(|e| StimError::io(path, e))?;
            parse_text(&text, schema, path)?
        }
        Encoding::Ibw | Encoding::Pxp if schema == TableSchema::Direction => {
            return Err(StimError::UnsupportedTable {
                path: path.to_path_buf(),
                reason: "direction tables can only be read from text files".into(),
            });
        }
        binary => load_waves(path, schema, binary == Encoding::Pxp)?,
    };
    if table.is_empty() {
        return Err(StimError::TableFormat {
            path: path.to_path_buf(),
            line: 0,
            reason: "table has no rows".into(),
        });
    }
    log::debug!("{}: {} {:?} rows", path.display(), table.len(), schema);
    Ok(table)
}

#[cfg(feature = "waves")]
fn load_waves(path: &Path, schema: TableSchema, packed: bool) -> Result<TableData> {
    let bytes = std::fs::read(path).map_err(|e| StimError::io(path, e))?;
    let waves = if packed {
        wave::parse_pxp(&bytes)
    } else {
        wave::parse_ibw(&bytes).map(|w| vec![w])
    }
    .map_err(|reason| StimError::TableFormat {
        path: path.to_path_buf(),
        line: 0,
        reason,
    })?;
    wave::table_from_waves(path, &waves, schema)
}

#[cfg(not(feature = "waves"))]
fn load_waves(_path: &Path, _schema: TableSchema, _packed: bool) -> Result<TableData> {
    Err(StimError::MissingCapability(
        "binary wave tables (.ibw/.pxp) need the `waves` feature",
    ))
}

fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
}

/// Parses delimited text: comma, tab or whitespace separated, `#` starts a
/// comment, and one non-numeric header line before the data is skipped.
pub fn parse_text(text: &str, schema: TableSchema, path: &Path) -> Result<TableData> {
    let mut polar = Vec::new();
    let mut coords = Vec::new();
    let mut dirs = Vec::new();
    let mut seen_header = false;
    let mut seen_data = false;

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = split_fields(line).collect();
        let err = |reason: String| StimError::TableFormat {
            path: path.to_path_buf(),
            line: line_no,
            reason,
        };
        let num = |idx: usize| -> Result<f64> {
            let field = fields
                .get(idx)
                .ok_or_else(|| err(format!("expected at least {} columns", idx + 1)))?;
            field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| err(format!("`{field}` is not a number")))
        };
        let flag = |idx: usize| -> Result<bool> {
            if idx < fields.len() { Ok(num(idx)? != 0.0) } else { Ok(false) }
        };

        if !seen_data && is_header(&fields, schema) {
            if seen_header {
                return Err(err("only one header line may precede the data".into()));
            }
            seen_header = true;
            continue;
        }
        seen_data = true;

        match schema {
            TableSchema::Polar => polar.push(PolarRow {
                radius: num(0)?,
                trigger: flag(1)?,
            }),
            TableSchema::Coordinate => coords.push(CoordRow {
                xy: [num(0)?, num(1)?],
                trigger: flag(2)?,
            }),
            TableSchema::Direction => {
                let angle = match fields.get(1) {
                    Some(f) if is_pref(f) => RowAngle::Preferred,
                    _ => RowAngle::Degrees(num(1)?),
                };
                let row = DirectionRow {
                    speed: num(0)?,
                    angle,
                    duration_ms: num(2)?,
                };
                if row.speed < 0.0 || row.duration_ms < 0.0 {
                    return Err(err("speed and duration must not be negative".into()));
                }
                dirs.push(row);
            }
        }
    }

    Ok(match schema {
        TableSchema::Polar => TableData::Polar(polar),
        TableSchema::Coordinate => TableData::Coordinate(coords),
        TableSchema::Direction => TableData::Direction(dirs),
    })
}

fn is_pref(field: &str) -> bool {
    field.eq_ignore_ascii_case("pref") || field.eq_ignore_ascii_case("preferred")
}

fn is_header(fields: &[&str], schema: TableSchema) -> bool {
    fields.iter().enumerate().any(|(i, f)| {
        let symbolic = schema == TableSchema::Direction && i == 1 && is_pref(f);
        !symbolic && f.parse::<f64>().is_err()
    })
}
