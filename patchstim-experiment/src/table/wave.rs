//! Igor Pro binary waves (`.ibw`) and packed experiment files (`.pxp`).

use super::{CoordRow, PolarRow, TableData};
use patchstim_core::params::TableSchema;
use patchstim_core::{Result, StimError};
use std::path::Path;
use winnow::Parser;
use winnow::binary::{self, Endianness};
use winnow::combinator::repeat;
use winnow::error::ContextError;
use winnow::token::take;

/// One numeric wave, stored column-major like Igor does.
#[derive(Debug, Clone, PartialEq)]
pub struct Wave {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Wave {
    pub fn column(&self, col: usize) -> Option<&[f64]> {
        if col >= self.cols {
            return None;
        }
        self.data.get(col * self.rows..(col + 1) * self.rows)
    }

    fn is_trigger(&self) -> bool {
        self.name.to_ascii_lowercase().contains("trig")
    }
}

const WAVE_RECORD: u16 = 3;
const SUPERSEDED: u16 = 0x8000;

const NT_CMPLX: i16 = 0x01;
const NT_FP32: i16 = 0x02;
const NT_FP64: i16 = 0x04;
const NT_I8: i16 = 0x08;
const NT_I16: i16 = 0x10;
const NT_I32: i16 = 0x20;
const NT_UNSIGNED: i16 = 0x40;

/// The first two bytes hold the format version in the writer's byte order.
fn detect_version(bytes: &[u8]) -> Option<(i16, Endianness)> {
    let head: [u8; 2] = bytes.get(..2)?.try_into().ok()?;
    let known = |v: i16| matches!(v, 1 | 2 | 3 | 5);
    let le = i16::from_le_bytes(head);
    if known(le) {
        return Some((le, Endianness::Little));
    }
    let be = i16::from_be_bytes(head);
    known(be).then_some((be, Endianness::Big))
}

struct WaveHeader {
    name: String,
    kind: i16,
    npnts: usize,
    dims: [usize; 4],
}

fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Binary header plus `WaveHeader2` for versions 1 to 3.
fn header_v2<'a>(
    input: &mut &'a [u8],
    version: i16,
    e: Endianness,
) -> Result<WaveHeader, ContextError> {
    let bin_len = match version {
        1 => 8usize,
        2 => 16,
        _ => 20,
    };
    let _ = take(bin_len).parse_next(input)?;
    let kind = binary::i16(e).parse_next(input)?;
    let _next = take(4usize).parse_next(input)?;
    let name = take(20usize).parse_next(input)?;
    let _ = take(2 + 2 + 4 + 4 + 4usize).parse_next(input)?;
    let npnts = binary::i32(e).parse_next(input)?;
    // rest of WaveHeader2 up to wData
    let _ = take(64usize).parse_next(input)?;
    Ok(WaveHeader {
        name: c_string(name),
        kind,
        npnts: npnts.max(0) as usize,
        dims: [npnts.max(0) as usize, 0, 0, 0],
    })
}

/// `BinHeader5` plus `WaveHeader5`.
fn header_v5<'a>(input: &mut &'a [u8], e: Endianness) -> Result<WaveHeader, ContextError> {
    let _ = take(64usize).parse_next(input)?;
    let _ = take(12usize).parse_next(input)?;
    let npnts = binary::i32(e).parse_next(input)?;
    let kind = binary::i16(e).parse_next(input)?;
    let _ = take(2 + 6 + 2usize).parse_next(input)?;
    let name = take(32usize).parse_next(input)?;
    let _ = take(8usize).parse_next(input)?;
    let dims: Vec<i32> = repeat(4usize, binary::i32(e)).parse_next(input)?;
    let _ = take(236usize).parse_next(input)?;
    Ok(WaveHeader {
        name: c_string(name),
        kind,
        npnts: npnts.max(0) as usize,
        dims: [
            dims[0].max(0) as usize,
            dims[1].max(0) as usize,
            dims[2].max(0) as usize,
            dims[3].max(0) as usize,
        ],
    })
}

fn samples<'a>(
    input: &mut &'a [u8],
    kind: i16,
    n: usize,
    e: Endianness,
) -> Result<Vec<f64>, ContextError> {
    let unsigned = kind & NT_UNSIGNED != 0;
    match kind & !NT_UNSIGNED {
        NT_FP32 => repeat(n, binary::f32(e).map(f64::from)).parse_next(input),
        NT_FP64 => repeat(n, binary::f64(e)).parse_next(input),
        NT_I8 if unsigned => repeat(n, binary::u8.map(f64::from)).parse_next(input),
        NT_I8 => repeat(n, binary::i8.map(f64::from)).parse_next(input),
        NT_I16 if unsigned => repeat(n, binary::u16(e).map(f64::from)).parse_next(input),
        NT_I16 => repeat(n, binary::i16(e).map(f64::from)).parse_next(input),
        NT_I32 if unsigned => repeat(n, binary::u32(e).map(f64::from)).parse_next(input),
        _ => repeat(n, binary::i32(e).map(f64::from)).parse_next(input),
    }
}

fn supported_kind(kind: i16) -> bool {
    kind & NT_CMPLX == 0
        && matches!(
            kind & !NT_UNSIGNED,
            NT_FP32 | NT_FP64 | NT_I8 | NT_I16 | NT_I32
        )
}

/// Decodes a standalone binary wave.
pub fn parse_ibw(bytes: &[u8]) -> std::result::Result<Wave, String> {
    let (version, e) =
        detect_version(bytes).ok_or_else(|| "not an Igor binary wave".to_string())?;
    let mut input = bytes;
    let header = if version == 5 {
        header_v5(&mut input, e)
    } else {
        header_v2(&mut input, version, e)
    }
    .map_err(|err| format!("truncated wave header: {err:?}"))?;

    if !supported_kind(header.kind) {
        return Err(format!(
            "wave `{}` has unsupported data type {:#x}",
            header.name, header.kind
        ));
    }
    let data = samples(&mut input, header.kind, header.npnts, e)
        .map_err(|err| format!("wave `{}` data is truncated: {err:?}", header.name))?;

    let rows = if header.dims[0] == 0 { header.npnts } else { header.dims[0] };
    if rows == 0 || header.npnts % rows != 0 {
        return Err(format!(
            "wave `{}` has {} points, which do not fill rows of {rows}",
            header.name, header.npnts
        ));
    }
    let cols = header.npnts / rows;
    if data.len() < rows * cols {
        return Err(format!("wave `{}` holds fewer points than its dimensions", header.name));
    }
    Ok(Wave {
        name: header.name,
        rows,
        cols,
        data,
    })
}

/// Collects the live wave records of a packed experiment file.
pub fn parse_pxp(bytes: &[u8]) -> std::result::Result<Vec<Wave>, String> {
    let e = packed_byte_order(bytes).ok_or_else(|| "not an Igor packed file".to_string())?;
    let mut input = bytes;
    let mut waves = Vec::new();
    while input.len() >= 8 {
        let (record_type, body) = record(&mut input, e)
            .map_err(|err| format!("truncated packed record: {err:?}"))?;
        if record_type & SUPERSEDED == 0 && record_type & !SUPERSEDED == WAVE_RECORD {
            waves.push(parse_ibw(body)?);
        }
    }
    if waves.is_empty() {
        return Err("packed file holds no waves".into());
    }
    Ok(waves)
}

fn record<'a>(input: &mut &'a [u8], e: Endianness) -> Result<(u16, &'a [u8]), ContextError> {
    let record_type = binary::u16(e).parse_next(input)?;
    let _version = binary::i16(e).parse_next(input)?;
    let len = binary::i32(e).parse_next(input)?;
    let body = take(len.max(0) as usize).parse_next(input)?;
    Ok((record_type, body))
}

/// Picks the byte order whose first record length fits the file.
fn packed_byte_order(bytes: &[u8]) -> Option<Endianness> {
    let len: [u8; 4] = bytes.get(4..8)?.try_into().ok()?;
    let fits = |n: i32| n >= 0 && (n as usize) <= bytes.len() - 8;
    if fits(i32::from_le_bytes(len)) {
        Some(Endianness::Little)
    } else if fits(i32::from_be_bytes(len)) {
        Some(Endianness::Big)
    } else {
        None
    }
}

fn unsupported(path: &Path, reason: &str) -> StimError {
    StimError::UnsupportedTable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Maps waves onto table rows. A multi-column wave supplies the columns
/// itself; otherwise each column is its own wave and a wave whose name
/// contains `trig` holds the trigger flags.
pub fn table_from_waves(path: &Path, waves: &[Wave], schema: TableSchema) -> Result<TableData> {
    let trig = waves.iter().find(|w| w.is_trigger()).and_then(|w| w.column(0));
    let values: Vec<&Wave> = waves.iter().filter(|w| !w.is_trigger()).collect();
    let first = values
        .first()
        .ok_or_else(|| unsupported(path, "no value wave found"))?;

    let mut columns: Vec<&[f64]> = (0..first.cols).filter_map(|c| first.column(c)).collect();
    if columns.len() == 1 {
        columns.extend(values.iter().skip(1).filter_map(|w| w.column(0)));
    }
    let leading = columns
        .first()
        .copied()
        .ok_or_else(|| unsupported(path, "empty value wave"))?;
    let rows = leading.len();
    let flag = |col: Option<&[f64]>, i: usize| {
        col.and_then(|c| c.get(i)).is_some_and(|v| *v != 0.0)
    };

    match schema {
        TableSchema::Polar => {
            let trig = trig.or(if first.cols > 1 { columns.get(1).copied() } else { None });
            Ok(TableData::Polar(
                (0..rows)
                    .map(|i| PolarRow {
                        radius: leading[i],
                        trigger: flag(trig, i),
                    })
                    .collect(),
            ))
        }
        TableSchema::Coordinate => {
            let ys = columns
                .get(1)
                .ok_or_else(|| unsupported(path, "coordinate tables need x and y columns"))?;
            let trig = trig.or(if first.cols > 2 { columns.get(2).copied() } else { None });
            Ok(TableData::Coordinate(
                (0..rows.min(ys.len()))
                    .map(|i| CoordRow {
                        xy: [leading[i], ys[i]],
                        trigger: flag(trig, i),
                    })
                    .collect(),
            ))
        }
        TableSchema::Direction => Err(unsupported(
            path,
            "direction tables can only be read from text files",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Version 2 wave of f32 samples.
    fn ibw_v2(name: &str, values: &[f32], big: bool) -> Vec<u8> {
        let i16b = |v: i16| if big { v.to_be_bytes() } else { v.to_le_bytes() };
        let i32b = |v: i32| if big { v.to_be_bytes() } else { v.to_le_bytes() };
        let mut out = Vec::new();
        out.extend(i16b(2));
        out.extend([0u8; 14]);
        out.extend(i16b(NT_FP32));
        out.extend([0u8; 4]);
        let mut bname = [0u8; 20];
        bname[..name.len()].copy_from_slice(name.as_bytes());
        out.extend(bname);
        out.extend([0u8; 16]);
        out.extend(i32b(values.len() as i32));
        out.extend([0u8; 64]);
        assert_eq!(out.len(), 126);
        for v in values {
            out.extend(if big { v.to_be_bytes() } else { v.to_le_bytes() });
        }
        out
    }

    /// Version 5 little-endian wave of f64 samples with `rows` x `cols`.
    fn ibw_v5(name: &str, values: &[f64], rows: i32, cols: i32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(5i16.to_le_bytes());
        out.extend([0u8; 62]);
        out.extend([0u8; 12]);
        out.extend((values.len() as i32).to_le_bytes());
        out.extend(NT_FP64.to_le_bytes());
        out.extend([0u8; 10]);
        let mut bname = [0u8; 32];
        bname[..name.len()].copy_from_slice(name.as_bytes());
        out.extend(bname);
        out.extend([0u8; 8]);
        for d in [rows, cols, 0, 0] {
            out.extend(d.to_le_bytes());
        }
        out.extend([0u8; 236]);
        assert_eq!(out.len(), 384);
        for v in values {
            out.extend(v.to_le_bytes());
        }
        out
    }

    fn packed(records: &[(u16, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (kind, body) in records {
            out.extend(kind.to_le_bytes());
            out.extend(0i16.to_le_bytes());
            out.extend((body.len() as i32).to_le_bytes());
            out.extend(body);
        }
        out
    }

    #[test]
    fn version_two_in_both_byte_orders() {
        for big in [false, true] {
            let wave = parse_ibw(&ibw_v2("radius", &[1.5, -2.0, 3.0], big)).unwrap();
            assert_eq!(wave.name, "radius");
            assert_eq!(wave.data, vec![1.5, -2.0, 3.0]);
            assert_eq!((wave.rows, wave.cols), (3, 1));
        }
    }

    #[test]
    fn version_five_keeps_columns() {
        let wave = parse_ibw(&ibw_v5("xy", &[1.0, 2.0, 10.0, 20.0], 2, 2)).unwrap();
        assert_eq!(wave.column(1), Some(&[10.0, 20.0][..]));
        let table =
            table_from_waves(Path::new("xy.ibw"), &[wave], TableSchema::Coordinate).unwrap();
        assert_eq!(
            table,
            TableData::Coordinate(vec![
                CoordRow { xy: [1.0, 10.0], trigger: false },
                CoordRow { xy: [2.0, 20.0], trigger: false },
            ])
        );
    }

    #[test]
    fn packed_files_pair_values_with_trigger_wave() {
        let bytes = packed(&[
            (1, vec![0u8; 12]),
            (WAVE_RECORD, ibw_v2("radius", &[100.0, 50.0, 0.0], false)),
            (WAVE_RECORD | SUPERSEDED, ibw_v2("old", &[9.0], false)),
            (WAVE_RECORD, ibw_v2("radius_trig", &[1.0, 0.0, 1.0], false)),
        ]);
        let waves = parse_pxp(&bytes).unwrap();
        assert_eq!(waves.len(), 2);
        let table = table_from_waves(Path::new("s.pxp"), &waves, TableSchema::Polar).unwrap();
        let TableData::Polar(rows) = table else {
            panic!("expected polar rows");
        };
        assert_eq!(rows.iter().map(|r| r.trigger).collect::<Vec<_>>(), vec![true, false, true]);
        assert_eq!(rows[1].radius, 50.0);
    }

    #[test]
    fn single_column_cannot_be_coordinates() {
        let wave = parse_ibw(&ibw_v2("x", &[1.0], false)).unwrap();
        let err =
            table_from_waves(Path::new("x.ibw"), &[wave], TableSchema::Coordinate).unwrap_err();
        assert!(matches!(err, StimError::UnsupportedTable { .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_ibw(&[0xff, 0x7f, 0, 0]).is_err());
        assert!(parse_ibw(&ibw_v2("short", &[1.0, 2.0], false)[..130]).is_err());
    }

    #[test]
    fn dimensions_that_overrun_the_points_are_format_errors() {
        assert!(parse_ibw(&ibw_v5("radius", &[1.0, 2.0], 5, 0)).is_err());
        assert!(parse_ibw(&ibw_v5("radius", &[1.0, 2.0, 3.0], 2, 0)).is_err());
        assert!(parse_ibw(&ibw_v5("radius", &[], 0, 0)).is_err());

        let path = std::env::temp_dir()
            .join(format!("patchstim-overrun-{}.ibw", std::process::id()));
        std::fs::write(&path, ibw_v5("radius", &[1.0, 2.0], 5, 0)).unwrap();
        let err = crate::table::load_table(&path, TableSchema::Polar).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, StimError::TableFormat { .. }), "{err:?}");
    }

    #[test]
    fn waves_without_columns_are_unsupported() {
        let empty = Wave {
            name: "radius".into(),
            rows: 3,
            cols: 0,
            data: Vec::new(),
        };
        let err = table_from_waves(Path::new("r.ibw"), &[empty], TableSchema::Polar).unwrap_err();
        assert!(matches!(err, StimError::UnsupportedTable { .. }));
    }
}
