//! Minimal NumPy `.npy` codec for the float arrays this pipeline moves around.
//!
//! Layout:
//! - 6-byte magic `\x93NUMPY`
//! - 2-byte version (major, minor)
//! - header length: `u16` LE for v1, `u32` LE for v2/v3
//! - ASCII dict literal, e.g. `{'descr': '<f4', 'fortran_order': False, 'shape': (N, D), }`
//!   padded with spaces and terminated by `\n`
//! - raw little-endian element data

use std::io::Write;

use ndarray::{Array2, ShapeBuilder};

use crate::errors::{PipelineError, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

/// Element types we know how to widen or narrow into `f32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dtype {
    F32,
    F64,
}

impl Dtype {
    fn parse(descr: &str) -> Option<Self> {
        match descr {
            "<f4" | "=f4" | "f4" => Some(Dtype::F32),
            "<f8" | "=f8" | "f8" => Some(Dtype::F64),
            _ => None,
        }
    }

    fn width(self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F64 => 8,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Decodes a 2-D float array. `object` names the source in error messages.
pub fn decode_matrix(object: &str, bytes: &[u8]) -> Result<Array2<f32>> {
    let (header, data) = split_header(object, bytes)?;
    let (rows, cols) = match header.shape.as_slice() {
        [rows, cols] => (*rows, *cols),
        other => {
            return Err(PipelineError::malformed_array(
                object,
                format!("expected a 2-D array, found shape {other:?}"),
            ))
        }
    };
    let count = rows
        .checked_mul(cols)
        .ok_or_else(|| PipelineError::malformed_array(object, "array shape overflows"))?;
    let values = decode_values(object, header.dtype, data, count)?;
    let shape = (rows, cols);
    let array = if header.fortran_order {
        Array2::from_shape_vec(shape.f(), values)
    } else {
        Array2::from_shape_vec(shape, values)
    };
    array.map_err(|err| PipelineError::malformed_array(object, err.to_string()))
}

/// Decodes a 1-D float array, e.g. a persisted score vector.
pub fn decode_vector(object: &str, bytes: &[u8]) -> Result<Vec<f32>> {
    let (header, data) = split_header(object, bytes)?;
    let len = match header.shape.as_slice() {
        [len] => *len,
        other => {
            return Err(PipelineError::malformed_array(
                object,
                format!("expected a 1-D array, found shape {other:?}"),
            ))
        }
    };
    decode_values(object, header.dtype, data, len)
}

/// Writes `values` as a 1-D little-endian `f32` array (format version 1.0).
pub fn write_vector<W: Write>(writer: &mut W, values: &[f32]) -> std::io::Result<()> {
    let dict = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    // magic + version + u16 length + dict + trailing newline, padded to the alignment.
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    let header_len = dict.len() + padding + 1;
    let header_len = u16::try_from(header_len).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "npy header too long")
    })?;

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(dict.as_bytes())?;
    writer.write_all(&vec![b' '; padding])?;
    writer.write_all(b"\n")?;
    for value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Encodes a 2-D `f32` array in C order; mostly useful for building fixtures.
pub fn encode_matrix(array: &Array2<f32>) -> Vec<u8> {
    let (rows, cols) = array.dim();
    let dict = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {cols}), }}");
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    let header_len = (dict.len() + padding + 1) as u16;

    let mut out = Vec::with_capacity(unpadded + padding + rows * cols * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.resize(out.len() + padding, b' ');
    out.push(b'\n');
    for value in array.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn split_header<'a>(object: &str, bytes: &'a [u8]) -> Result<(Header, &'a [u8])> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(PipelineError::malformed_array(object, "missing NPY magic bytes"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(PipelineError::malformed_array(object, "truncated NPY preamble"));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        _ => {
            return Err(PipelineError::malformed_array(
                object,
                format!("unsupported NPY version {}.{}", major, bytes[7]),
            ))
        }
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(PipelineError::malformed_array(object, "truncated NPY header"));
    }
    let text = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| PipelineError::malformed_array(object, "NPY header is not UTF-8"))?;
    let header = parse_header(text).map_err(|reason| PipelineError::malformed_array(object, reason))?;
    Ok((header, &bytes[data_start..]))
}

fn parse_header(text: &str) -> std::result::Result<Header, String> {
    let descr = dict_value(text, "descr").ok_or("header missing 'descr'")?;
    let descr = descr.trim_matches(|c| c == '\'' || c == '"');
    let dtype = Dtype::parse(descr).ok_or_else(|| format!("unsupported dtype {descr}"))?;

    let fortran_order = match dict_value(text, "fortran_order") {
        Some("True") => true,
        Some("False") | None => false,
        Some(other) => return Err(format!("unexpected fortran_order {other}")),
    };

    let shape_start = key_offset(text, "shape").ok_or("header missing 'shape'")?;
    let rest = &text[shape_start..];
    let open = rest.find('(').ok_or("shape is not a tuple")?;
    let close = rest[open..].find(')').ok_or("unterminated shape tuple")? + open;
    let shape = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| format!("bad shape component {part}"))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Header {
        dtype,
        fortran_order,
        shape,
    })
}

/// Offset just past `'key':` in the dict literal.
fn key_offset(text: &str, key: &str) -> Option<usize> {
    [format!("'{key}':"), format!("\"{key}\":")]
        .iter()
        .find_map(|needle| text.find(needle.as_str()).map(|at| at + needle.len()))
}

/// Scalar value following `key`, up to the next comma or closing brace.
fn dict_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = key_offset(text, key)?;
    let rest = &text[start..];
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn decode_values(object: &str, dtype: Dtype, data: &[u8], count: usize) -> Result<Vec<f32>> {
    let needed = count
        .checked_mul(dtype.width())
        .ok_or_else(|| PipelineError::malformed_array(object, "array shape overflows"))?;
    if data.len() < needed {
        return Err(PipelineError::malformed_array(
            object,
            format!("expected {needed} data bytes, found {}", data.len()),
        ));
    }
    let data = &data[..needed];
    let values = match dtype {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F64 => data
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect(),
    };
    Ok(values)
}
