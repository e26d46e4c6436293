use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::{Error, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;

fn header_dict(len: usize) -> String {
    format!("{{'descr': '<f8', 'fortran_order': False, 'shape': ({len},), }}")
}

/// Writes a 1-D little-endian `f64` array as a version 1.0 `.npy` file.
pub fn write_npy_f64(path: &Path, values: &[f64]) -> Result<()> {
    let dict = header_dict(values.len());
    // magic + version + u16 length + dict + '\n', padded to the alignment
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    let header_len = dict.len() + padding + 1;
    let header_len = u16::try_from(header_len).map_err(|_| Error::Npy {
        path: path.to_path_buf(),
        reason: format!("header of {header_len} bytes does not fit version 1.0"),
    })?;

    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut write = |bytes: &[u8]| writer.write_all(bytes).map_err(|e| Error::io(path, e));
    write(MAGIC)?;
    write(&[1, 0])?;
    write(&header_len.to_le_bytes())?;
    write(dict.as_bytes())?;
    write(" ".repeat(padding).as_bytes())?;
    write(b"\n")?;
    for value in values {
        write(&value.to_le_bytes())?;
    }
    writer.flush().map_err(|e| Error::io(path, e))
}

/// Reads a 1-D `<f8` C-order `.npy` file (format version 1.x or 2.x).
pub fn read_npy_f64(path: &Path) -> Result<Vec<f64>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut bytes = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::io(path, e))?;
    parse_npy_f64(&bytes).map_err(|reason| Error::Npy {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_npy_f64(bytes: &[u8]) -> std::result::Result<Vec<f64>, String> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err("missing magic string".to_string());
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated header length".to_string());
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        major => return Err(format!("unsupported format version {major}.{}", bytes[7])),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| "truncated header".to_string())?;
    let header = std::str::from_utf8(header).map_err(|_| "header is not text".to_string())?;

    let descr = dict_value(header, "descr").ok_or("header has no 'descr'")?;
    if descr.trim_matches(|c| c == '\'' || c == '"') != "<f8" {
        return Err(format!("expected dtype '<f8', found {descr}"));
    }
    let fortran_order = dict_value(header, "fortran_order").ok_or("header has no 'fortran_order'")?;
    if fortran_order != "False" {
        return Err("Fortran-ordered arrays are not supported".to_string());
    }
    let len = parse_shape(dict_value(header, "shape").ok_or("header has no 'shape'")?)?;

    let expected = len
        .checked_mul(8)
        .ok_or_else(|| format!("shape ({len},) is too large"))?;
    let data = &bytes[data_start..];
    if data.len() != expected {
        return Err(format!(
            "shape says {len} values but {} data bytes follow",
            data.len()
        ));
    }
    Ok(data
        .chunks_exact(8)
        .map(|chunk| {
            let mut buffer = [0u8; 8];
            buffer.copy_from_slice(chunk);
            f64::from_le_bytes(buffer)
        })
        .collect())
}

/// The raw text of `key`'s value in the header dictionary.
fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = header
        .find(&format!("'{key}'"))
        .or_else(|| header.find(&format!("\"{key}\"")))?;
    let rest = &header[start + key.len() + 2..];
    let rest = rest.trim_start().strip_prefix(':')?.trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find(',').or_else(|| rest.find('}'))?
    };
    Some(rest[..end].trim())
}

fn parse_shape(shape: &str) -> std::result::Result<usize, String> {
    let inner = shape
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| format!("malformed shape {shape}"))?;
    let dims: Vec<&str> = inner
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();
    match dims.as_slice() {
        [len] => len
            .parse::<usize>()
            .map_err(|_| format!("malformed shape {shape}")),
        _ => Err(format!("expected a 1-D array, found shape {shape}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.npy");
        let values = vec![0.5, 1.25, 1e6 - 1.0, 3.0e-9];
        write_npy_f64(&path, &values).unwrap();
        assert_eq!(read_npy_f64(&path).unwrap(), values);

        let bytes = std::fs::read(&path).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % ALIGNMENT, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
    }

    #[test]
    fn test_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.npy");
        write_npy_f64(&path, &[]).unwrap();
        assert!(read_npy_f64(&path).unwrap().is_empty());
    }

    #[test]
    fn test_parses_numpy_style_header() {
        let dict = "{'descr': '<f8', 'fortran_order': False, 'shape': (2,), }";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        let header = format!("{dict:<117}\n");
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&1.5f64.to_le_bytes());
        bytes.extend_from_slice(&(-2.0f64).to_le_bytes());
        assert_eq!(parse_npy_f64(&bytes).unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn test_rejects_malformed_files() {
        assert!(parse_npy_f64(b"not a numpy file").is_err());

        let build = |dict: &str, payload: usize| {
            let mut bytes = MAGIC.to_vec();
            bytes.extend_from_slice(&[1, 0]);
            let header = format!("{dict}\n");
            bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
            bytes.extend_from_slice(header.as_bytes());
            bytes.extend(std::iter::repeat(0u8).take(payload));
            bytes
        };
        let int_dtype = build("{'descr': '<i8', 'fortran_order': False, 'shape': (1,), }", 8);
        assert!(parse_npy_f64(&int_dtype).unwrap_err().contains("dtype"));
        let matrix = build("{'descr': '<f8', 'fortran_order': False, 'shape': (1, 1), }", 8);
        assert!(parse_npy_f64(&matrix).unwrap_err().contains("1-D"));
        let fortran = build("{'descr': '<f8', 'fortran_order': True, 'shape': (1,), }", 8);
        assert!(parse_npy_f64(&fortran).is_err());
        let short = build("{'descr': '<f8', 'fortran_order': False, 'shape': (2,), }", 8);
        assert!(parse_npy_f64(&short).unwrap_err().contains("data bytes"));
        let huge = build(
            "{'descr': '<f8', 'fortran_order': False, 'shape': (3000000000000000000,), }",
            8,
        );
        assert!(parse_npy_f64(&huge).unwrap_err().contains("too large"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_npy_f64(&dir.path().join("absent.npy")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
