use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const MANIFEST_HEADER: &str = "ne,path,split";

/// Which part of the pipeline a replicate is reserved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitLabel {
    Train,
    Validation,
    Test,
}

impl SplitLabel {
    pub const ALL: [SplitLabel; 3] = [SplitLabel::Train, SplitLabel::Validation, SplitLabel::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            SplitLabel::Train => "train",
            SplitLabel::Validation => "validation",
            SplitLabel::Test => "test",
        }
    }
}

impl fmt::Display for SplitLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SplitLabel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "train" => Ok(SplitLabel::Train),
            "validation" => Ok(SplitLabel::Validation),
            "test" => Ok(SplitLabel::Test),
            other => Err(format!("unknown split label '{other}'")),
        }
    }
}

/// One simulated replicate: its target, where its array lives, and its split.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRow {
    pub ne: f64,
    /// Relative to the directory holding the manifest.
    pub path: PathBuf,
    pub split: SplitLabel,
}

pub fn write_manifest(path: &Path, rows: &[ManifestRow]) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{MANIFEST_HEADER}").map_err(|e| Error::io(path, e))?;
    for (i, row) in rows.iter().enumerate() {
        let replicate_path = row.path.to_str().filter(|p| !p.contains([',', '\n']));
        let Some(replicate_path) = replicate_path else {
            return Err(Error::Manifest {
                path: path.to_path_buf(),
                line: i + 2,
                reason: format!("cannot store path {:?} in a CSV field", row.path),
            });
        };
        writeln!(writer, "{},{},{}", row.ne, replicate_path, row.split)
            .map_err(|e| Error::io(path, e))?;
    }
    writer.flush().map_err(|e| Error::io(path, e))
}

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut lines = BufReader::new(file).lines();
    let malformed = |line: usize, reason: String| Error::Manifest {
        path: path.to_path_buf(),
        line,
        reason,
    };

    match lines.next() {
        Some(header) => {
            let header = header.map_err(|e| Error::io(path, e))?;
            if header.trim() != MANIFEST_HEADER {
                return Err(malformed(
                    1,
                    format!("expected header '{MANIFEST_HEADER}', found '{}'", header.trim()),
                ));
            }
        }
        None => return Err(malformed(1, "empty manifest".to_string())),
    }

    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        let line_number = i + 2;
        let line = line.map_err(|e| Error::io(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let [ne, replicate_path, split] = fields.as_slice() else {
            return Err(malformed(
                line_number,
                format!("expected 3 fields, found {}", fields.len()),
            ));
        };
        let ne = ne
            .parse::<f64>()
            .map_err(|e| malformed(line_number, format!("bad ne '{ne}': {e}")))?;
        let split = split
            .parse::<SplitLabel>()
            .map_err(|reason| malformed(line_number, reason))?;
        rows.push(ManifestRow {
            ne,
            path: PathBuf::from(replicate_path),
            split,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rows() -> Vec<ManifestRow> {
        vec![
            ManifestRow {
                ne: 1234.5,
                path: PathBuf::from("replicates/rep_00000.npy"),
                split: SplitLabel::Train,
            },
            ManifestRow {
                ne: 20000.0,
                path: PathBuf::from("replicates/rep_00001.npy"),
                split: SplitLabel::Validation,
            },
            ManifestRow {
                ne: 0.1 + 0.2,
                path: PathBuf::from("replicates/rep_00002.npy"),
                split: SplitLabel::Test,
            },
        ]
    }

    #[test]
    fn test_manifest_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.csv");
        write_manifest(&path, &sample_rows()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("ne,path,split\n1234.5,replicates/rep_00000.npy,train\n"));
        assert_eq!(read_manifest(&path).unwrap(), sample_rows());
    }

    #[test]
    fn test_split_label_parsing() {
        for label in SplitLabel::ALL {
            assert_eq!(label.to_string().parse::<SplitLabel>(), Ok(label));
        }
        assert!("training".parse::<SplitLabel>().is_err());
    }

    #[test]
    fn test_rejects_malformed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.csv");

        std::fs::write(&path, "ne,file,split\n").unwrap();
        assert!(matches!(
            read_manifest(&path),
            Err(Error::Manifest { line: 1, .. })
        ));

        std::fs::write(&path, "ne,path,split\n100,a.npy,train\n200,b.npy\n").unwrap();
        assert!(matches!(
            read_manifest(&path),
            Err(Error::Manifest { line: 3, .. })
        ));

        std::fs::write(&path, "ne,path,split\nlots,a.npy,train\n").unwrap();
        assert!(matches!(
            read_manifest(&path),
            Err(Error::Manifest { line: 2, .. })
        ));

        std::fs::write(&path, "ne,path,split\n100,a.npy,holdout\n").unwrap();
        assert!(read_manifest(&path).is_err());
    }

    #[test]
    fn test_rejects_unrepresentable_path() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![ManifestRow {
            ne: 1.0,
            path: PathBuf::from("a,b.npy"),
            split: SplitLabel::Train,
        }];
        assert!(write_manifest(&dir.path().join("manifest.csv"), &rows).is_err());
    }
}
