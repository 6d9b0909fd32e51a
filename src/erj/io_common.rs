use std::path::PathBuf;

use crate::erj::*;

/// The file name of a path, for log messages.
pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Resolves a path of the configuration file relative to the directory of the
/// configuration. Absolute paths are kept.
pub fn resolve_path(root: &Path, path: &str) -> String {
    let p: PathBuf = [root, Path::new(path)].iter().collect();
    p.as_path().display().to_string()
}

/// Parses a vote count. Empty cells count as zero. Spreadsheets sometimes store
/// counts as floats: integral floats are accepted.
pub fn parse_count(precinct: &str, column: &str, s: &str) -> ErjResult<u64> {
    let t = s.trim();
    if t.is_empty() {
        return Ok(0);
    }
    if let Ok(x) = t.parse::<u64>() {
        return Ok(x);
    }
    match t.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
        _ => ParsingCountSnafu {
            precinct,
            column,
            content: t,
        }
        .fail(),
    }
}

pub fn column_index(header: &[String], column: &str, path: &str) -> ErjResult<usize> {
    header
        .iter()
        .position(|h| h == column)
        .context(MissingColumnSnafu { column, path })
}
