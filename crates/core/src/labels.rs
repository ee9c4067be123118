//! Per-frame polygon label files.
//!
//! One polygon per line: `class_id x1 y1 x2 y2 ... xn yn`, coordinates
//! normalized to the frame size. Segmenters that also write a confidence
//! leave one unpaired trailing value, which is ignored.

use crate::error::PipelineError;
use std::fmt;
use std::path::Path;

pub type ClassId = u8;

#[derive(Debug, Clone, PartialEq)]
pub struct PolygonLabel {
    pub class_id: ClassId,
    pub vertices: Vec<(f64, f64)>,
}

/// A label line that was skipped. Never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelWarning {
    EmptyLine { line: usize },
    BadClassId { line: usize, token: String },
    UnknownClass { line: usize, class_id: u32 },
    BadCoordinate { line: usize, token: String },
}

impl fmt::Display for LabelWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelWarning::EmptyLine { line } => write!(f, "line {line}: empty, skipped"),
            LabelWarning::BadClassId { line, token } => {
                write!(f, "line {line}: class id `{token}` is not an integer, skipped")
            }
            LabelWarning::UnknownClass { line, class_id } => {
                write!(f, "line {line}: unknown class {class_id}, skipped")
            }
            LabelWarning::BadCoordinate { line, token } => {
                write!(f, "line {line}: coordinate `{token}` is not a number, skipped")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLabels {
    pub labels: Vec<PolygonLabel>,
    pub warnings: Vec<LabelWarning>,
}

pub fn parse_labels(text: &str, class_count: usize) -> ParsedLabels {
    let mut parsed = ParsedLabels::default();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        match parse_line(raw, line, class_count) {
            Ok(label) => parsed.labels.push(label),
            Err(w) => parsed.warnings.push(w),
        }
    }
    parsed
}

fn parse_line(raw: &str, line: usize, class_count: usize) -> Result<PolygonLabel, LabelWarning> {
    let mut tokens = raw.split_whitespace();
    let first = tokens.next().ok_or(LabelWarning::EmptyLine { line })?;
    let class_id: u32 = first.parse().map_err(|_| LabelWarning::BadClassId {
        line,
        token: first.to_string(),
    })?;
    if class_id as usize >= class_count {
        return Err(LabelWarning::UnknownClass { line, class_id });
    }

    let coords = tokens
        .map(|t| {
            t.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| LabelWarning::BadCoordinate {
                    line,
                    token: t.to_string(),
                })
        })
        .collect::<Result<Vec<f64>, _>>()?;
    let vertices = coords.chunks_exact(2).map(|xy| (xy[0], xy[1])).collect();

    Ok(PolygonLabel {
        class_id: class_id as ClassId,
        vertices,
    })
}

/// Reads a label file. `Ok(None)` when the file does not exist.
pub fn read_labels(path: &Path, class_count: usize) -> Result<Option<ParsedLabels>, PipelineError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(parse_labels(&text, class_count))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_polygons_and_drops_trailing_confidence() {
        let text = "0 0.1 0.2 0.3 0.4 0.5 0.6\n2 0 0 1 0 0 1 0.87\n";
        let parsed = parse_labels(text, 3);
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.labels.len(), 2);
        assert_eq!(parsed.labels[0].vertices, vec![(0.1, 0.2), (0.3, 0.4), (0.5, 0.6)]);
        assert_eq!(parsed.labels[1].class_id, 2);
        assert_eq!(parsed.labels[1].vertices, vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]);
    }

    #[test]
    fn malformed_lines_become_warnings() {
        let text = "0 0 0 1 0 0 1\n\n   \nx 0 0 1 1\n7 0 0 1 0 0 1\n1 0 0 abc 0 0 1\n1 0 0 1 0 0 1";
        let parsed = parse_labels(text, 3);
        assert_eq!(parsed.labels.len(), 2);
        assert_eq!(
            parsed.warnings,
            vec![
                LabelWarning::EmptyLine { line: 2 },
                LabelWarning::EmptyLine { line: 3 },
                LabelWarning::BadClassId { line: 4, token: "x".into() },
                LabelWarning::UnknownClass { line: 5, class_id: 7 },
                LabelWarning::BadCoordinate { line: 6, token: "abc".into() },
            ]
        );
    }

    #[test]
    fn class_only_line_has_no_vertices() {
        let parsed = parse_labels("1", 3);
        assert_eq!(parsed.labels.len(), 1);
        assert!(parsed.labels[0].vertices.is_empty());
    }

    #[test]
    fn missing_file_is_none() {
        let temp = tempfile::tempdir().unwrap();
        let res = read_labels(&temp.path().join("frame_1.0s.txt"), 3).unwrap();
        assert!(res.is_none());
    }
}
