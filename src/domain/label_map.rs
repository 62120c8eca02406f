// ============================================================
// Layer 3 — Label → Target Mapping
// ============================================================
// A category stream normally turns each label index into a
// one-hot column. Some setups instead map every label to a
// fixed-width 0/1 target vector (e.g. a senone mapped onto a
// set of articulatory classes).
//
// The mapping is described by two texts:
//
//   label list                 mapping
//   ──────────                 ───────────────
//   sil                        sil 1000
//   aa                         aa  0110
//   ...                        ...
//
// Line k of the mapping must name the same label as line k of
// the list, and every target string must have the same width
// and contain only '0' and '1'.

use crate::domain::error::{ReaderError, ReaderResult};

/// One 0/1 target vector per label index.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTargetMap {
    targets:    Vec<Vec<f32>>,
    target_dim: usize,
}

impl LabelTargetMap {
    /// Build a map directly from target rows.
    /// All rows must share the same width.
    pub fn from_rows(targets: Vec<Vec<f32>>) -> ReaderResult<Self> {
        let target_dim = targets.first().map(Vec::len).unwrap_or(0);
        if targets.iter().any(|t| t.len() != target_dim) {
            return Err(ReaderError::LabelMapping(
                "inconsistent target length among records".into(),
            ));
        }
        Ok(Self { targets, target_dim })
    }

    /// Parse a label list and its label→target mapping text.
    pub fn parse(label_list: &str, mapping: &str) -> ReaderResult<Self> {
        let labels: Vec<&str> = label_list
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        if labels.is_empty() {
            return Err(ReaderError::LabelMapping(
                "cannot read a label-to-target mapping without a label list".into(),
            ));
        }

        let mut targets    = Vec::with_capacity(labels.len());
        let mut target_dim = 0usize;

        for (count, line) in mapping.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            // first space separates the label token from its target string
            let line = line.trim();
            let (token, target) = match line.split_once(' ') {
                Some((t, rest)) => (t, rest.trim()),
                None            => (line, ""),
            };

            if labels.get(count) != Some(&token) {
                return Err(ReaderError::LabelMapping(format!(
                    "mismatch between label list and mapping at line {}: '{}'",
                    count + 1,
                    token
                )));
            }

            if count == 0 {
                target_dim = target.len();
            } else if target.len() != target_dim {
                return Err(ReaderError::LabelMapping(
                    "inconsistent target length among records".into(),
                ));
            }

            let row = target
                .chars()
                .map(|c| match c {
                    '1' => Ok(1.0f32),
                    '0' => Ok(0.0f32),
                    other => Err(ReaderError::LabelMapping(format!(
                        "expecting only 1's or 0's in target of '{}', found '{}'",
                        token, other
                    ))),
                })
                .collect::<ReaderResult<Vec<f32>>>()?;

            targets.push(row);
        }

        if targets.len() != labels.len() {
            return Err(ReaderError::LabelMapping(format!(
                "label list has {} entries but the mapping has {}",
                labels.len(),
                targets.len()
            )));
        }

        Ok(Self { targets, target_dim })
    }

    /// Width of every target vector
    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    /// Number of labels covered by the map
    pub fn label_count(&self) -> usize {
        self.targets.len()
    }

    /// Target vector for a label, if the label is covered
    pub fn target(&self, label: usize) -> Option<&[f32]> {
        self.targets.get(label).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_matching_files() {
        let map = LabelTargetMap::parse("sil\naa\nb\n", "sil 100\naa 011\nb 001\n").unwrap();
        assert_eq!(map.label_count(), 3);
        assert_eq!(map.target_dim(), 3);
        assert_eq!(map.target(1), Some(&[0.0, 1.0, 1.0][..]));
        assert_eq!(map.target(3), None);
    }

    #[test]
    fn test_rejects_order_mismatch() {
        let err = LabelTargetMap::parse("sil\naa\n", "aa 10\nsil 01\n").unwrap_err();
        assert!(matches!(err, ReaderError::LabelMapping(_)));
    }

    #[test]
    fn test_rejects_uneven_widths() {
        assert!(LabelTargetMap::parse("a\nb\n", "a 10\nb 101\n").is_err());
    }

    #[test]
    fn test_rejects_non_binary_targets() {
        assert!(LabelTargetMap::parse("a\n", "a 1x1\n").is_err());
    }

    #[test]
    fn test_rejects_count_mismatch() {
        assert!(LabelTargetMap::parse("a\nb\nc\n", "a 1\nb 0\n").is_err());
    }

    #[test]
    fn test_requires_label_list() {
        assert!(LabelTargetMap::parse("", "a 1\n").is_err());
    }
}
