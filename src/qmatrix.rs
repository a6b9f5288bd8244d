//! Q-matrix validation.
//!
//! The item-by-attribute incidence matrix every downstream computation
//! depends on. Validated once at construction; malformed input never
//! propagates past this module.

use serde::{Deserialize, Serialize};

use crate::error::CdmError;
use crate::types::{ItemId, MAX_ATTRIBUTES};

/// Validated item-by-attribute incidence matrix. Rows are stored as bit
/// masks: bit i set means the item requires attribute i.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QMatrix {
    n_items: usize,
    n_attributes: usize,
    rows: Vec<u32>,
}

/// Identifiability report produced alongside a validated matrix.
/// Warnings only; partial diagnosis is still valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QMatrixDiagnostics {
    /// Number of items requiring each attribute.
    pub attribute_item_counts: Vec<usize>,
    /// Attributes no item requires; these cannot be estimated.
    pub unused_attributes: Vec<usize>,
    /// Pairs of items with identical requirement rows.
    pub duplicate_rows: Vec<(ItemId, ItemId)>,
    /// Per attribute, whether some item requires it alone. Full coverage
    /// guarantees every latent class is distinguishable under DINA.
    pub single_attribute_coverage: Vec<bool>,
    /// True when every attribute is used and singly covered.
    pub complete: bool,
}

impl QMatrix {
    /// Validates a raw 0/1 matrix against declared dimensions.
    pub fn from_raw(
        n_items: usize,
        n_attributes: usize,
        raw: &[Vec<u8>],
    ) -> Result<(Self, QMatrixDiagnostics), CdmError> {
        if n_attributes == 0 {
            return Err(CdmError::InvalidQMatrix(
                "attribute count must be positive".into(),
            ));
        }
        if n_attributes > MAX_ATTRIBUTES {
            return Err(CdmError::AttributeSpaceTooLarge {
                k: n_attributes,
                max: MAX_ATTRIBUTES,
            });
        }
        if n_items == 0 {
            return Err(CdmError::InvalidQMatrix("item count must be positive".into()));
        }
        if raw.len() != n_items {
            return Err(CdmError::InvalidQMatrix(format!(
                "declared {} items but got {} rows",
                n_items,
                raw.len()
            )));
        }

        let mut rows = Vec::with_capacity(n_items);
        for (item, row) in raw.iter().enumerate() {
            if row.len() != n_attributes {
                return Err(CdmError::InvalidQMatrix(format!(
                    "row {} has {} cells, expected {}",
                    item,
                    row.len(),
                    n_attributes
                )));
            }
            let mut mask = 0u32;
            for (attr, &cell) in row.iter().enumerate() {
                match cell {
                    0 => {}
                    1 => mask |= 1 << attr,
                    other => {
                        return Err(CdmError::InvalidQMatrix(format!(
                            "cell ({}, {}) is {}, expected 0 or 1",
                            item, attr, other
                        )));
                    }
                }
            }
            if mask == 0 {
                return Err(CdmError::InvalidQMatrix(format!(
                    "item {} requires no attributes",
                    item
                )));
            }
            rows.push(mask);
        }

        let matrix = Self {
            n_items,
            n_attributes,
            rows,
        };
        let diagnostics = matrix.diagnose();
        if !diagnostics.unused_attributes.is_empty() {
            tracing::warn!(
                unused = ?diagnostics.unused_attributes,
                "q-matrix has attributes with no incident items; they cannot be estimated"
            );
        }
        Ok((matrix, diagnostics))
    }

    fn diagnose(&self) -> QMatrixDiagnostics {
        let mut counts = vec![0usize; self.n_attributes];
        let mut single_coverage = vec![false; self.n_attributes];
        for &mask in &self.rows {
            for attr in 0..self.n_attributes {
                if mask & (1 << attr) != 0 {
                    counts[attr] += 1;
                }
            }
            if mask.count_ones() == 1 {
                single_coverage[mask.trailing_zeros() as usize] = true;
            }
        }

        let unused: Vec<usize> = counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == 0)
            .map(|(a, _)| a)
            .collect();

        let mut duplicates = Vec::new();
        for i in 0..self.rows.len() {
            for j in (i + 1)..self.rows.len() {
                if self.rows[i] == self.rows[j] {
                    duplicates.push((i, j));
                }
            }
        }

        let complete = unused.is_empty() && single_coverage.iter().all(|&c| c);
        QMatrixDiagnostics {
            attribute_item_counts: counts,
            unused_attributes: unused,
            duplicate_rows: duplicates,
            single_attribute_coverage: single_coverage,
            complete,
        }
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    pub fn n_attributes(&self) -> usize {
        self.n_attributes
    }

    /// Requirement bit mask of one item.
    pub fn mask(&self, item: ItemId) -> u32 {
        self.rows[item]
    }

    pub fn requires(&self, item: ItemId, attribute: usize) -> bool {
        self.rows[item] & (1 << attribute) != 0
    }

    /// Number of attributes the item requires.
    pub fn required_count(&self, item: ItemId) -> usize {
        self.rows[item].count_ones() as usize
    }

    /// Required attribute indices of one item, ascending.
    pub fn required_attributes(&self, item: ItemId) -> Vec<usize> {
        (0..self.n_attributes)
            .filter(|&a| self.requires(item, a))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(rows: &[&[u8]]) -> Vec<Vec<u8>> {
        rows.iter().map(|r| r.to_vec()).collect()
    }

    #[test]
    fn test_valid_matrix() {
        let (q, diag) = QMatrix::from_raw(3, 2, &raw(&[&[1, 0], &[0, 1], &[1, 1]])).unwrap();
        assert_eq!(q.n_items(), 3);
        assert_eq!(q.mask(2), 0b11);
        assert_eq!(q.required_attributes(2), vec![0, 1]);
        assert_eq!(diag.attribute_item_counts, vec![2, 2]);
        assert!(diag.complete);
        assert!(diag.duplicate_rows.is_empty());
    }

    #[test]
    fn test_zero_row_rejected() {
        let err = QMatrix::from_raw(2, 2, &raw(&[&[1, 0], &[0, 0]])).unwrap_err();
        assert!(matches!(err, CdmError::InvalidQMatrix(_)));
    }

    #[test]
    fn test_non_binary_cell_rejected() {
        let err = QMatrix::from_raw(1, 2, &raw(&[&[1, 2]])).unwrap_err();
        assert!(matches!(err, CdmError::InvalidQMatrix(_)));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        assert!(QMatrix::from_raw(2, 2, &raw(&[&[1, 0]])).is_err());
        assert!(QMatrix::from_raw(1, 3, &raw(&[&[1, 0]])).is_err());
    }

    #[test]
    fn test_unused_attribute_is_warning_not_error() {
        let (_, diag) = QMatrix::from_raw(2, 3, &raw(&[&[1, 0, 0], &[1, 1, 0]])).unwrap();
        assert_eq!(diag.unused_attributes, vec![2]);
        assert!(!diag.complete);
    }

    #[test]
    fn test_duplicate_rows_flagged() {
        let (_, diag) = QMatrix::from_raw(3, 2, &raw(&[&[1, 0], &[1, 0], &[0, 1]])).unwrap();
        assert_eq!(diag.duplicate_rows, vec![(0, 1)]);
    }

    #[test]
    fn test_attribute_cap() {
        let row = vec![1u8; 21];
        let err = QMatrix::from_raw(1, 21, &[row]).unwrap_err();
        assert!(matches!(err, CdmError::AttributeSpaceTooLarge { .. }));
    }
}
