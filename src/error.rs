use thiserror::Error;

use crate::models::CommissionLevel;

/// Structural assumptions about upstream data that no longer hold.
///
/// These are never recovered from: a page, roster or join that breaks one of
/// them means the fixed schema or override tables need updating, and partial
/// output would be misleading.
#[derive(Debug, Error)]
pub enum StructuralError {
    #[error("page '{key}': no record id (expected 'vibid=<digits>' in the key)")]
    MissingRecordId { key: String },

    #[error("page '{key}': results table not found")]
    TableNotFound { key: String },

    #[error("page '{key}': expected {expected} feature rows after the header, found {found}")]
    RowCountMismatch {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("page '{key}', row {row}: expected {expected} station columns, found {found}")]
    ColumnCountMismatch {
        key: String,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("page '{key}', row {row}, column {column}: '{value}' is not a count")]
    BadCellValue {
        key: String,
        row: usize,
        column: usize,
        value: String,
    },

    #[error("stored cell refers to feature slot {index}, which is not a feature in the schema")]
    UnknownFeatureSlot { index: usize },

    #[error("{level} commission {id}: parent {parent_id:?} not found among {parent_level} commissions")]
    MissingParent {
        level: CommissionLevel,
        parent_level: CommissionLevel,
        id: i64,
        parent_id: Option<i64>,
    },

    #[error("result record '{record_id}': region key '{region_key}' matches no roster region")]
    UnknownRegionKey {
        record_id: String,
        region_key: String,
    },

    #[error("station {number} in '{region}': result cells lack feature '{feature}'")]
    MissingFeature {
        region: String,
        number: u64,
        feature: &'static str,
    },
}
