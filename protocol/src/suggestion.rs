use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::task::AnalysisType;

/// An approved rename/move suggestion, as read (never mutated) from the
/// external suggestion store. The Suggestion Execution Pipeline turns these
/// into `FileOperation`s; it never writes back to the store that produced
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub file_id: Uuid,
    /// Proposed new name (no separator) or path (contains a separator).
    pub suggested_value: String,
    pub adjusted_confidence: f64,
    pub analysis_type: AnalysisType,
    pub is_recommended: bool,
}
