use thiserror::Error;

use crate::expr::ExprParseError;

/// Errors that can abort tree construction. Allocation cycles themselves
/// never fail; per-cycle anomalies are logged and survived.
#[derive(Debug, Error)]
pub enum HgqError {
    #[error("failed to obtain value for GROUP_SORT_EXPR")]
    MissingSortExpr,
    #[error("failed to parse GROUP_SORT_EXPR = {expr}: {source}")]
    InvalidSortExpr {
        expr: String,
        #[source]
        source: ExprParseError,
    },
}
