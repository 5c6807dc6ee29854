//! Rule evaluation: reducing a point-in-time query result into per-label-set
//! verdicts.
//!
//! Query execution itself is an external collaborator behind
//! [`QueryExecutor`]; this crate only applies a rule's threshold condition
//! to whatever series came back. The reduction is deterministic: identical
//! inputs produce identical output, with no clock reads beyond the supplied
//! evaluation timestamp.

pub mod reduce;


pub use reduce::{execution_error, reduce};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vigil_common::types::{LabelSet, QuerySpec};

/// One series of a query result: a label set and its reduced scalar value.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: LabelSet,
    pub value: f64,
}

impl Series {
    pub fn new(labels: LabelSet, value: f64) -> Self {
        Self { labels, value }
    }
}

/// Errors surfaced by the external query execution boundary.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The backend rejected or failed the query.
    #[error("query execution failed: {0}")]
    Execution(String),

    /// The backend could not be reached or timed out.
    #[error("query backend unavailable: {0}")]
    Unavailable(String),
}

/// External query execution boundary. Invoked once per evaluation attempt;
/// the scheduler owns the retry budget.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        query: &QuerySpec,
        eval_time: DateTime<Utc>,
    ) -> Result<Vec<Series>, QueryError>;
}
