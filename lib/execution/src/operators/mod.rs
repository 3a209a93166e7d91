//! The query operators that run within a [crate::QueryOperatorTask].

mod join;
mod matching;
mod projection;

use crate::task::{Emitter, TaskInputs};
use crate::QueryExecutionError;
pub use join::{JoinOperator, JoinType};
use koral_encoding::MappingRecycleCache;
pub use matching::MatchOperator;
pub use projection::ProjectionOperator;

/// Offset and limit of the result. Slices are applied by the coordinator and never run on a
/// slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceOperator {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

/// The operator of a task.
#[derive(Debug)]
pub enum Operator {
    Match(MatchOperator),
    Join(JoinOperator),
    Projection(ProjectionOperator),
    Slice(SliceOperator),
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Match(_) => "match",
            Operator::Join(_) => "join",
            Operator::Projection(_) => "projection",
            Operator::Slice(_) => "slice",
        }
    }

    /// Performs one bounded step that emits at most `emitted_mappings_per_round` mappings.
    pub fn execute_step(
        &mut self,
        emitted_mappings_per_round: usize,
        inputs: &TaskInputs<'_>,
        emitter: &mut Emitter<'_>,
    ) -> Result<(), QueryExecutionError> {
        match self {
            Operator::Match(operator) => operator.execute_step(emitted_mappings_per_round, emitter),
            Operator::Join(operator) => {
                operator.execute_step(emitted_mappings_per_round, inputs, emitter)
            }
            Operator::Projection(operator) => {
                operator.execute_step(emitted_mappings_per_round, inputs, emitter)
            }
            Operator::Slice(_) => Err(QueryExecutionError::UnsupportedOperation(
                "slice on a slave",
            )),
        }
    }

    /// Returns true if the operator has consumed all of its input received so far and has no
    /// results left to emit.
    pub fn is_finished_locally(&self, inputs: &TaskInputs<'_>) -> bool {
        match self {
            Operator::Match(operator) => operator.is_exhausted(),
            Operator::Join(operator) => operator.is_finished_locally(inputs),
            Operator::Projection(_) | Operator::Slice(_) => inputs.is_empty(0),
        }
    }

    pub fn current_load(&self, inputs: &TaskInputs<'_>, emitted_mappings_per_round: usize) -> u64 {
        let queued = |child| u64::try_from(inputs.len(child)).unwrap_or(u64::MAX);
        match self {
            Operator::Match(operator) if operator.is_exhausted() => 0,
            Operator::Match(_) => u64::try_from(emitted_mappings_per_round).unwrap_or(u64::MAX),
            Operator::Join(operator) => operator.current_load(inputs),
            Operator::Projection(_) | Operator::Slice(_) => queued(0),
        }
    }

    pub fn has_pending_results(&self) -> bool {
        match self {
            Operator::Join(operator) => operator.has_pending_results(),
            _ => false,
        }
    }

    /// Releases caches and spill files.
    pub fn close(&mut self, cache: &mut MappingRecycleCache) -> Result<(), QueryExecutionError> {
        match self {
            Operator::Match(operator) => {
                operator.close();
                Ok(())
            }
            Operator::Join(operator) => operator.close(cache),
            Operator::Projection(_) | Operator::Slice(_) => Ok(()),
        }
    }
}
