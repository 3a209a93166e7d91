use crate::task::Emitter;
use crate::QueryExecutionError;
use koral_model::TriplePattern;
use koral_storage::{TripleCursor, TripleStore};
use std::sync::Arc;

/// Emits a mapping for every triple of the local chunk that matches a pattern.
///
/// The lookup is opened on the first step and resumed in every following step.
#[derive(Debug)]
pub struct MatchOperator {
    pattern: TriplePattern,
    store: Arc<dyn TripleStore>,
    cursor: Option<Box<dyn TripleCursor>>,
    exhausted: bool,
}

impl MatchOperator {
    pub fn new(pattern: TriplePattern, store: Arc<dyn TripleStore>) -> Self {
        Self {
            pattern,
            store,
            cursor: None,
            exhausted: false,
        }
    }

    pub fn pattern(&self) -> &TriplePattern {
        &self.pattern
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub(super) fn execute_step(
        &mut self,
        emitted_mappings_per_round: usize,
        emitter: &mut Emitter<'_>,
    ) -> Result<(), QueryExecutionError> {
        if self.exhausted {
            return Ok(());
        }
        let cursor = self
            .cursor
            .get_or_insert_with(|| self.store.lookup(&self.pattern));
        for _ in 0..emitted_mappings_per_round {
            let Some(stored) = cursor.next() else {
                break;
            };
            let mapping =
                emitter
                    .cache()
                    .create_mapping(&self.pattern, stored.triple, &stored.containment)?;
            emitter.emit(mapping)?;
        }
        self.exhausted = !cursor.has_next();
        Ok(())
    }

    pub(super) fn close(&mut self) {
        self.cursor = None;
        self.exhausted = true;
    }
}
