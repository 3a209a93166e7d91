use crate::task::{Emitter, TaskInputs};
use crate::QueryExecutionError;
use koral_model::Variable;

/// Restricts the mappings of its child to a list of variables, in the order of that list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionOperator {
    variables: Vec<Variable>,
    child_variables: Vec<Variable>,
}

impl ProjectionOperator {
    pub fn new(variables: Vec<Variable>, child_variables: Vec<Variable>) -> Self {
        Self {
            variables,
            child_variables,
        }
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub(super) fn execute_step(
        &mut self,
        emitted_mappings_per_round: usize,
        inputs: &TaskInputs<'_>,
        emitter: &mut Emitter<'_>,
    ) -> Result<(), QueryExecutionError> {
        for _ in 0..emitted_mappings_per_round {
            let Some(mapping) = inputs.pop(0, emitter.cache())? else {
                break;
            };
            let cache = emitter.cache();
            let projected =
                cache.restrict_mapping(&self.variables, mapping.view(), &self.child_variables);
            cache.release(mapping);
            emitter.emit(projected?)?;
        }
        Ok(())
    }
}
