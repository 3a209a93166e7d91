use crate::join_cache::JoinMappingCache;
use crate::task::{Emitter, TaskInputs};
use crate::QueryExecutionError;
use koral_encoding::{Mapping, MappingRecycleCache};
use koral_model::{intersection_of, union_of, Variable};
use std::collections::VecDeque;
use std::path::Path;

const LEFT: usize = 0;
const RIGHT: usize = 1;

/// How a join combines the mappings of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// The children share at least one variable.
    Join,
    /// The children share no variable but both bind some.
    CartesianProduct,
    /// The right child binds no variable. Left mappings are passed through once the right
    /// child has found a match.
    LeftForward,
    /// The left child binds no variable.
    RightForward,
}

impl JoinType {
    pub fn of(left_variables: &[Variable], right_variables: &[Variable]) -> Self {
        if !intersection_of(left_variables, right_variables).is_empty() {
            JoinType::Join
        } else if left_variables.is_empty() {
            JoinType::RightForward
        } else if right_variables.is_empty() {
            JoinType::LeftForward
        } else {
            JoinType::CartesianProduct
        }
    }
}

/// A symmetric hash join of two children.
///
/// Every consumed mapping is added to the cache of its own side and probed against the cache
/// of the other side, so results are produced as soon as both partners have arrived.
#[derive(Debug)]
pub struct JoinOperator {
    join_type: JoinType,
    variables: [Vec<Variable>; 2],
    result_variables: Vec<Variable>,
    caches: [JoinMappingCache; 2],
    pending: VecDeque<Mapping>,
}

impl JoinOperator {
    /// Creates a new [JoinOperator]. Caches spill into `tmp_dir` once they hold more than
    /// `max_in_memory_mappings` mappings.
    pub fn new(
        left_variables: Vec<Variable>,
        right_variables: Vec<Variable>,
        containment_size: usize,
        number_of_buckets: usize,
        max_in_memory_mappings: usize,
        tmp_dir: &Path,
    ) -> Self {
        let join_type = JoinType::of(&left_variables, &right_variables);
        let join_variables = intersection_of(&left_variables, &right_variables);
        let result_variables = union_of(&left_variables, &right_variables);
        let cache = |variables: &[Variable]| {
            JoinMappingCache::new(
                variables.to_vec(),
                join_variables.clone(),
                containment_size,
                number_of_buckets,
                max_in_memory_mappings,
                tmp_dir,
            )
        };
        Self {
            join_type,
            caches: [cache(&left_variables), cache(&right_variables)],
            variables: [left_variables, right_variables],
            result_variables,
            pending: VecDeque::new(),
        }
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn result_variables(&self) -> &[Variable] {
        &self.result_variables
    }

    pub fn has_pending_results(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(super) fn is_finished_locally(&self, inputs: &TaskInputs<'_>) -> bool {
        inputs.is_empty(LEFT) && inputs.is_empty(RIGHT) && self.pending.is_empty()
    }

    /// The number of comparisons the join still has to make.
    pub(super) fn current_load(&self, inputs: &TaskInputs<'_>) -> u64 {
        let side = |index: usize| {
            u64::try_from(inputs.len(index) + self.caches[index].len()).unwrap_or(u64::MAX)
        };
        match (side(LEFT), side(RIGHT)) {
            (0, right) => right,
            (left, 0) => left,
            (left, right) => left.saturating_mul(right),
        }
    }

    pub(super) fn execute_step(
        &mut self,
        emitted_mappings_per_round: usize,
        inputs: &TaskInputs<'_>,
        emitter: &mut Emitter<'_>,
    ) -> Result<(), QueryExecutionError> {
        match self.join_type {
            JoinType::Join | JoinType::CartesianProduct => {
                self.execute_join_step(emitted_mappings_per_round, inputs, emitter)
            }
            JoinType::LeftForward => {
                self.execute_forward_step(LEFT, emitted_mappings_per_round, inputs, emitter)
            }
            JoinType::RightForward => {
                self.execute_forward_step(RIGHT, emitted_mappings_per_round, inputs, emitter)
            }
        }
    }

    fn should_consume_from_left(&self, inputs: &TaskInputs<'_>) -> bool {
        if inputs.is_empty(RIGHT) {
            return true;
        }
        if inputs.is_empty(LEFT) {
            return false;
        }
        self.caches[LEFT].len() < self.caches[RIGHT].len()
    }

    fn execute_join_step(
        &mut self,
        emitted_mappings_per_round: usize,
        inputs: &TaskInputs<'_>,
        emitter: &mut Emitter<'_>,
    ) -> Result<(), QueryExecutionError> {
        let mut emitted = 0;
        loop {
            while emitted < emitted_mappings_per_round {
                let Some(result) = self.pending.pop_front() else {
                    break;
                };
                emitter.emit(result)?;
                emitted += 1;
            }
            if emitted >= emitted_mappings_per_round {
                return Ok(());
            }

            let side = if self.should_consume_from_left(inputs) {
                LEFT
            } else {
                RIGHT
            };
            let Some(mapping) = inputs.pop(side, emitter.cache())? else {
                return Ok(());
            };
            self.join_with_other_side(side, mapping, emitter.cache())?;
        }
    }

    /// Joins `mapping` with all matching mappings of the other side and caches it.
    fn join_with_other_side(
        &mut self,
        side: usize,
        mapping: Mapping,
        cache: &mut MappingRecycleCache,
    ) -> Result<(), QueryExecutionError> {
        let other = 1 - side;
        let Self {
            variables,
            result_variables,
            caches,
            pending,
            ..
        } = self;
        let key = caches[side].join_key(mapping.view())?;
        let [left, right] = caches;
        let (own_cache, other_cache) = if side == LEFT {
            (left, right)
        } else {
            (right, left)
        };
        other_cache.probe(&key, |candidate| {
            if let Some(result) = cache.join_mappings(
                result_variables,
                mapping.view(),
                &variables[side],
                candidate,
                &variables[other],
            )? {
                pending.push_back(result);
            }
            Ok(())
        })?;
        own_cache.insert(mapping, cache)
    }

    /// Passes the mappings of `forwarded` through once the other child has finished with a
    /// match. If the other child found nothing, all mappings are discarded.
    fn execute_forward_step(
        &mut self,
        forwarded: usize,
        emitted_mappings_per_round: usize,
        inputs: &TaskInputs<'_>,
        emitter: &mut Emitter<'_>,
    ) -> Result<(), QueryExecutionError> {
        let other = 1 - forwarded;
        if !inputs.has_child_finished(other) {
            return Ok(());
        }
        if inputs.is_empty(other) {
            while let Some(mapping) = inputs.pop(forwarded, emitter.cache())? {
                emitter.cache().release(mapping);
            }
            return Ok(());
        }

        for _ in 0..emitted_mappings_per_round {
            let Some(mapping) = inputs.pop(forwarded, emitter.cache())? else {
                break;
            };
            if self.variables[forwarded] == self.result_variables {
                emitter.emit(mapping)?;
            } else {
                let cache = emitter.cache();
                let reordered = cache.restrict_mapping(
                    &self.result_variables,
                    mapping.view(),
                    &self.variables[forwarded],
                );
                cache.release(mapping);
                emitter.emit(reordered?)?;
            }
        }

        if inputs.has_child_finished(forwarded) && inputs.is_empty(forwarded) {
            while let Some(mapping) = inputs.pop(other, emitter.cache())? {
                emitter.cache().release(mapping);
            }
        }
        Ok(())
    }

    pub(super) fn close(&mut self, cache: &mut MappingRecycleCache) -> Result<(), QueryExecutionError> {
        for mapping in self.pending.drain(..) {
            cache.release(mapping);
        }
        for join_cache in &mut self.caches {
            join_cache.close(cache)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(ids: &[u64]) -> Vec<Variable> {
        ids.iter().copied().map(Variable::new).collect()
    }

    #[test]
    fn join_type_depends_on_shared_variables() {
        assert_eq!(JoinType::of(&vars(&[0, 1]), &vars(&[1, 2])), JoinType::Join);
        assert_eq!(
            JoinType::of(&vars(&[0]), &vars(&[1])),
            JoinType::CartesianProduct
        );
        assert_eq!(JoinType::of(&vars(&[0]), &[]), JoinType::LeftForward);
        assert_eq!(JoinType::of(&[], &vars(&[0])), JoinType::RightForward);
        assert_eq!(JoinType::of(&[], &[]), JoinType::RightForward);
    }

    #[test]
    fn result_variables_are_sorted_union() {
        let dir = tempfile::tempdir().unwrap();
        let join = JoinOperator::new(vars(&[2, 0]), vars(&[1, 0]), 1, 4, 10, dir.path());
        assert_eq!(join.result_variables(), vars(&[0, 1, 2]));
        assert_eq!(join.join_type(), JoinType::Join);
    }
}
