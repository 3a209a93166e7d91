//! Decides where a mapping emitted by a task has to go.
//!
//! A join replica receives the mappings whose first join variable is bound to a resource owned
//! by its computer. If the owner already knows a mapping, every computer that knows it keeps its
//! local copy. Otherwise only the first knowing computer moves it to the owner.

use koral_encoding::{Mapping, MappingError};
use koral_model::{owner_of, ComputerId, TaskId, Variable};

/// The kind of operator that consumes the mappings of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentKind {
    /// Projections consume the mappings of the local replica of their child.
    Projection,
    /// Joins are partitioned by the value of their first join variable. Without join variable,
    /// all mappings are collected on the first slave.
    Join {
        first_join_variable: Option<Variable>,
    },
}

/// The parent of a task as seen from one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentTask {
    pub id: TaskId,
    pub kind: ParentKind,
}

/// The destination of an emitted mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Send to a single task.
    Send(TaskId),
    /// Send a copy to every replica of the given task.
    Broadcast(TaskId),
    /// Another computer is responsible for the mapping.
    Drop,
}

/// Computes the route of `mapping`, which was emitted by `task` and whose layout is
/// `variables`. The containment of the mapping is updated if it moves to another computer.
pub fn route(
    task: TaskId,
    coordinator: TaskId,
    parent: Option<&ParentTask>,
    mapping: &mut Mapping,
    variables: &[Variable],
    number_of_slaves: u16,
) -> Result<Route, MappingError> {
    let current = task.computer_id();
    let Some(parent) = parent else {
        return Ok(Route::Send(coordinator));
    };
    let first_join_variable = match parent.kind {
        ParentKind::Projection => return Ok(Route::Send(parent.id.on_computer(current))),
        ParentKind::Join {
            first_join_variable,
        } => first_join_variable,
    };
    let is_first_known = mapping.containment().first_known_computer() == Some(current);

    if mapping.is_empty_mapping() {
        if !is_first_known {
            return Ok(Route::Drop);
        }
        mapping.set_containment_to_all(number_of_slaves);
        return Ok(Route::Broadcast(parent.id));
    }

    let Some(join_variable) = first_join_variable else {
        return Ok(move_to(mapping, parent.id, current, 1, is_first_known));
    };
    let owner = owner_of(mapping.value(join_variable, variables)?);
    if mapping.containment().is_known_by(owner) {
        if mapping.containment().is_known_by(current) {
            return Ok(Route::Send(parent.id.on_computer(current)));
        }
        return Ok(Route::Drop);
    }
    Ok(move_to(mapping, parent.id, current, owner, is_first_known))
}

fn move_to(
    mapping: &mut Mapping,
    parent: TaskId,
    current: ComputerId,
    target: ComputerId,
    is_first_known: bool,
) -> Route {
    if !is_first_known {
        return Route::Drop;
    }
    if target != current {
        mapping.update_containment(current, target);
    }
    Route::Send(parent.on_computer(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use koral_encoding::MappingRecycleCache;
    use koral_model::{PatternTerm, TriplePattern};

    const QUERY: u32 = 5;

    fn join_parent(variable: Option<u64>) -> ParentTask {
        ParentTask {
            id: TaskId::new(0, QUERY, 3),
            kind: ParentKind::Join {
                first_join_variable: variable.map(Variable::new),
            },
        }
    }

    fn mapping(cache: &mut MappingRecycleCache, value: u64, containment: u8) -> Mapping {
        let pattern = TriplePattern::new(
            PatternTerm::Variable(Variable::new(0)),
            PatternTerm::Resource(1),
            PatternTerm::Resource(2),
        );
        cache
            .create_mapping(&pattern, [value, 1, 2], &[containment])
            .unwrap()
    }

    fn owned_by(slave: u64) -> u64 {
        ((slave - 1) << 48) | 17
    }

    #[test]
    fn root_sends_to_coordinator() {
        let mut cache = MappingRecycleCache::new(4, 3);
        let mut mapping = mapping(&mut cache, 1, 0x80);
        let route = route(
            TaskId::new(2, QUERY, 3),
            TaskId::coordinator(QUERY),
            None,
            &mut mapping,
            &[Variable::new(0)],
            3,
        );
        assert_eq!(route, Ok(Route::Send(TaskId::coordinator(QUERY))));
    }

    #[test]
    fn projection_stays_local() {
        let mut cache = MappingRecycleCache::new(4, 3);
        let mut mapping = mapping(&mut cache, owned_by(3), 0x80);
        let parent = ParentTask {
            id: TaskId::new(0, QUERY, 2),
            kind: ParentKind::Projection,
        };
        let route = route(
            TaskId::new(1, QUERY, 1),
            TaskId::coordinator(QUERY),
            Some(&parent),
            &mut mapping,
            &[Variable::new(0)],
            3,
        );
        assert_eq!(route, Ok(Route::Send(TaskId::new(1, QUERY, 2))));
    }

    #[test]
    fn mapping_moves_to_owner_of_join_value() {
        let mut cache = MappingRecycleCache::new(4, 3);
        let mut mapping = mapping(&mut cache, owned_by(3), 0b1100_0000);
        let route = route(
            TaskId::new(1, QUERY, 1),
            TaskId::coordinator(QUERY),
            Some(&join_parent(Some(0))),
            &mut mapping,
            &[Variable::new(0)],
            3,
        );
        assert_eq!(route, Ok(Route::Send(TaskId::new(3, QUERY, 3))));
        assert_eq!(
            mapping.containment().known_computers().collect::<Vec<_>>(),
            [2, 3]
        );
    }

    #[test]
    fn only_first_known_computer_sends() {
        let mut cache = MappingRecycleCache::new(4, 3);
        let mut mapping = mapping(&mut cache, owned_by(3), 0b1100_0000);
        let route = route(
            TaskId::new(2, QUERY, 1),
            TaskId::coordinator(QUERY),
            Some(&join_parent(Some(0))),
            &mut mapping,
            &[Variable::new(0)],
            3,
        );
        assert_eq!(route, Ok(Route::Drop));
    }

    #[test]
    fn knowing_computers_keep_mapping_when_owner_knows_it() {
        let mut cache = MappingRecycleCache::new(4, 3);
        let parent = join_parent(Some(0));
        for (current, expected) in [
            (1, Route::Send(TaskId::new(1, QUERY, 3))),
            (2, Route::Send(TaskId::new(2, QUERY, 3))),
            (3, Route::Drop),
        ] {
            let mut mapping = mapping(&mut cache, owned_by(2), 0b1100_0000);
            let route = route(
                TaskId::new(current, QUERY, 1),
                TaskId::coordinator(QUERY),
                Some(&parent),
                &mut mapping,
                &[Variable::new(0)],
                3,
            );
            assert_eq!(route, Ok(expected));
        }
    }

    #[test]
    fn empty_mapping_is_broadcast_once() {
        let mut cache = MappingRecycleCache::new(4, 3);
        let parent = join_parent(None);
        let mut mapping = cache.create_empty_mapping();
        mapping.containment_mut().set(2);
        mapping.containment_mut().set(3);

        let dropped = route(
            TaskId::new(3, QUERY, 1),
            TaskId::coordinator(QUERY),
            Some(&parent),
            &mut mapping,
            &[],
            3,
        );
        assert_eq!(dropped, Ok(Route::Drop));

        let broadcast = route(
            TaskId::new(2, QUERY, 1),
            TaskId::coordinator(QUERY),
            Some(&parent),
            &mut mapping,
            &[],
            3,
        );
        assert_eq!(broadcast, Ok(Route::Broadcast(parent.id)));
        assert_eq!(
            mapping.containment().known_computers().collect::<Vec<_>>(),
            [1, 2, 3]
        );
    }

    #[test]
    fn mappings_without_join_variable_meet_on_first_slave() {
        let mut cache = MappingRecycleCache::new(4, 3);
        let mut mapping = mapping(&mut cache, owned_by(3), 0b0010_0000);
        let route = route(
            TaskId::new(3, QUERY, 1),
            TaskId::coordinator(QUERY),
            Some(&join_parent(None)),
            &mut mapping,
            &[Variable::new(0)],
            3,
        );
        assert_eq!(route, Ok(Route::Send(TaskId::new(1, QUERY, 3))));
        assert_eq!(
            mapping.containment().known_computers().collect::<Vec<_>>(),
            [1]
        );
    }
}
