//! The query execution tree that the master sends to every slave.
//!
//! The binary layout is big-endian:
//!
//! ```text
//! tree       := [u8 use_base_implementation][i64 coordinator] node
//! match      := [i32 0][i64 id][i32 per_round][i64 load][i32 pattern_type][i64 s][i64 p][i64 o]
//! join       := [i32 1] node node [i64 id][i32 per_round][i64 load]
//! projection := [i32 2] node [i64 id][i32 per_round][i64 load][i32 n][i64 variable]*n
//! ```
//!
//! Task ids are written without their computer part. Every slave replaces it with its own id.
//! Slices are evaluated by the coordinator and are never written.

use crate::operators::JoinType;
use crate::TreeDeserializationError;
use koral_common::bytes::ByteReader;
use koral_model::{intersection_of, union_of, ComputerId, QueryId, TaskId, TriplePattern, TriplePatternType, Variable};
use koral_storage::{estimate_pattern_load, GraphStatistics};
use std::fmt::{Display, Formatter};

const USE_BASE_IMPLEMENTATION: u8 = 1;
const MATCH: i32 = 0;
const JOIN: i32 = 1;
const PROJECTION: i32 = 2;
const BASE_ID_MASK: u64 = 0x0000_ffff_ffff_ffff;

/// The operator of a [QueryOperatorNode] together with its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOperatorKind {
    Match(TriplePattern),
    Join {
        left: Box<QueryOperatorNode>,
        right: Box<QueryOperatorNode>,
    },
    Projection {
        child: Box<QueryOperatorNode>,
        variables: Vec<Variable>,
    },
    Slice {
        child: Box<QueryOperatorNode>,
        offset: Option<u64>,
        limit: Option<u64>,
    },
}

/// A node of the [QueryExecutionTree]. Every node becomes one task per slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOperatorNode {
    pub id: TaskId,
    pub emitted_mappings_per_round: u32,
    pub estimated_load: u64,
    pub kind: QueryOperatorKind,
}

impl QueryOperatorNode {
    pub fn new(id: TaskId, emitted_mappings_per_round: u32, kind: QueryOperatorKind) -> Self {
        Self {
            id,
            emitted_mappings_per_round,
            estimated_load: 0,
            kind,
        }
    }

    /// Returns the layout of the mappings the node emits.
    pub fn result_variables(&self) -> Vec<Variable> {
        match &self.kind {
            QueryOperatorKind::Match(pattern) => pattern.variables(),
            QueryOperatorKind::Join { left, right } => {
                union_of(&left.result_variables(), &right.result_variables())
            }
            QueryOperatorKind::Projection { variables, .. } => variables.clone(),
            QueryOperatorKind::Slice { child, .. } => child.result_variables(),
        }
    }

    /// Returns the sorted variables that both children of a join bind.
    pub fn join_variables(&self) -> Vec<Variable> {
        match &self.kind {
            QueryOperatorKind::Join { left, right } => {
                intersection_of(&left.result_variables(), &right.result_variables())
            }
            _ => Vec::new(),
        }
    }

    pub fn join_type(&self) -> Option<JoinType> {
        match &self.kind {
            QueryOperatorKind::Join { left, right } => Some(JoinType::of(
                &left.result_variables(),
                &right.result_variables(),
            )),
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<&QueryOperatorNode> {
        match &self.kind {
            QueryOperatorKind::Match(_) => Vec::new(),
            QueryOperatorKind::Join { left, right } => vec![left, right],
            QueryOperatorKind::Projection { child, .. } | QueryOperatorKind::Slice { child, .. } => {
                vec![child]
            }
        }
    }

    /// Recomputes the estimated load of this node and its descendants from `statistics`.
    ///
    /// A join is expected to produce the product of its inputs, spread over all slaves.
    pub fn adjust_estimated_load<S: GraphStatistics + ?Sized>(
        &mut self,
        statistics: &S,
        number_of_slaves: u16,
    ) -> u64 {
        self.estimated_load = match &mut self.kind {
            QueryOperatorKind::Match(pattern) => estimate_pattern_load(statistics, pattern),
            QueryOperatorKind::Join { left, right } => {
                let left = left.adjust_estimated_load(statistics, number_of_slaves);
                let right = right.adjust_estimated_load(statistics, number_of_slaves);
                if left == 0 || right == 0 {
                    0
                } else {
                    (left.saturating_mul(right) / u64::from(number_of_slaves.max(1))).max(1)
                }
            }
            QueryOperatorKind::Projection { child, .. } | QueryOperatorKind::Slice { child, .. } => {
                child.adjust_estimated_load(statistics, number_of_slaves)
            }
        };
        self.estimated_load
    }

    fn serialize(&self, output: &mut Vec<u8>) {
        match &self.kind {
            QueryOperatorKind::Match(pattern) => {
                output.extend_from_slice(&MATCH.to_be_bytes());
                self.serialize_task(output);
                output.extend_from_slice(&pattern.pattern_type().ordinal().to_be_bytes());
                for value in pattern.raw_values() {
                    output.extend_from_slice(&value.to_be_bytes());
                }
            }
            QueryOperatorKind::Join { left, right } => {
                output.extend_from_slice(&JOIN.to_be_bytes());
                left.serialize(output);
                right.serialize(output);
                self.serialize_task(output);
            }
            QueryOperatorKind::Projection { child, variables } => {
                output.extend_from_slice(&PROJECTION.to_be_bytes());
                child.serialize(output);
                self.serialize_task(output);
                let len = i32::try_from(variables.len()).unwrap_or(i32::MAX);
                output.extend_from_slice(&len.to_be_bytes());
                for variable in variables {
                    output.extend_from_slice(&variable.id().to_be_bytes());
                }
            }
            QueryOperatorKind::Slice { child, .. } => child.serialize(output),
        }
    }

    fn serialize_task(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.id.base_id().to_be_bytes());
        let per_round = i32::try_from(self.emitted_mappings_per_round).unwrap_or(i32::MAX);
        output.extend_from_slice(&per_round.to_be_bytes());
        let load = i64::try_from(self.estimated_load).unwrap_or(i64::MAX);
        output.extend_from_slice(&load.to_be_bytes());
    }

    fn deserialize(
        reader: &mut ByteReader<'_>,
        computer: ComputerId,
    ) -> Result<Self, TreeDeserializationError> {
        let operator_type = reader.read_i32()?;
        match operator_type {
            MATCH => {
                let (id, per_round, load) = read_task(reader, computer)?;
                let pattern_type = TriplePatternType::try_from(reader.read_i32()?)?;
                let values = [reader.read_u64()?, reader.read_u64()?, reader.read_u64()?];
                Ok(Self {
                    id,
                    emitted_mappings_per_round: per_round,
                    estimated_load: load,
                    kind: QueryOperatorKind::Match(TriplePattern::from_raw(pattern_type, values)),
                })
            }
            JOIN => {
                let left = Box::new(Self::deserialize(reader, computer)?);
                let right = Box::new(Self::deserialize(reader, computer)?);
                let (id, per_round, load) = read_task(reader, computer)?;
                Ok(Self {
                    id,
                    emitted_mappings_per_round: per_round,
                    estimated_load: load,
                    kind: QueryOperatorKind::Join { left, right },
                })
            }
            PROJECTION => {
                let child = Box::new(Self::deserialize(reader, computer)?);
                let (id, per_round, load) = read_task(reader, computer)?;
                let len = reader.read_i32()?;
                let len = usize::try_from(len).map_err(|_| TreeDeserializationError::NegativeValue {
                    field: "number of projected variables",
                    value: i64::from(len),
                })?;
                let variables = (0..len)
                    .map(|_| reader.read_u64().map(Variable::new))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self {
                    id,
                    emitted_mappings_per_round: per_round,
                    estimated_load: load,
                    kind: QueryOperatorKind::Projection { child, variables },
                })
            }
            other => Err(TreeDeserializationError::UnknownOperatorType(other)),
        }
    }

    fn fmt_indented(&self, f: &mut Formatter<'_>, depth: usize) -> std::fmt::Result {
        write!(f, "{:indent$}", "", indent = depth * 2)?;
        match &self.kind {
            QueryOperatorKind::Match(pattern) => write!(f, "Match {pattern}")?,
            QueryOperatorKind::Join { .. } => {
                let variables = self.join_variables();
                write!(f, "Join on [")?;
                for (index, variable) in variables.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{variable}")?;
                }
                write!(f, "]")?;
            }
            QueryOperatorKind::Projection { variables, .. } => {
                write!(f, "Projection [")?;
                for (index, variable) in variables.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{variable}")?;
                }
                write!(f, "]")?;
            }
            QueryOperatorKind::Slice { offset, limit, .. } => {
                write!(f, "Slice offset={} limit=", offset.unwrap_or(0))?;
                match limit {
                    Some(limit) => write!(f, "{limit}")?,
                    None => write!(f, "none")?,
                }
            }
        }
        writeln!(f, " task={} load={}", self.id, self.estimated_load)?;
        for child in self.children() {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

fn read_task(
    reader: &mut ByteReader<'_>,
    computer: ComputerId,
) -> Result<(TaskId, u32, u64), TreeDeserializationError> {
    let id = reader.read_u64()?;
    if id & !BASE_ID_MASK != 0 {
        return Err(TreeDeserializationError::InvalidTaskId(id));
    }
    let per_round = reader.read_i32()?;
    let per_round = u32::try_from(per_round).map_err(|_| TreeDeserializationError::NegativeValue {
        field: "emitted mappings per round",
        value: i64::from(per_round),
    })?;
    let load = reader.read_u64()?;
    let load = i64::try_from(load)
        .map_err(|_| TreeDeserializationError::NegativeValue {
            field: "estimated load",
            value: i64::from_be_bytes(load.to_be_bytes()),
        })
        .and_then(|load| {
            u64::try_from(load).map_err(|_| TreeDeserializationError::NegativeValue {
                field: "estimated load",
                value: load,
            })
        })?;
    Ok((TaskId::from_u64(id).on_computer(computer), per_round, load))
}

/// The operator tree of a query together with the id of its coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExecutionTree {
    coordinator: TaskId,
    root: QueryOperatorNode,
}

impl QueryExecutionTree {
    pub fn new(coordinator: TaskId, root: QueryOperatorNode) -> Self {
        Self { coordinator, root }
    }

    pub fn coordinator(&self) -> TaskId {
        self.coordinator
    }

    pub fn query_id(&self) -> QueryId {
        self.coordinator.query_id()
    }

    pub fn root(&self) -> &QueryOperatorNode {
        &self.root
    }

    /// Returns the root of the part of the tree that runs on the slaves.
    pub fn executed_root(&self) -> &QueryOperatorNode {
        match &self.root.kind {
            QueryOperatorKind::Slice { child, .. } => child,
            _ => &self.root,
        }
    }

    /// Returns offset and limit if the result is sliced.
    pub fn slice(&self) -> Option<(Option<u64>, Option<u64>)> {
        match &self.root.kind {
            QueryOperatorKind::Slice { offset, limit, .. } => Some((*offset, *limit)),
            _ => None,
        }
    }

    pub fn adjust_estimated_loads<S: GraphStatistics + ?Sized>(
        &mut self,
        statistics: &S,
        number_of_slaves: u16,
    ) {
        self.root.adjust_estimated_load(statistics, number_of_slaves);
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut output = vec![USE_BASE_IMPLEMENTATION];
        output.extend_from_slice(&self.coordinator.as_u64().to_be_bytes());
        self.root.serialize(&mut output);
        output
    }

    /// Reads a serialized tree and assigns all tasks to `computer`.
    pub fn deserialize(bytes: &[u8], computer: ComputerId) -> Result<Self, TreeDeserializationError> {
        let mut reader = ByteReader::new(bytes);
        reader.read_u8()?;
        let coordinator = TaskId::from_u64(reader.read_u64()?);
        let root = QueryOperatorNode::deserialize(&mut reader, computer)?;
        if !reader.is_empty() {
            return Err(TreeDeserializationError::TrailingBytes(reader.remaining()));
        }
        Ok(Self { coordinator, root })
    }
}

impl Display for QueryExecutionTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Coordinator {}", self.coordinator)?;
        self.root.fmt_indented(f, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koral_common::ProtocolError;
    use koral_model::PatternTerm;

    fn var(id: u64) -> Variable {
        Variable::new(id)
    }

    fn tree() -> QueryExecutionTree {
        let left = QueryOperatorNode::new(
            TaskId::new(0, 9, 1),
            100,
            QueryOperatorKind::Match(TriplePattern::new(
                PatternTerm::Variable(var(0)),
                PatternTerm::Resource(42),
                PatternTerm::Variable(var(1)),
            )),
        );
        let right = QueryOperatorNode::new(
            TaskId::new(0, 9, 2),
            100,
            QueryOperatorKind::Match(TriplePattern::new(
                PatternTerm::Variable(var(1)),
                PatternTerm::Resource(7),
                PatternTerm::Resource(3),
            )),
        );
        let join = QueryOperatorNode::new(
            TaskId::new(0, 9, 3),
            100,
            QueryOperatorKind::Join {
                left: Box::new(left),
                right: Box::new(right),
            },
        );
        let projection = QueryOperatorNode::new(
            TaskId::new(0, 9, 4),
            100,
            QueryOperatorKind::Projection {
                child: Box::new(join),
                variables: vec![var(1), var(0)],
            },
        );
        let slice = QueryOperatorNode::new(
            TaskId::new(0, 9, 5),
            100,
            QueryOperatorKind::Slice {
                child: Box::new(projection),
                offset: Some(1),
                limit: Some(10),
            },
        );
        QueryExecutionTree::new(TaskId::coordinator(9), slice)
    }

    #[test]
    fn display_shows_operators() {
        insta::assert_snapshot!(tree().to_string(), @r"
        Coordinator 0:9:0
          Slice offset=1 limit=10 task=0:9:5 load=0
            Projection [?v1, ?v0] task=0:9:4 load=0
              Join on [?v1] task=0:9:3 load=0
                Match (?v0 42 ?v1) task=0:9:1 load=0
                Match (?v1 7 3) task=0:9:2 load=0
        ");
    }

    #[test]
    fn slaves_receive_tree_without_slice() {
        let tree = tree();
        let received = QueryExecutionTree::deserialize(&tree.serialize(), 2).unwrap();
        assert_eq!(received.coordinator(), TaskId::coordinator(9));
        assert_eq!(received.slice(), None);

        let root = received.root();
        assert_eq!(root.id, TaskId::new(2, 9, 4));
        assert_eq!(root.result_variables(), [var(1), var(0)]);
        let join = root.children()[0];
        assert_eq!(join.join_type(), Some(JoinType::Join));
        assert_eq!(join.children()[1].id, TaskId::new(2, 9, 2));
    }

    #[test]
    fn truncated_tree_is_rejected() {
        let mut bytes = tree().serialize();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            QueryExecutionTree::deserialize(&bytes, 1),
            Err(TreeDeserializationError::Protocol(ProtocolError::Truncated { .. }))
        ));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let mut bytes = vec![USE_BASE_IMPLEMENTATION];
        bytes.extend_from_slice(&TaskId::coordinator(1).as_u64().to_be_bytes());
        bytes.extend_from_slice(&7i32.to_be_bytes());
        assert_eq!(
            QueryExecutionTree::deserialize(&bytes, 1),
            Err(TreeDeserializationError::UnknownOperatorType(7))
        );
    }

    #[test]
    fn join_load_is_spread_over_slaves() {
        struct Fixed;
        impl GraphStatistics for Fixed {
            fn subject_frequency(&self, _: u64) -> u64 {
                10
            }
            fn property_frequency(&self, property: u64) -> u64 {
                if property == 42 {
                    8
                } else {
                    3
                }
            }
            fn object_frequency(&self, _: u64) -> u64 {
                10
            }
            fn chunk_size(&self) -> u64 {
                100
            }
        }

        let mut tree = tree();
        tree.adjust_estimated_loads(&Fixed, 2);
        let join = tree.executed_root().children()[0];
        assert_eq!(join.children()[0].estimated_load, 8);
        assert_eq!(join.children()[1].estimated_load, 3);
        assert_eq!(join.estimated_load, 12);
        assert_eq!(tree.root().estimated_load, 12);
    }
}
