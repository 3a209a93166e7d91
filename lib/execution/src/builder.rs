use crate::tree::{QueryExecutionTree, QueryOperatorKind, QueryOperatorNode};
use crate::QueryPlanError;
use koral_model::{parse_triple_pattern, QueryId, TaskId, TriplePattern, Variable};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A conjunctive query: a set of triple patterns, optionally projected and sliced.
///
/// The textual form separates patterns with dots, e.g., `?s 42 ?o . ?o 7 ?x`. Variables are
/// numbered in the order of their first appearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    patterns: Vec<TriplePattern>,
    variable_names: Vec<String>,
    projection: Option<Vec<Variable>>,
    offset: Option<u64>,
    limit: Option<u64>,
}

impl QueryPlan {
    pub fn patterns(&self) -> &[TriplePattern] {
        &self.patterns
    }

    /// Returns the variable names, indexed by variable id.
    pub fn variable_names(&self) -> &[String] {
        &self.variable_names
    }

    pub fn variable_name(&self, variable: Variable) -> Option<&str> {
        usize::try_from(variable.id())
            .ok()
            .and_then(|index| self.variable_names.get(index))
            .map(String::as_str)
    }

    pub fn projection(&self) -> Option<&[Variable]> {
        self.projection.as_deref()
    }

    /// Restricts the result to the variables `names`, in that order. Names may carry the
    /// leading `?`.
    pub fn with_projection<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self, QueryPlanError> {
        let variables = names
            .iter()
            .map(|name| {
                let name = name.as_ref().trim_start_matches('?');
                self.variable_names
                    .iter()
                    .position(|known| known == name)
                    .map(|index| Variable::new(u64::try_from(index).unwrap_or(u64::MAX)))
                    .ok_or_else(|| QueryPlanError::UnknownVariable(name.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.projection = Some(variables);
        Ok(self)
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }
}

impl FromStr for QueryPlan {
    type Err = QueryPlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut variable_names = Vec::<String>::new();
        let patterns = s
            .split('.')
            .map(str::trim)
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| {
                parse_triple_pattern(pattern, |name| {
                    let index = match variable_names.iter().position(|known| known == name) {
                        Some(index) => index,
                        None => {
                            variable_names.push(name.to_owned());
                            variable_names.len() - 1
                        }
                    };
                    Variable::new(u64::try_from(index).unwrap_or(u64::MAX))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if patterns.is_empty() {
            return Err(QueryPlanError::Empty);
        }
        Ok(Self {
            patterns,
            variable_names,
            projection: None,
            offset: None,
            limit: None,
        })
    }
}

/// The order in which the triple patterns of a query are joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QueryExecutionTreeType {
    /// `((p1 ⋈ p2) ⋈ p3) ⋈ p4`
    #[default]
    LeftLinear,
    /// `p1 ⋈ (p2 ⋈ (p3 ⋈ p4))`
    RightLinear,
    /// `(p1 ⋈ p2) ⋈ (p3 ⋈ p4)`
    Bushy,
}

impl Display for QueryExecutionTreeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            QueryExecutionTreeType::LeftLinear => "left-linear",
            QueryExecutionTreeType::RightLinear => "right-linear",
            QueryExecutionTreeType::Bushy => "bushy",
        })
    }
}

impl FromStr for QueryExecutionTreeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left-linear" | "left_linear" | "leftlinear" => Ok(Self::LeftLinear),
            "right-linear" | "right_linear" | "rightlinear" => Ok(Self::RightLinear),
            "bushy" => Ok(Self::Bushy),
            _ => Err(format!("Unknown query execution tree type '{s}'")),
        }
    }
}

/// The join order before task ids are assigned.
enum Shape {
    Leaf(TriplePattern),
    Join(Box<Shape>, Box<Shape>),
}

impl Shape {
    fn join(left: Shape, right: Shape) -> Shape {
        Shape::Join(Box::new(left), Box::new(right))
    }
}

/// Builds [QueryExecutionTree]s from [QueryPlan]s.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutionTreeBuilder {
    tree_type: QueryExecutionTreeType,
    emitted_mappings_per_round: u32,
}

impl QueryExecutionTreeBuilder {
    pub fn new(tree_type: QueryExecutionTreeType, emitted_mappings_per_round: u32) -> Self {
        Self {
            tree_type,
            emitted_mappings_per_round,
        }
    }

    /// Builds the tree of query `query_id`. Task ids are assigned in post-order, starting
    /// at 1. The id 0 belongs to the coordinator.
    pub fn build(&self, query_id: QueryId, plan: &QueryPlan) -> Result<QueryExecutionTree, QueryPlanError> {
        let leaves = plan.patterns.iter().cloned().map(Shape::Leaf);
        let shape = match self.tree_type {
            QueryExecutionTreeType::LeftLinear => leaves.reduce(Shape::join),
            QueryExecutionTreeType::RightLinear => leaves.rev().reduce(|right, left| Shape::join(left, right)),
            QueryExecutionTreeType::Bushy => bushy(leaves.collect()),
        }
        .ok_or(QueryPlanError::Empty)?;

        let mut next_id = 1u16;
        let mut root = self.assign_ids(query_id, shape, &mut next_id)?;
        if let Some(variables) = &plan.projection {
            root = self.node(
                query_id,
                &mut next_id,
                QueryOperatorKind::Projection {
                    child: Box::new(root),
                    variables: variables.clone(),
                },
            )?;
        }
        if plan.offset.is_some() || plan.limit.is_some() {
            root = self.node(
                query_id,
                &mut next_id,
                QueryOperatorKind::Slice {
                    child: Box::new(root),
                    offset: plan.offset,
                    limit: plan.limit,
                },
            )?;
        }
        Ok(QueryExecutionTree::new(TaskId::coordinator(query_id), root))
    }

    fn assign_ids(
        &self,
        query_id: QueryId,
        shape: Shape,
        next_id: &mut u16,
    ) -> Result<QueryOperatorNode, QueryPlanError> {
        let kind = match shape {
            Shape::Leaf(pattern) => QueryOperatorKind::Match(pattern),
            Shape::Join(left, right) => {
                let left = self.assign_ids(query_id, *left, next_id)?;
                let right = self.assign_ids(query_id, *right, next_id)?;
                QueryOperatorKind::Join {
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
        };
        self.node(query_id, next_id, kind)
    }

    fn node(
        &self,
        query_id: QueryId,
        next_id: &mut u16,
        kind: QueryOperatorKind,
    ) -> Result<QueryOperatorNode, QueryPlanError> {
        let id = TaskId::new(0, query_id, *next_id);
        *next_id = next_id
            .checked_add(1)
            .ok_or(QueryPlanError::TooManyOperators(u16::MAX))?;
        Ok(QueryOperatorNode::new(id, self.emitted_mappings_per_round, kind))
    }
}

/// Joins neighbouring subtrees level by level. An odd subtree is carried to the next level.
fn bushy(mut level: Vec<Shape>) -> Option<Shape> {
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut shapes = level.into_iter();
        while let Some(left) = shapes.next() {
            match shapes.next() {
                Some(right) => next.push(Shape::join(left, right)),
                None => next.push(left),
            }
        }
        level = next;
    }
    level.pop()
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY: &str = "?a 1 ?b . ?b 2 ?c . ?c 3 ?d . ?d 4 ?e";

    fn build(tree_type: QueryExecutionTreeType, plan: &QueryPlan) -> QueryExecutionTree {
        QueryExecutionTreeBuilder::new(tree_type, 100)
            .build(3, plan)
            .unwrap()
    }

    #[test]
    fn variables_are_numbered_by_first_appearance() {
        let plan = QueryPlan::from_str("?s 42 ?o . ?o 7 ?s . ?x 1 2").unwrap();
        assert_eq!(plan.variable_names(), ["s", "o", "x"]);
        assert_eq!(plan.patterns()[1].to_string(), "(?v1 7 ?v0)");
        assert_eq!(plan.variable_name(Variable::new(2)), Some("x"));
    }

    #[test]
    fn projection_of_unknown_variable_fails() {
        let plan = QueryPlan::from_str("?s 42 ?o").unwrap();
        assert_eq!(
            plan.with_projection(&["?y"]),
            Err(QueryPlanError::UnknownVariable("y".to_owned()))
        );
        assert_eq!(QueryPlan::from_str(" . "), Err(QueryPlanError::Empty));
    }

    #[test]
    fn left_linear_tree() {
        let plan = QueryPlan::from_str(QUERY).unwrap();
        insta::assert_snapshot!(build(QueryExecutionTreeType::LeftLinear, &plan), @r"
        Coordinator 0:3:0
          Join on [?v3] task=0:3:7 load=0
            Join on [?v2] task=0:3:5 load=0
              Join on [?v1] task=0:3:3 load=0
                Match (?v0 1 ?v1) task=0:3:1 load=0
                Match (?v1 2 ?v2) task=0:3:2 load=0
              Match (?v2 3 ?v3) task=0:3:4 load=0
            Match (?v3 4 ?v4) task=0:3:6 load=0
        ");
    }

    #[test]
    fn right_linear_tree() {
        let plan = QueryPlan::from_str(QUERY).unwrap();
        insta::assert_snapshot!(build(QueryExecutionTreeType::RightLinear, &plan), @r"
        Coordinator 0:3:0
          Join on [?v1] task=0:3:7 load=0
            Match (?v0 1 ?v1) task=0:3:1 load=0
            Join on [?v2] task=0:3:6 load=0
              Match (?v1 2 ?v2) task=0:3:2 load=0
              Join on [?v3] task=0:3:5 load=0
                Match (?v2 3 ?v3) task=0:3:3 load=0
                Match (?v3 4 ?v4) task=0:3:4 load=0
        ");
    }

    #[test]
    fn bushy_tree_with_projection_and_slice() {
        let plan = QueryPlan::from_str("?a 1 ?b . ?b 2 ?c . ?c 3 ?d")
            .unwrap()
            .with_projection(&["d", "a"])
            .unwrap()
            .with_limit(5);
        insta::assert_snapshot!(build(QueryExecutionTreeType::Bushy, &plan), @r"
        Coordinator 0:3:0
          Slice offset=0 limit=5 task=0:3:7 load=0
            Projection [?v3, ?v0] task=0:3:6 load=0
              Join on [?v2] task=0:3:5 load=0
                Join on [?v1] task=0:3:3 load=0
                  Match (?v0 1 ?v1) task=0:3:1 load=0
                  Match (?v1 2 ?v2) task=0:3:2 load=0
                Match (?v2 3 ?v3) task=0:3:4 load=0
        ");
    }

    #[test]
    fn tree_type_parses_from_text() {
        assert_eq!(
            "bushy".parse::<QueryExecutionTreeType>(),
            Ok(QueryExecutionTreeType::Bushy)
        );
        assert_eq!(
            QueryExecutionTreeType::RightLinear.to_string(),
            "right-linear"
        );
    }
}
