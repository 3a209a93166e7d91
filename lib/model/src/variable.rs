use std::fmt::{Display, Formatter};

/// A query variable.
///
/// Variables are numbered per query in the order of their first appearance. The numbers are
/// independent of resource ids; whether a triple pattern position holds a variable or a
/// resource is decided by [crate::PatternTerm].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(u64);

impl Variable {
    /// Creates a new [Variable].
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "?v{}", self.0)
    }
}

/// Returns the position of `variable` in `variables`.
pub fn position_of(variable: Variable, variables: &[Variable]) -> Option<usize> {
    variables.iter().position(|v| *v == variable)
}

/// Returns the sorted union of two variable lists.
pub fn union_of(lhs: &[Variable], rhs: &[Variable]) -> Vec<Variable> {
    let mut result = lhs.iter().chain(rhs.iter()).copied().collect::<Vec<_>>();
    result.sort_unstable();
    result.dedup();
    result
}

/// Returns the sorted intersection of two variable lists.
pub fn intersection_of(lhs: &[Variable], rhs: &[Variable]) -> Vec<Variable> {
    let mut result = lhs
        .iter()
        .filter(|v| rhs.contains(v))
        .copied()
        .collect::<Vec<_>>();
    result.sort_unstable();
    result.dedup();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(ids: &[u64]) -> Vec<Variable> {
        ids.iter().copied().map(Variable::new).collect()
    }

    #[test]
    fn union_is_sorted_and_distinct() {
        assert_eq!(union_of(&vars(&[3, 1]), &vars(&[2, 3])), vars(&[1, 2, 3]));
    }

    #[test]
    fn intersection_is_sorted() {
        assert_eq!(
            intersection_of(&vars(&[4, 2, 1]), &vars(&[1, 4])),
            vars(&[1, 4])
        );
        assert!(intersection_of(&vars(&[1]), &vars(&[2])).is_empty());
    }
}
