use crate::index::IndexComponentsCreationError;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};

/// Represents a list of *disjunct* index components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexComponents([IndexComponent; 3]);

impl IndexComponents {
    /// A SPO index.
    pub const SPO: IndexComponents = IndexComponents([
        IndexComponent::Subject,
        IndexComponent::Property,
        IndexComponent::Object,
    ]);

    /// A POS index.
    pub const POS: IndexComponents = IndexComponents([
        IndexComponent::Property,
        IndexComponent::Object,
        IndexComponent::Subject,
    ]);

    /// An OSP index.
    pub const OSP: IndexComponents = IndexComponents([
        IndexComponent::Object,
        IndexComponent::Subject,
        IndexComponent::Property,
    ]);

    /// Tries to create a new [IndexComponents].
    ///
    /// Returns an error if an [IndexComponent] appears more than once.
    pub fn try_new(
        components: [IndexComponent; 3],
    ) -> Result<Self, IndexComponentsCreationError> {
        let distinct = components.iter().collect::<HashSet<_>>();
        if distinct.len() != components.len() {
            return Err(IndexComponentsCreationError);
        }

        Ok(IndexComponents(components))
    }

    /// Returns a reference to the inner array.
    pub fn inner(&self) -> &[IndexComponent; 3] {
        &self.0
    }

    /// Reorders a triple in SPO order into the order of this index.
    pub fn reorder<T: Copy>(&self, spo: [T; 3]) -> [T; 3] {
        self.0.map(|component| spo[component.spo_index()])
    }

    /// Reorders a key of this index back into SPO order.
    pub fn restore<T: Copy + Default>(&self, key: [T; 3]) -> [T; 3] {
        let mut spo = [T::default(); 3];
        for (component, value) in self.0.iter().zip(key) {
            spo[component.spo_index()] = value;
        }
        spo
    }
}

impl Display for IndexComponents {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for component in &self.0 {
            write!(f, "{component}")?;
        }
        Ok(())
    }
}

/// Represents what part of an RDF triple is indexed at the given position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexComponent {
    /// The subject
    Subject,
    /// The property
    Property,
    /// The object
    Object,
}

impl IndexComponent {
    /// Returns the index of the component in an SPO triple.
    pub fn spo_index(&self) -> usize {
        match self {
            IndexComponent::Subject => 0,
            IndexComponent::Property => 1,
            IndexComponent::Object => 2,
        }
    }
}

impl Display for IndexComponent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexComponent::Subject => write!(f, "S"),
            IndexComponent::Property => write!(f, "P"),
            IndexComponent::Object => write!(f, "O"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_configuration_accepts_unique_components() {
        let ok = IndexComponents::try_new([
            IndexComponent::Object,
            IndexComponent::Property,
            IndexComponent::Subject,
        ]);
        assert!(ok.is_ok());
    }

    #[test]
    fn index_configuration_rejects_duplicate_components() {
        let err = IndexComponents::try_new([
            IndexComponent::Subject,
            IndexComponent::Subject,
            IndexComponent::Object,
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn reorder_and_restore() {
        let key = IndexComponents::POS.reorder([1, 2, 3]);
        assert_eq!(key, [2, 3, 1]);
        assert_eq!(IndexComponents::POS.restore(key), [1, 2, 3]);
        assert_eq!(IndexComponents::OSP.reorder([1, 2, 3]), [3, 1, 2]);
        assert_eq!(IndexComponents::OSP.to_string(), "OSP");
    }
}
