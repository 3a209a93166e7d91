use crate::{InvalidTriplePatternTypeError, PatternParseError, ResourceId, Variable};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A single position of a [TriplePattern].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternTerm {
    /// A bound resource.
    Resource(ResourceId),
    /// A free position.
    Variable(Variable),
}

impl PatternTerm {
    pub fn is_variable(&self) -> bool {
        matches!(self, PatternTerm::Variable(_))
    }

    pub fn as_variable(&self) -> Option<Variable> {
        match self {
            PatternTerm::Variable(variable) => Some(*variable),
            PatternTerm::Resource(_) => None,
        }
    }

    pub fn as_resource(&self) -> Option<ResourceId> {
        match self {
            PatternTerm::Resource(resource) => Some(*resource),
            PatternTerm::Variable(_) => None,
        }
    }

    /// Returns the raw value of this term. This is either the resource id or the variable id.
    pub fn raw_value(&self) -> u64 {
        match self {
            PatternTerm::Resource(resource) => *resource,
            PatternTerm::Variable(variable) => variable.id(),
        }
    }
}

impl Display for PatternTerm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternTerm::Resource(resource) => write!(f, "{resource}"),
            PatternTerm::Variable(variable) => write!(f, "{variable}"),
        }
    }
}

/// Describes which positions of a [TriplePattern] are bound.
///
/// A letter marks a bound position: `S` for the subject, `P` for the property and `O` for the
/// object. The discriminants are part of the serialized query execution tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriplePatternType {
    /// `___`
    Unbound = 0,
    /// `S__`
    S = 1,
    /// `_P_`
    P = 2,
    /// `__O`
    O = 3,
    /// `SP_`
    SP = 4,
    /// `S_O`
    SO = 5,
    /// `_PO`
    PO = 6,
    /// `SPO`
    SPO = 7,
}

impl TriplePatternType {
    /// Computes the type from the bound positions.
    pub fn from_bound(subject: bool, property: bool, object: bool) -> Self {
        match (subject, property, object) {
            (false, false, false) => Self::Unbound,
            (true, false, false) => Self::S,
            (false, true, false) => Self::P,
            (false, false, true) => Self::O,
            (true, true, false) => Self::SP,
            (true, false, true) => Self::SO,
            (false, true, true) => Self::PO,
            (true, true, true) => Self::SPO,
        }
    }

    pub fn is_subject_bound(self) -> bool {
        matches!(self, Self::S | Self::SP | Self::SO | Self::SPO)
    }

    pub fn is_property_bound(self) -> bool {
        matches!(self, Self::P | Self::SP | Self::PO | Self::SPO)
    }

    pub fn is_object_bound(self) -> bool {
        matches!(self, Self::O | Self::SO | Self::PO | Self::SPO)
    }

    /// Returns the bound flags for subject, property and object.
    pub fn bound_positions(self) -> [bool; 3] {
        [
            self.is_subject_bound(),
            self.is_property_bound(),
            self.is_object_bound(),
        ]
    }

    pub fn ordinal(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for TriplePatternType {
    type Error = InvalidTriplePatternTypeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Unbound,
            1 => Self::S,
            2 => Self::P,
            3 => Self::O,
            4 => Self::SP,
            5 => Self::SO,
            6 => Self::PO,
            7 => Self::SPO,
            _ => return Err(InvalidTriplePatternTypeError(value)),
        })
    }
}

impl Display for TriplePatternType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [s, p, o] = self.bound_positions();
        write!(
            f,
            "{}{}{}",
            if s { 'S' } else { '_' },
            if p { 'P' } else { '_' },
            if o { 'O' } else { '_' }
        )
    }
}

/// A SPARQL triple pattern over dictionary-encoded resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    subject: PatternTerm,
    property: PatternTerm,
    object: PatternTerm,
    pattern_type: TriplePatternType,
}

impl TriplePattern {
    /// Creates a new [TriplePattern] and computes its [TriplePatternType].
    pub fn new(subject: PatternTerm, property: PatternTerm, object: PatternTerm) -> Self {
        let pattern_type = TriplePatternType::from_bound(
            !subject.is_variable(),
            !property.is_variable(),
            !object.is_variable(),
        );
        Self {
            subject,
            property,
            object,
            pattern_type,
        }
    }

    /// Rebuilds a pattern from its type and the raw values of its positions.
    pub fn from_raw(pattern_type: TriplePatternType, values: [u64; 3]) -> Self {
        let [s, p, o] = pattern_type.bound_positions();
        let term = |bound: bool, value: u64| {
            if bound {
                PatternTerm::Resource(value)
            } else {
                PatternTerm::Variable(Variable::new(value))
            }
        };
        Self {
            subject: term(s, values[0]),
            property: term(p, values[1]),
            object: term(o, values[2]),
            pattern_type,
        }
    }

    pub fn subject(&self) -> PatternTerm {
        self.subject
    }

    pub fn property(&self) -> PatternTerm {
        self.property
    }

    pub fn object(&self) -> PatternTerm {
        self.object
    }

    pub fn pattern_type(&self) -> TriplePatternType {
        self.pattern_type
    }

    /// Returns subject, property and object.
    pub fn terms(&self) -> [PatternTerm; 3] {
        [self.subject, self.property, self.object]
    }

    /// Returns the raw values of subject, property and object.
    pub fn raw_values(&self) -> [u64; 3] {
        self.terms().map(|term| term.raw_value())
    }

    /// Returns the free positions in the order subject, property, object.
    ///
    /// A variable that occurs at multiple positions is reported once.
    pub fn variables(&self) -> Vec<Variable> {
        let mut result = Vec::with_capacity(3);
        for variable in self.terms().iter().filter_map(PatternTerm::as_variable) {
            if !result.contains(&variable) {
                result.push(variable);
            }
        }
        result
    }
}

impl Display for TriplePattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.subject, self.property, self.object)
    }
}

/// Parses a pattern of the form `?s 42 ?o`. Variable names are resolved by `resolve_variable`.
pub fn parse_triple_pattern(
    text: &str,
    mut resolve_variable: impl FnMut(&str) -> Variable,
) -> Result<TriplePattern, PatternParseError> {
    let parts = text.split_whitespace().collect::<Vec<_>>();
    let [s, p, o] = parts.as_slice() else {
        return Err(PatternParseError::WrongNumberOfTerms(text.to_owned()));
    };
    let mut parse_term = |term: &str| {
        if let Some(name) = term.strip_prefix('?') {
            if name.is_empty() {
                return Err(PatternParseError::InvalidTerm(term.to_owned()));
            }
            return Ok(PatternTerm::Variable(resolve_variable(name)));
        }
        ResourceId::from_str(term)
            .map(PatternTerm::Resource)
            .map_err(|_| PatternParseError::InvalidTerm(term.to_owned()))
    };
    Ok(TriplePattern::new(
        parse_term(s)?,
        parse_term(p)?,
        parse_term(o)?,
    ))
}
