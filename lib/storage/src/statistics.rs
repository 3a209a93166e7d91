use koral_model::{PatternTerm, TriplePattern, TriplePatternType};

/// Frequencies of resources in the chunk of a single slave.
pub trait GraphStatistics {
    fn subject_frequency(&self, subject: u64) -> u64;

    fn property_frequency(&self, property: u64) -> u64;

    fn object_frequency(&self, object: u64) -> u64;

    /// The number of triples in the chunk.
    fn chunk_size(&self) -> u64;
}

/// Estimates how many triples match `pattern`.
///
/// With two or more bound positions, the smallest frequency is an upper bound. A zero estimate
/// is exact: no triple can match.
pub fn estimate_pattern_load<S: GraphStatistics + ?Sized>(
    statistics: &S,
    pattern: &TriplePattern,
) -> u64 {
    let resource = |term: PatternTerm| term.as_resource().unwrap_or_default();
    let subject = || statistics.subject_frequency(resource(pattern.subject()));
    let property = || statistics.property_frequency(resource(pattern.property()));
    let object = || statistics.object_frequency(resource(pattern.object()));

    match pattern.pattern_type() {
        TriplePatternType::Unbound => statistics.chunk_size(),
        TriplePatternType::S => subject(),
        TriplePatternType::P => property(),
        TriplePatternType::O => object(),
        TriplePatternType::SP => min_frequency(&[&subject, &property]),
        TriplePatternType::SO => min_frequency(&[&subject, &object]),
        TriplePatternType::PO => min_frequency(&[&property, &object]),
        TriplePatternType::SPO => min_frequency(&[&subject, &property, &object]).min(1),
    }
}

/// Evaluates the frequencies lazily and stops at the first zero.
fn min_frequency(frequencies: &[&dyn Fn() -> u64]) -> u64 {
    let mut load = u64::MAX;
    for frequency in frequencies {
        load = load.min(frequency());
        if load == 0 {
            break;
        }
    }
    load
}
