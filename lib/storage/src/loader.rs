use crate::{StorageError, TripleStore};
use koral_model::ComputerId;
use std::io::BufRead;
use tracing::debug;

/// Loads triples of dictionary-encoded resources into `store`.
///
/// Each line holds `subject property object`, optionally followed by the comma-separated ids of
/// further computers that know the triple and a terminating `.`. Empty lines and lines starting
/// with `#` are skipped. The triple is always known by `current`.
pub fn load_triples(
    store: &dyn TripleStore,
    reader: impl BufRead,
    current: ComputerId,
) -> Result<usize, StorageError> {
    let mut loaded = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let number = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_suffix('.').unwrap_or(line);
        let parts = line.split_whitespace().collect::<Vec<_>>();
        let (terms, knowing) = match parts.as_slice() {
            [s, p, o] => ([*s, *p, *o], None),
            [s, p, o, knowing] => ([*s, *p, *o], Some(*knowing)),
            _ => {
                return Err(StorageError::InvalidTriple {
                    line: number,
                    reason: format!("expected three resource ids but got '{line}'"),
                })
            }
        };

        let mut triple = [0; 3];
        for (value, term) in triple.iter_mut().zip(terms) {
            *value = term.parse().map_err(|_| StorageError::InvalidTriple {
                line: number,
                reason: format!("'{term}' is not a resource id"),
            })?;
        }

        let mut containment = vec![0; store.containment_size()];
        set_computer(&mut containment, current);
        for computer in knowing.into_iter().flat_map(|list| list.split(',')) {
            let computer = computer.parse().map_err(|_| StorageError::InvalidTriple {
                line: number,
                reason: format!("'{computer}' is not a computer id"),
            })?;
            set_computer(&mut containment, computer);
        }

        store.store_triple(triple, &containment)?;
        loaded += 1;
    }
    debug!(loaded, "Loaded triples");
    Ok(loaded)
}

fn set_computer(containment: &mut [u8], computer: ComputerId) {
    if let Some(index) = computer.checked_sub(1).map(usize::from) {
        if let Some(byte) = containment.get_mut(index / 8) {
            *byte |= 0x80 >> (index % 8);
        }
    }
}
