//! The containment bitset of a mapping records which slaves know the mapping.
//!
//! Slave `c` (counting from 1) is represented by the bit `0x80 >> ((c - 1) % 8)` of the byte
//! `(c - 1) / 8`. The master (id 0) is never part of a containment.

use koral_model::ComputerId;

/// Returns the number of bytes required for the containment of `number_of_slaves` slaves.
pub fn containment_size(number_of_slaves: u16) -> usize {
    usize::from(number_of_slaves).div_ceil(8)
}

fn position(computer: ComputerId) -> Option<(usize, u8)> {
    let index = usize::from(computer.checked_sub(1)?);
    Some((index / 8, 0x80 >> (index % 8)))
}

/// A read-only containment bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Containment<'a>(&'a [u8]);

impl<'a> Containment<'a> {
    /// Creates a new [Containment].
    pub fn new(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn is_known_by(&self, computer: ComputerId) -> bool {
        position(computer)
            .and_then(|(byte, mask)| self.0.get(byte).map(|b| b & mask != 0))
            .unwrap_or(false)
    }

    /// Returns the smallest computer id that knows the mapping.
    pub fn first_known_computer(&self) -> Option<ComputerId> {
        self.known_computers().next()
    }

    /// Returns all computers that know the mapping in ascending order.
    pub fn known_computers(&self) -> impl Iterator<Item = ComputerId> + 'a {
        let bytes = self.0;
        bytes.iter().enumerate().flat_map(|(index, byte)| {
            (0..8u16).filter_map(move |bit| {
                if byte & (0x80 >> bit) == 0 {
                    return None;
                }
                u16::try_from(index * 8)
                    .ok()
                    .map(|offset| offset + bit + 1)
            })
        })
    }
}

/// A mutable containment bitset.
#[derive(Debug, PartialEq, Eq)]
pub struct ContainmentMut<'a>(&'a mut [u8]);

impl<'a> ContainmentMut<'a> {
    /// Creates a new [ContainmentMut].
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self(bytes)
    }

    pub fn as_containment(&self) -> Containment<'_> {
        Containment(self.0)
    }

    pub fn set(&mut self, computer: ComputerId) {
        if let Some((byte, mask)) = position(computer) {
            if let Some(b) = self.0.get_mut(byte) {
                *b |= mask;
            }
        }
    }

    pub fn unset(&mut self, computer: ComputerId) {
        if let Some((byte, mask)) = position(computer) {
            if let Some(b) = self.0.get_mut(byte) {
                *b &= !mask;
            }
        }
    }

    /// Marks the mapping as known by all `number_of_slaves` slaves.
    pub fn set_to_all(&mut self, number_of_slaves: u16) {
        self.0.fill(0);
        for computer in 1..=number_of_slaves {
            self.set(computer);
        }
    }

    /// Moves the knowledge of the mapping from `current` to `next`.
    pub fn update(&mut self, current: ComputerId, next: ComputerId) {
        self.unset(current);
        self.set(next);
    }

    /// Keeps only the computers that also know `other`.
    pub fn intersect(&mut self, other: Containment<'_>) {
        for (byte, other) in self.0.iter_mut().zip(other.as_bytes()) {
            *byte &= other;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_rounds_up_to_bytes() {
        assert_eq!(containment_size(1), 1);
        assert_eq!(containment_size(8), 1);
        assert_eq!(containment_size(9), 2);
    }

    #[test]
    fn bit_layout_starts_with_most_significant_bit() {
        let mut bytes = [0u8; 2];
        let mut containment = ContainmentMut::new(&mut bytes);
        containment.set(1);
        containment.set(10);
        assert_eq!(bytes, [0x80, 0x40]);
    }

    #[test]
    fn set_to_all_marks_only_existing_slaves() {
        let mut bytes = [0u8; 2];
        ContainmentMut::new(&mut bytes).set_to_all(10);
        assert_eq!(bytes, [0xff, 0xc0]);
        assert_eq!(
            Containment::new(&bytes).known_computers().count(),
            10
        );
    }

    #[test]
    fn update_moves_knowledge() {
        let mut bytes = [0x80u8];
        let mut containment = ContainmentMut::new(&mut bytes);
        containment.update(1, 3);
        assert!(!containment.as_containment().is_known_by(1));
        assert!(containment.as_containment().is_known_by(3));
        assert_eq!(containment.as_containment().first_known_computer(), Some(3));
    }

    #[test]
    fn master_is_never_contained() {
        let bytes = [0xffu8];
        assert!(!Containment::new(&bytes).is_known_by(0));
        assert_eq!(Containment::new(&[0u8]).first_known_computer(), None);
    }

    #[test]
    fn intersection() {
        let mut bytes = [0b1100_0000u8];
        ContainmentMut::new(&mut bytes).intersect(Containment::new(&[0b0110_0000]));
        assert_eq!(bytes, [0b0100_0000]);
    }
}
