//! Compact bitset used to encode bipartitions (splits) over taxon indices.
//!
//! # Overview
//! Bit *i* of an edge's bitset is set iff the taxon with namespace index *i*
//! is a descendant of that edge's head node.
//!
//! # Example
//! For a namespace [A, B, C, D] (indices [0, 1, 2, 3]):
//! - Split {A, C} → bitset `0b0101` (bits 0 and 2 set)
//! - Split {B, C, D} → bitset `0b1110` (bits 1, 2, 3 set)

/// A compact bitset over taxon indices.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily many taxa.
/// Each u64 word holds 64 taxon indices. Two bitsets compare equal only when
/// they have the same word count, so every mask of one computation must be
/// sized with the same [`Bitset::words_for`].
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// # Parameters
    /// - `words`: Number of u64 words needed, see [`Bitset::words_for`].
    ///
    /// # Example
    /// ```
    /// # use rust_python_phylo_distances::bitset::Bitset;
    /// // For 100 taxa, need 2 words (128 bits)
    /// let bs = Bitset::zeros(Bitset::words_for(100));
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Number of words needed to hold `num_taxa` bits (at least one).
    pub fn words_for(num_taxa: usize) -> usize {
        num_taxa.div_ceil(64).max(1)
    }

    /// Bitset with only bit `idx` set.
    pub fn singleton(idx: usize, words: usize) -> Self {
        let mut bs = Bitset::zeros(words);
        bs.set(idx);
        bs
    }

    /// Bitset with bits `0..num_taxa` set (the full-taxa mask).
    pub fn full(num_taxa: usize) -> Self {
        let mut bs = Bitset::zeros(Bitset::words_for(num_taxa));
        for idx in 0..num_taxa {
            bs.set(idx);
        }
        bs
    }

    /// Sets the bit at the given index to 1.
    ///
    /// # Example
    /// ```
    /// # use rust_python_phylo_distances::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(5);
    /// assert_eq!(bs.0[0], 0b00100001);
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6;
        let bit = idx & 63;
        self.0[word] |= 1u64 << bit;
    }

    #[inline]
    pub fn is_set(&self, idx: usize) -> bool {
        let word = idx >> 6;
        let bit = idx & 63;
        self.0.get(word).is_some_and(|w| (w >> bit) & 1 == 1)
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// # Example
    /// ```
    /// # use rust_python_phylo_distances::bitset::Bitset;
    /// let mut left = Bitset::singleton(0, 1);
    /// let right = Bitset::singleton(1, 1);
    /// left.or_assign(&right);
    /// assert_eq!(left.0[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Bitwise AND (intersection) into `self`.
    #[inline]
    pub fn and_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a &= *b;
        }
    }

    /// Complement of `self` restricted to the bits of `universe`.
    pub fn complement_within(&self, universe: &Bitset) -> Bitset {
        Bitset(
            self.0
                .iter()
                .zip(&universe.0)
                .map(|(a, u)| !a & u)
                .collect(),
        )
    }

    /// True if every bit of `self` is also set in `other`.
    pub fn is_subset_of(&self, other: &Bitset) -> bool {
        self.0.iter().zip(&other.0).all(|(a, b)| a & !b == 0)
    }

    /// Index of the lowest set bit, if any.
    pub fn first_set(&self) -> Option<usize> {
        self.0
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * 64 + w.trailing_zeros() as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// Counts the number of set bits (population count).
    ///
    /// # Example
    /// ```
    /// # use rust_python_phylo_distances::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(2);
    /// bs.set(5);
    /// assert_eq!(bs.count_ones(), 3);
    /// ```
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Renders the lowest `width` bits with the highest index on the left,
    /// e.g. `..**` for {0, 1} over four taxa.
    pub fn as_split_string(&self, width: usize, off: char, on: char) -> String {
        let mut out = String::with_capacity(width);
        for idx in (0..width).rev() {
            out.push(if self.is_set(idx) { on } else { off });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = Bitset::zeros(1);
        bs.set(0);
        bs.set(2);
        assert_eq!(bs.0[0], 0b0101);
        assert!(bs.is_set(2));
        assert!(!bs.is_set(1));
        assert!(!bs.is_set(500));
    }

    #[test]
    fn test_bitset_or_and() {
        let mut bs1 = Bitset::zeros(1);
        bs1.set(0);
        bs1.set(1);

        let mut bs2 = Bitset::zeros(1);
        bs2.set(1);
        bs2.set(3);

        let mut inter = bs1.clone();
        inter.and_assign(&bs2);
        assert_eq!(inter.0[0], 0b0010);

        bs1.or_assign(&bs2);
        assert_eq!(bs1.0[0], 0b1011);
    }

    /// ```text
    ///           root
    ///          /    \
    ///        node1   D
    ///        /   \
    ///       A    node2
    ///            /   \
    ///           B     C
    /// ```
    ///
    /// Taxon indices: A=0, B=1, C=2, D=3
    #[test]
    fn test_mini_tree_example() {
        let mut node2 = Bitset::singleton(1, 1);
        node2.or_assign(&Bitset::singleton(2, 1));
        assert_eq!(node2.0[0], 0b0110);

        let mut node1 = Bitset::singleton(0, 1);
        node1.or_assign(&node2);
        assert_eq!(node1.0[0], 0b0111);
        assert!(node2.is_subset_of(&node1));
        assert!(!node1.is_subset_of(&node2));

        let full = Bitset::full(4);
        assert_eq!(node1.complement_within(&full).0[0], 0b1000);
        assert_eq!(node1.as_split_string(4, '.', '*'), ".***");
    }

    #[test]
    fn test_large_namespace() {
        assert_eq!(Bitset::words_for(0), 1);
        assert_eq!(Bitset::words_for(64), 1);
        assert_eq!(Bitset::words_for(65), 2);

        let mut bs = Bitset::zeros(2);
        bs.set(0);
        bs.set(63);
        bs.set(64);
        bs.set(127);

        assert_eq!(bs.count_ones(), 4);
        assert_eq!(bs.0[0], 1u64 | (1u64 << 63));
        assert_eq!(bs.0[1], 1u64 | (1u64 << 63));

        let full = Bitset::full(100);
        assert_eq!(full.count_ones(), 100);
        assert_eq!(bs.complement_within(&full).count_ones(), 97);
        assert!(Bitset::zeros(2).is_empty());
        assert_eq!(Bitset::zeros(2).first_set(), None);
        assert_eq!(Bitset::singleton(70, 2).first_set(), Some(70));
        assert_eq!(bs.first_set(), Some(0));
    }
}
