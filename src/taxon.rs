//! Taxon handles and the namespace that hands them out.
//!
//! A [`Taxon`] is compared by identity, not by label: two namespaces may both
//! contain a taxon labelled "A" and the two handles are different taxa.
//! Each taxon also carries its index in the namespace, which is the bit
//! position used by split bitmasks.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
struct TaxonInner {
    label: String,
    index: usize,
}

/// Immutable, identity-comparable handle to one biological entity.
#[derive(Clone)]
pub struct Taxon(Arc<TaxonInner>);

impl Taxon {
    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// Position of this taxon in its namespace (also its split bit).
    pub fn index(&self) -> usize {
        self.0.index
    }
}

impl PartialEq for Taxon {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Taxon {}

impl Hash for Taxon {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for Taxon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Taxon({:?}#{})", self.0.label, self.0.index)
    }
}

impl fmt::Display for Taxon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.label)
    }
}

#[derive(Debug, Default)]
struct NamespaceInner {
    taxa: Vec<Taxon>,
    by_label: HashMap<String, usize>,
}

/// Registry of taxa shared (by `Arc`) between trees and distance matrices.
///
/// Iteration order is insertion order and never changes.
#[derive(Debug, Default)]
pub struct TaxonNamespace {
    inner: RwLock<NamespaceInner>,
}

impl TaxonNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for a namespace that is about to be shared.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns the taxon labelled `label`, creating it if needed.
    pub fn get_or_create(&self, label: &str) -> Taxon {
        if let Some(taxon) = self.get(label) {
            return taxon;
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // another writer may have raced us between the read and write locks
        if let Some(&idx) = inner.by_label.get(label) {
            return inner.taxa[idx].clone();
        }
        let index = inner.taxa.len();
        let taxon = Taxon(Arc::new(TaxonInner {
            label: label.to_string(),
            index,
        }));
        inner.taxa.push(taxon.clone());
        inner.by_label.insert(label.to_string(), index);
        taxon
    }

    pub fn get(&self, label: &str) -> Option<Taxon> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_label.get(label).map(|&idx| inner.taxa[idx].clone())
    }

    pub fn contains(&self, taxon: &Taxon) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .taxa
            .get(taxon.index())
            .is_some_and(|t| t == taxon)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).taxa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all taxa in insertion order.
    pub fn taxa(&self) -> Vec<Taxon> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .taxa
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let ns = TaxonNamespace::new();
        let a1 = ns.get_or_create("A");
        let b = ns.get_or_create("B");
        let a2 = ns.get_or_create("A");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(a1.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(ns.len(), 2);
    }

    #[test]
    fn test_identity_not_label() {
        let ns1 = TaxonNamespace::new();
        let ns2 = TaxonNamespace::new();
        let a1 = ns1.get_or_create("A");
        let a2 = ns2.get_or_create("A");

        assert_eq!(a1.label(), a2.label());
        assert_ne!(a1, a2);
        assert!(ns1.contains(&a1));
        assert!(!ns1.contains(&a2));
    }

    #[test]
    fn test_iteration_order_is_insertion_order() {
        let ns = TaxonNamespace::new();
        for label in ["zeta", "alpha", "mu"] {
            ns.get_or_create(label);
        }
        let labels: Vec<String> = ns.taxa().iter().map(|t| t.label().to_string()).collect();
        assert_eq!(labels, vec!["zeta", "alpha", "mu"]);
    }
}
