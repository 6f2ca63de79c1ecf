//! Deduplicating embedding cache.
//!
//! `EmbeddingStore` maps an entity key (news id, clicked-news history string)
//! to its dense vector. Entries are only ever computed once per evaluation
//! pass: batch population checks membership first and hands the encoder only
//! the keys that are still missing, deduplicated in first-occurrence order.
//! There is no eviction; the store lives for one run.
//!
//! All entries share one dimension, fixed by the first insertion.

use std::borrow::Borrow;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

use log::{debug, trace};

use crate::error::{EvalError, Result};

/// A dense embedding vector.
pub type Embedding = Vec<f64>;

#[derive(Clone, Debug, Default)]
pub struct EmbeddingStore<K> {
    entries: HashMap<K, Embedding>,
    dim: Option<usize>,
    compute_calls: usize,
}

fn check_dim(dim: &mut Option<usize>, len: usize) -> Result<()> {
    match *dim {
        Some(d) if d != len => Err(EvalError::dimension_mismatch(d, len)),
        Some(_) => Ok(()),
        None => {
            if len == 0 {
                return Err(EvalError::invalid_parameter("embeddings must be non-empty"));
            }
            *dim = Some(len);
            Ok(())
        }
    }
}

impl<K> EmbeddingStore<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            dim: None,
            compute_calls: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shared embedding dimension, `None` until the first insertion.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    /// Number of times a compute callback was invoked.
    pub fn compute_calls(&self) -> usize {
        self.compute_calls
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&Embedding>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    /// Lookup that turns an absent key into `MissingEmbedding`.
    pub fn require<Q>(&self, key: &Q) -> Result<&Embedding>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ?Sized,
    {
        self.entries
            .get(key)
            .ok_or_else(|| EvalError::missing_embedding(key.to_string()))
    }

    /// Insert or overwrite an entry.
    pub fn insert(&mut self, key: K, embedding: Embedding) -> Result<()> {
        check_dim(&mut self.dim, embedding.len())?;
        self.entries.insert(key, embedding);
        Ok(())
    }

    /// Insert the explicit zero vector used for padding slots.
    ///
    /// Inserted synchronously, never through an encoder. Requires the
    /// dimension to be known already.
    pub fn insert_zero_sentinel(&mut self, key: K) -> Result<()> {
        let dim = self.dim.ok_or_else(|| {
            EvalError::invalid_parameter("cannot size the padding sentinel of an empty store")
        })?;
        debug!("Inserting zero sentinel '{}' with dim {}", key, dim);
        self.entries.insert(key, vec![0.0; dim]);
        Ok(())
    }

    /// Return the cached embedding for `key`, computing it once if absent.
    pub fn get_or_compute<F>(&mut self, key: K, compute: F) -> Result<&Embedding>
    where
        F: FnOnce(&K) -> Result<Embedding>,
    {
        match self.entries.entry(key) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => {
                let embedding = compute(v.key())?;
                self.compute_calls += 1;
                check_dim(&mut self.dim, embedding.len())?;
                Ok(v.insert(embedding))
            }
        }
    }

    /// Populate the store for a batch of keys.
    ///
    /// `compute` receives the positions (into `keys`) of the keys that are not
    /// cached yet, one position per distinct key, and must return one
    /// embedding per position in the same order. It is not called at all when
    /// every key is already present. Returns the number of new entries.
    pub fn get_or_compute_batch<F>(&mut self, keys: &[K], compute: F) -> Result<usize>
    where
        F: FnOnce(&[usize]) -> Result<Vec<Embedding>>,
    {
        let mut seen: HashSet<&K> = HashSet::new();
        let missing: Vec<usize> = keys
            .iter()
            .enumerate()
            .filter(|(_, k)| !self.entries.contains_key(*k))
            .filter(|(_, k)| seen.insert(*k))
            .map(|(i, _)| i)
            .collect();

        if missing.is_empty() {
            trace!("Batch of {} keys fully cached", keys.len());
            return Ok(0);
        }

        let computed = compute(&missing)?;
        self.compute_calls += 1;
        if computed.len() != missing.len() {
            return Err(EvalError::dimension_mismatch(missing.len(), computed.len()));
        }

        // nothing is inserted unless every embedding matches the store dimension
        let mut dim = self.dim;
        for embedding in &computed {
            check_dim(&mut dim, embedding.len())?;
        }
        self.dim = dim;

        for (&pos, embedding) in missing.iter().zip(computed) {
            self.entries.insert(keys[pos].clone(), embedding);
        }
        trace!(
            "Batch of {} keys: {} computed, store size {}",
            keys.len(),
            missing.len(),
            self.entries.len()
        );
        Ok(missing.len())
    }
}
