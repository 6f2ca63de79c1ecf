//! # newsdebias
//!
//! Evaluates a trained news recommender on held-out impressions after
//! removing a learned bias subspace from the news embeddings.
//!
//! Pipeline, leaves first:
//!
//! - [`store`]: deduplicating embedding cache
//! - [`statistics`]: per-category mean embeddings
//! - [`scatter`]: size-balanced within-category scatter matrix
//! - [`subspace`]: top-k bias directions via SVD / symmetric EVD ([`linalg`])
//! - [`neutralize`]: projection removal and unit renormalization
//! - [`ranking`]: click probabilities → ordinal ranks per impression
//! - [`driver`]: staged, batched evaluation over a data directory
//!
//! The recommender itself is external and consumed through
//! [`model::NewsRecommender`].

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod debias;
pub mod driver;
pub mod error;
pub mod linalg;
pub mod model;
pub mod neutralize;
pub mod ranking;
pub mod scatter;
pub mod statistics;
pub mod store;
pub mod subspace;

#[cfg(test)]
mod tests;
