//! Pure algorithms of the detection pipeline.
//!
//! Everything here is I/O-free: the diff normaliser and its change-identity
//! hash, a disjoint-set utility, and the strict-clique grouper that turns
//! confirmed pairwise edges into duplicate groups.

pub mod clique;
mod errors;
pub mod normalize;
pub mod union_find;

pub use clique::{Clique, PairEdge, Relationship, VerifyResult, group_cliques};
pub use errors::DetectError;
pub use normalize::{hash_diff, normalize_diff};
pub use union_find::UnionFind;
