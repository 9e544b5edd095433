//! # Connect3D Delaunay
//!
//! Incremental 3D Delaunay tetrahedralization with an explicit vertex
//! at infinity, so that every facet — hull facets included — is shared
//! by exactly two cells. This is the adjacency model the surface
//! reconstruction pipeline traverses.

pub mod predicates;
pub mod tetrahedralization;

pub use predicates::*;
pub use tetrahedralization::*;
