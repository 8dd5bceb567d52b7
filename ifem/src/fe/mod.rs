//! Finite element machinery consumed by the solvers.
//!
//! Tensor-product Lagrange elements (Q1, Q2) on rectangular cells, Gauss
//! quadrature, dof enumeration over vertex/edge/cell entities and the
//! constraint bookkeeping used to eliminate hanging nodes and boundary
//! values during assembly.

pub mod constraints;
pub mod dofs;
pub mod quadrature;
pub mod shape;
pub mod values;

pub use constraints::*;
pub use dofs::*;
pub use quadrature::*;
pub use shape::*;
pub use values::*;
