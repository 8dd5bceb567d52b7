//! Partitioned fluid-structure interaction on a shared Eulerian mesh.
//!
//! A deformable linear-elastic body is advanced by a Newmark-beta integrator
//! while the surrounding incompressible fluid is solved on a single mesh whose
//! cells carry a fluid/solid indicator. The two sides exchange stress,
//! acceleration and traction through an explicit per-cell interface store once
//! per time step.

pub mod checkpoint;
pub mod comm;
pub mod config;
pub mod coupling;
pub mod fe;
pub mod fluid;
pub mod interface;
pub mod linsolve;
pub mod logging;
pub mod mesh;
pub mod solid;
pub mod sync;
pub mod time;

pub mod test_utils;

use thiserror::Error;

/// Spatial dimension of the mesh kernel.
pub const DIM: usize = 2;

/// Number of independent components of a symmetric rank-2 tensor in `dim`
/// dimensions.
pub const fn sym_components(dim: usize) -> usize {
    dim * (dim + 1) / 2
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
    #[error("linear solve failed to converge after {iterations} iterations (residual {residual:.3e})")]
    SolverDiverged { iterations: u32, residual: f64 },
    #[error("mesh consistency error: {message}")]
    Consistency { message: String },
    #[error("constrained point ({x}, {y}) not found in the mesh")]
    PointNotFound { x: f64, y: f64 },
    #[error("interface record for cell {cell} has {found} faces, expected {expected}")]
    WrongCellData {
        cell: usize,
        found: usize,
        expected: usize,
    },
    #[error("file I/O error")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("checkpoint serialization error")]
    CheckpointCodec {
        #[from]
        source: bincode::Error,
    },
    #[error("parameter file parse error")]
    ConfigParse {
        #[from]
        source: ron::error::SpannedError,
    },
}

pub use comm::{Communicator, LocalComm};
pub use config::{Parameters, RunMode};
pub use coupling::FsiDriver;
pub use fluid::FluidSolver;
pub use interface::{CellRecord, Indicator, InterfaceStore};
pub use solid::{LinearElasticMaterial, SolidSolver};
pub use time::Time;
