//! Run parameters, loaded from a RON file and validated once at setup.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;

/// How the run is driven. Dispatched once per step by the orchestrator
/// instead of being branched on inside every assembly loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Solid dynamics alone with user-prescribed boundary data.
    StandAloneSolid,
    /// Fluid alone with user-prescribed boundary data.
    StandAloneFluid,
    /// Both solvers in this process group, coupled through the shared mesh.
    FsiSharedMesh,
    /// Solid dynamics computed by an external program on the same process
    /// group (see [`crate::sync`]).
    FsiExternal,
}

impl RunMode {
    pub fn is_fsi(self) -> bool {
        matches!(self, RunMode::FsiSharedMesh | RunMode::FsiExternal)
    }
}

/// Box-domain mesh description.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeshParameters {
    pub lower: [f64; 2],
    pub upper: [f64; 2],
    pub subdivisions: [usize; 2],
    pub global_refinements: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeParameters {
    pub end: f64,
    pub delta_t: f64,
    pub output_interval: u32,
    pub refinement_interval: u32,
    pub save_interval: u32,
}

/// Neumann data on the solid boundary of a stand-alone run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SolidNeumann {
    /// Fixed traction vector.
    Traction([f64; 2]),
    /// Pressure along the face normal.
    Pressure(f64),
}

/// One elastic material region.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct SolidPart {
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
}

/// Component selection for a Dirichlet boundary, encoded the way the
/// parameter files always have: 1-x, 2-y, 3-xy.
pub fn component_mask(flag: u32) -> [bool; 2] {
    [flag == 1 || flag == 3, flag == 2 || flag == 3]
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolidParameters {
    pub rho: f64,
    pub parts: Vec<SolidPart>,
    /// Newmark damping magnitude; the integrator uses `alpha = -damping`.
    pub damping: f64,
    pub degree: usize,
    /// Boundary id to component-mask flag for homogeneous Dirichlet sides.
    pub dirichlet_bcs: Vec<(u32, u32)>,
    pub neumann_bcs: Vec<(u32, SolidNeumann)>,
    /// Points whose displacement is pinned in single directions.
    pub constrained_points: Vec<[f64; 2]>,
    pub constrained_directions: Vec<usize>,
    pub initial_velocity: [f64; 2],
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FluidParameters {
    pub rho: f64,
    pub viscosity: f64,
    pub velocity_degree: usize,
    pub pressure_degree: usize,
    /// Peak inlet velocity of the parabolic profile.
    pub inlet_velocity: f64,
    /// Ramp time over which the inlet profile reaches its peak.
    pub inlet_ramp_time: f64,
    /// Boundary id to prescribed normal traction (pressure) value.
    pub neumann_bcs: Vec<(u32, f64)>,
    /// The pressure dof nearest this point is pinned to zero.
    pub pressure_pin_point: [f64; 2],
    /// Surface over which drag/lift integrals are accumulated.
    pub drag_boundary_id: u32,
    pub reference_diameter: f64,
    pub reference_velocity: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CouplingParameters {
    /// Penalty scale factor `theta` entering the solid-cell mass coefficient
    /// `(1 + theta) rho_s / dt`.
    pub penalty_scale_factor: f64,
    /// Treat the Eulerian-Lagrangian velocity penalty implicitly through a
    /// damping matrix instead of a pure right-hand-side force.
    pub implicit_penalty: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parameters {
    pub run_mode: RunMode,
    pub gravity: [f64; 2],
    pub solid_mesh: MeshParameters,
    pub fluid_mesh: MeshParameters,
    pub time: TimeParameters,
    pub solid: SolidParameters,
    pub fluid: FluidParameters,
    pub coupling: CouplingParameters,
    pub output_dir: PathBuf,
}

pub fn load_parameters(path: impl AsRef<Path>) -> Result<Parameters, Error> {
    let f = File::open(path.as_ref())?;
    let params: Parameters = ron::de::from_reader(f)?;
    params.validate()?;
    Ok(params)
}

impl Parameters {
    /// Reject invalid parameter combinations before any system is built.
    pub fn validate(&self) -> Result<(), Error> {
        if self.time.delta_t <= 0.0 {
            return Err(invalid("time step must be positive"));
        }
        if self.time.output_interval == 0
            || self.time.refinement_interval == 0
            || self.time.save_interval == 0
        {
            return Err(invalid("event intervals must be at least 1"));
        }
        if self.fluid.rho <= 0.0 || self.solid.rho <= 0.0 {
            return Err(invalid("densities must be positive"));
        }
        if self.fluid.viscosity <= 0.0 {
            return Err(invalid("viscosity must be positive"));
        }
        if self.solid.parts.is_empty() {
            return Err(invalid("at least one solid material part is required"));
        }
        for part in &self.solid.parts {
            if !(0.0..0.5).contains(&part.poisson_ratio) {
                return Err(invalid("Poisson ratio must lie in [0, 0.5)"));
            }
        }
        match self.run_mode {
            RunMode::FsiExternal => {
                if self.fluid.velocity_degree != 1 || self.fluid.pressure_degree != 1 {
                    return Err(invalid(
                        "use 1st order elements for both pressure and velocity with an \
                         external solid solver",
                    ));
                }
            }
            _ => {
                if self.fluid.velocity_degree != self.fluid.pressure_degree + 1 {
                    return Err(invalid(
                        "velocity finite element should be one order higher than pressure",
                    ));
                }
            }
        }
        if self.solid.degree != 1 {
            return Err(invalid("only first order solid elements are supported"));
        }
        if self.solid.constrained_points.len() != self.solid.constrained_directions.len() {
            return Err(invalid(
                "number of constrained points and directions must match",
            ));
        }
        if self
            .solid
            .constrained_directions
            .iter()
            .any(|&d| d >= crate::DIM)
        {
            return Err(invalid("constrained direction out of range"));
        }
        if self.coupling.penalty_scale_factor < 0.0 {
            return Err(invalid("penalty scale factor must be non-negative"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfiguration {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::default_parameters;

    #[test]
    fn default_parameters_are_valid() {
        default_parameters().validate().unwrap();
    }

    #[test]
    fn mismatched_degrees_are_rejected() {
        let mut params = default_parameters();
        params.fluid.velocity_degree = 1;
        assert!(params.validate().is_err());
    }

    #[test]
    fn external_mode_requires_equal_first_order() {
        let mut params = default_parameters();
        params.run_mode = RunMode::FsiExternal;
        assert!(params.validate().is_err());
        params.fluid.velocity_degree = 1;
        params.fluid.pressure_degree = 1;
        params.validate().unwrap();
    }

    #[test]
    fn mismatched_point_constraints_are_rejected() {
        let mut params = default_parameters();
        params.solid.constrained_points.push([0.0, 0.0]);
        assert!(params.validate().is_err());
    }

    #[test]
    fn sample_configuration_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../configs/fsi_bar.ron");
        let params = load_parameters(path).unwrap();
        assert_eq!(params.run_mode, RunMode::FsiSharedMesh);
        assert_eq!(params.fluid.velocity_degree, 2);
        assert_eq!(params.solid.parts.len(), 1);
    }
}
