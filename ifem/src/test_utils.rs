//! Canonical parameters and helpers shared by the test suite.

use std::path::PathBuf;
use std::rc::Rc;

use crate::comm::LocalComm;
use crate::config::{
    CouplingParameters, FluidParameters, MeshParameters, Parameters, RunMode, SolidParameters,
    SolidPart, TimeParameters,
};
use crate::mesh::QuadMesh;
use crate::solid::SolidSolver;

/// Channel-with-immersed-bar setup used across the scenario tests.
pub fn default_parameters() -> Parameters {
    Parameters {
        run_mode: RunMode::FsiSharedMesh,
        gravity: [0.0, 0.0],
        solid_mesh: MeshParameters {
            lower: [0.5, 0.1],
            upper: [1.0, 0.4],
            subdivisions: [5, 3],
            global_refinements: 0,
        },
        fluid_mesh: MeshParameters {
            lower: [0.0, 0.0],
            upper: [1.5, 0.5],
            subdivisions: [6, 2],
            global_refinements: 0,
        },
        time: TimeParameters {
            end: 0.05,
            delta_t: 0.01,
            output_interval: 100,
            refinement_interval: 100,
            save_interval: 100,
        },
        solid: SolidParameters {
            rho: 1.0,
            parts: vec![SolidPart {
                youngs_modulus: 1e3,
                poisson_ratio: 0.3,
            }],
            damping: 0.0,
            degree: 1,
            dirichlet_bcs: Vec::new(),
            neumann_bcs: Vec::new(),
            constrained_points: Vec::new(),
            constrained_directions: Vec::new(),
            initial_velocity: [0.0, 0.0],
        },
        fluid: FluidParameters {
            rho: 1.0,
            viscosity: 0.1,
            velocity_degree: 2,
            pressure_degree: 1,
            inlet_velocity: 1.0,
            inlet_ramp_time: 1e-6,
            neumann_bcs: Vec::new(),
            pressure_pin_point: [1.5, 0.25],
            drag_boundary_id: 2,
            reference_diameter: 0.1,
            reference_velocity: 0.9796,
        },
        coupling: CouplingParameters {
            penalty_scale_factor: 1.0,
            implicit_penalty: false,
        },
        output_dir: PathBuf::from("output"),
    }
}

/// Stand-alone solid parameters over the unit square.
pub fn solid_only_parameters(output_dir: impl Into<PathBuf>) -> Parameters {
    let mut params = default_parameters();
    params.run_mode = RunMode::StandAloneSolid;
    params.solid_mesh = MeshParameters {
        lower: [0.0, 0.0],
        upper: [1.0, 1.0],
        subdivisions: [2, 2],
        global_refinements: 0,
    };
    params.output_dir = output_dir.into();
    params
}

/// A ready-to-step stand-alone solid solver.
pub fn make_solid_solver(params: &Parameters) -> SolidSolver {
    let mesh = QuadMesh::subdivided_rectangle(
        params.solid_mesh.lower,
        params.solid_mesh.upper,
        params.solid_mesh.subdivisions,
    );
    let mut solver = SolidSolver::new(mesh, params, Rc::new(LocalComm::new()))
        .expect("failed to build the solid solver");
    solver.setup_dofs().expect("failed to distribute solid dofs");
    solver.initialize_system();
    solver
}
