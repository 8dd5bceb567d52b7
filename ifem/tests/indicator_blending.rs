use std::rc::Rc;

use approx::assert_relative_eq;
use ifem::comm::LocalComm;
use ifem::interface::{Indicator, InterfaceStore};
use ifem::mesh::QuadMesh;
use ifem::test_utils::default_parameters;
use ifem::{FluidSolver, Parameters};

/// Diagonal mass entry of an interior velocity dof after assembling the
/// whole mesh with a uniform indicator.
fn assembled_mass_diagonal(params: &Parameters, indicator: Indicator) -> f64 {
    let mesh = QuadMesh::subdivided_rectangle(
        params.fluid_mesh.lower,
        params.fluid_mesh.upper,
        params.fluid_mesh.subdivisions,
    );
    let mut fluid = FluidSolver::new(mesh, params, Rc::new(LocalComm::new())).unwrap();
    fluid.setup_dofs();
    fluid.set_up_boundary_values();
    fluid.initialize_system();

    let mut store = InterfaceStore::new(fluid.n_face_quad_points(), fluid.n_volume_quad_points());
    store.rebuild(&fluid.mesh);
    let cells: Vec<_> = fluid.mesh.active_cells().collect();
    for cell in cells {
        store.get_mut(cell).indicator = indicator;
    }
    fluid.assemble(&store).unwrap();

    // An interior velocity vertex well away from every constrained side.
    let handler = fluid.velocity_handler();
    let node = (0..handler.n_nodes())
        .find(|&n| {
            let p = handler.node_position(n);
            (p[0] - 0.75).abs() < 1e-12 && (p[1] - 0.25).abs() < 1e-12
        })
        .expect("no interior node at (0.75, 0.25)");
    let dof = handler.dof_of_node(node, 0);
    ifem::linsolve::diagonal(fluid.system_matrix())[dof]
}

/// The blended mass coefficient must be `rho_f / dt` on fluid cells and
/// `(1 + theta) rho_s / dt` on solid cells, for all valid parameters.
#[test]
fn mass_coefficient_follows_the_indicator() {
    let dir = tempfile::tempdir().unwrap();
    for &(rho_f, rho_s, theta, dt) in &[
        (1.0, 1.0, 1.0, 0.01),
        (1000.0, 1200.0, 0.5, 0.002),
        (0.8, 2.5, 3.0, 0.1),
    ] {
        let mut params = default_parameters();
        params.output_dir = dir.path().to_path_buf();
        // Make the viscous contribution negligible against the mass term.
        params.fluid.viscosity = 1e-12;
        params.fluid.rho = rho_f;
        params.solid.rho = rho_s;
        params.coupling.penalty_scale_factor = theta;
        params.time.delta_t = dt;

        let fluid_entry = assembled_mass_diagonal(&params, Indicator::Fluid);
        let solid_entry = assembled_mass_diagonal(&params, Indicator::Solid);

        // Ratio of the two assemblies isolates the blending factor.
        assert_relative_eq!(
            solid_entry / fluid_entry,
            (1.0 + theta) * rho_s / rho_f,
            max_relative = 1e-9
        );

        // Halving the step size doubles the mass coefficient.
        let mut halved = params.clone();
        halved.time.delta_t = dt / 2.0;
        let halved_entry = assembled_mass_diagonal(&halved, Indicator::Fluid);
        assert_relative_eq!(halved_entry / fluid_entry, 2.0, max_relative = 1e-9);
    }
}
