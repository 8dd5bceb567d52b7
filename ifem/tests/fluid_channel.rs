use std::rc::Rc;

use ifem::comm::LocalComm;
use ifem::interface::InterfaceStore;
use ifem::mesh::QuadMesh;
use ifem::test_utils::default_parameters;
use ifem::FluidSolver;

/// Two steps of pressure-driven channel flow: the inlet profile is enforced
/// on the constrained dofs and the flow through the channel is forward.
#[test]
fn channel_flow_moves_forward() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = default_parameters();
    params.run_mode = ifem::RunMode::StandAloneFluid;
    params.fluid_mesh.subdivisions = [3, 1];
    params.time.delta_t = 0.01;
    params.time.end = 1.0;
    params.output_dir = dir.path().to_path_buf();

    let mesh = QuadMesh::subdivided_rectangle(
        params.fluid_mesh.lower,
        params.fluid_mesh.upper,
        params.fluid_mesh.subdivisions,
    );
    let mut fluid = FluidSolver::new(mesh, &params, Rc::new(LocalComm::new())).unwrap();
    fluid.setup_dofs();
    fluid.set_up_boundary_values();
    fluid.initialize_system();
    let mut store = InterfaceStore::new(fluid.n_face_quad_points(), fluid.n_volume_quad_points());
    store.rebuild(&fluid.mesh);

    fluid.run_one_step(&store).unwrap();
    fluid.run_one_step(&store).unwrap();

    // The inlet mid-height value reaches the ramped parabolic peak.
    let inlet = fluid.velocity_at_point([0.0, 0.25]).unwrap();
    assert!((inlet[0] - 1.0).abs() < 1e-9, "inlet u_x = {}", inlet[0]);
    assert!(inlet[1].abs() < 1e-9);

    // Forward flow at the channel center, no-slip on the walls.
    let center = fluid.velocity_at_point([0.75, 0.25]).unwrap();
    assert!(center[0] > 0.0, "center u_x = {}", center[0]);
    let wall = fluid.velocity_at_point([0.75, 0.0]).unwrap();
    assert!(wall[0].abs() < 1e-9 && wall[1].abs() < 1e-9);

    // The solution stays finite everywhere.
    assert!(fluid.solution().iter().all(|v| v.is_finite()));

    // Order-sensitive diagnostic logs exist with one row per step plus the
    // initial state and a header.
    let energy = std::fs::read_to_string(dir.path().join("energy_estimates.txt")).unwrap();
    assert_eq!(energy.lines().count(), 4);
}
