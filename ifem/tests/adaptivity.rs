use ifem::test_utils::*;

/// Adaptive remeshing of a bending bar: the error estimator drives
/// refinement, the three history vectors survive the transfer, and the
/// hanging-node constraints hold on the transferred state.
#[test]
fn remeshing_transfers_state_and_honors_constraints() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = solid_only_parameters(dir.path());
    // Clamp the left edge and let gravity bend the body.
    params.solid.dirichlet_bcs = vec![(0, 3)];
    params.gravity = [0.0, -50.0];
    params.solid.parts[0].youngs_modulus = 1e4;
    params.time.delta_t = 0.005;
    params.time.end = 1.0;

    let mut solver = make_solid_solver(&params);
    solver.run_one_step(true, None).unwrap();
    for _ in 0..3 {
        solver.run_one_step(false, None).unwrap();
    }
    let cells_before = solver.mesh.n_active_cells();

    solver.refine_mesh(0, 3).unwrap();
    assert!(solver.mesh.n_active_cells() > cells_before);

    // Transferred state is finite and the clamped edge stays clamped.
    assert!(solver.displacement().iter().all(|v| v.is_finite()));
    assert!(solver.velocity().iter().all(|v| v.is_finite()));
    let handler = solver.handler();
    for node in handler.boundary_nodes(&solver.mesh, 0) {
        for c in 0..2 {
            assert_eq!(solver.displacement()[handler.dof_of_node(node, c)], 0.0);
        }
    }

    // Hanging vertices interpolate their parents after the transfer.
    for h in solver.mesh.hanging_vertices() {
        let m = handler.node_of_vertex(h.vertex).unwrap();
        let a = handler.node_of_vertex(h.parents[0]).unwrap();
        let b = handler.node_of_vertex(h.parents[1]).unwrap();
        for c in 0..2 {
            let vm = solver.displacement()[handler.dof_of_node(m, c)];
            let va = solver.displacement()[handler.dof_of_node(a, c)];
            let vb = solver.displacement()[handler.dof_of_node(b, c)];
            assert!((vm - 0.5 * (va + vb)).abs() < 1e-12);
        }
    }

    // The solver keeps stepping on the refined mesh.
    solver.assemble_system(false, None).unwrap();
    solver.run_one_step(false, None).unwrap();
    assert!(solver.displacement().iter().all(|v| v.is_finite()));
}
