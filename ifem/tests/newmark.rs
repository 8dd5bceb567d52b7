use approx::assert_relative_eq;
use ifem::test_utils::*;

/// With `alpha = 0` the scheme is the standard undamped Newmark pair
/// `beta = 0.25, gamma = 0.5`. Under a constant body force with no
/// constraints, every dof follows the closed-form constant-acceleration
/// solution exactly.
#[test]
fn constant_force_reproduces_closed_form() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = solid_only_parameters(dir.path());
    params.gravity = [0.0, -9.8];
    params.time.delta_t = 0.01;
    params.time.end = 1.0;

    let mut solver = make_solid_solver(&params);
    solver.run_one_step(true, None).unwrap();
    for _ in 0..4 {
        solver.run_one_step(false, None).unwrap();
    }

    let t = solver.time.current();
    assert_relative_eq!(t, 0.05, max_relative = 1e-12);
    let n = solver.n_dofs();
    for dof in 0..n {
        let (expected_v, expected_u) = if dof % 2 == 1 {
            (-9.8 * t, -0.5 * 9.8 * t * t)
        } else {
            (0.0, 0.0)
        };
        assert_relative_eq!(solver.velocity()[dof], expected_v, epsilon = 1e-10);
        assert_relative_eq!(solver.displacement()[dof], expected_u, epsilon = 1e-10);
        if dof % 2 == 1 {
            assert_relative_eq!(solver.acceleration()[dof], -9.8, epsilon = 1e-8);
        }
    }
}

/// Numerical damping (`alpha < 0`) must leave a constant-acceleration state
/// exact as well: the Newmark update formulas are exact for constant `a`
/// regardless of `beta` and `gamma`.
#[test]
fn damped_scheme_is_exact_for_constant_acceleration() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = solid_only_parameters(dir.path());
    params.gravity = [0.0, -1.0];
    params.solid.damping = 0.1;
    params.time.delta_t = 0.02;
    params.time.end = 1.0;

    let mut solver = make_solid_solver(&params);
    solver.run_one_step(true, None).unwrap();
    for _ in 0..2 {
        solver.run_one_step(false, None).unwrap();
    }
    let t = solver.time.current();
    for dof in (1..solver.n_dofs()).step_by(2) {
        assert_relative_eq!(solver.velocity()[dof], -t, epsilon = 1e-10);
        assert_relative_eq!(solver.displacement()[dof], -0.5 * t * t, epsilon = 1e-10);
    }
}
