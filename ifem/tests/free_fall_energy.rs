use approx::assert_relative_eq;
use ifem::test_utils::*;

/// Free fall under uniform gravity with zero initial velocity: the computed
/// kinetic-energy rate must match the power input from gravity,
/// `P = m g^2 t`, over several steps.
#[test]
fn kinetic_energy_rate_matches_gravity_power() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = solid_only_parameters(dir.path());
    let g = 9.81;
    params.gravity = [0.0, -g];
    params.solid.rho = 2.0;
    params.time.delta_t = 0.005;
    params.time.end = 1.0;

    let mut solver = make_solid_solver(&params);
    solver.run_one_step(true, None).unwrap();
    // Total mass of the unit-square body.
    let mass = 2.0;
    for _ in 0..6 {
        solver.run_one_step(false, None).unwrap();
        let t = solver.time.current();
        let (ke, ke_rate) = solver.calculate_ke().unwrap();
        let expected_power = mass * g * g * t;
        let expected_ke = 0.5 * mass * (g * t) * (g * t);
        assert_relative_eq!(ke_rate, expected_power, max_relative = 1e-9);
        assert_relative_eq!(ke, expected_ke, max_relative = 1e-9);
    }
}
