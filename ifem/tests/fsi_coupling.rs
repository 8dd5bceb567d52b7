use std::rc::Rc;

use ifem::comm::LocalComm;
use ifem::interface::Indicator;
use ifem::test_utils::default_parameters;
use ifem::FsiDriver;

/// A short shared-mesh FSI run: an immersed elastic bar in a channel. The
/// coupled loop must complete, tag the covered cells solid, exchange finite
/// interface data and keep both clocks in lockstep.
#[test]
fn immersed_bar_couples_for_a_few_steps() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = default_parameters();
    params.time.delta_t = 0.01;
    params.time.end = 0.03;
    params.output_dir = dir.path().to_path_buf();

    let mut driver = FsiDriver::new(&params, Rc::new(LocalComm::new())).unwrap();
    driver.run().unwrap();

    assert_eq!(driver.solid.time.get_timestep(), 3);
    assert_eq!(driver.fluid.time.get_timestep(), 3);

    // Cells covered by the bar are tagged solid.
    let solid_cells = driver
        .fluid
        .mesh
        .active_cells()
        .filter(|&c| driver.fluid_store().indicator(c) == Indicator::Solid)
        .count();
    assert!(solid_cells > 0);
    assert!(solid_cells < driver.fluid.mesh.n_active_cells());

    // Both solvers hold finite state.
    assert!(driver.solid.displacement().iter().all(|v| v.is_finite()));
    assert!(driver.solid.velocity().iter().all(|v| v.is_finite()));
    assert!(driver.fluid.solution().iter().all(|v| v.is_finite()));

    // The separately tracked coupling channels were assembled.
    let (acc_part, stress_part, combined) = driver.fluid.fsi_force_channels();
    assert!(acc_part.iter().all(|v| v.is_finite()));
    assert!(stress_part.iter().all(|v| v.is_finite()));
    assert!(combined.iter().all(|v| v.is_finite()));

    // Traction records exist for the solid boundary faces.
    for cell in driver.solid.mesh.active_cells() {
        driver.solid_store().check_cell_data(cell).unwrap();
    }
}
