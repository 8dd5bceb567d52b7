use ifem::test_utils::*;

/// Saving at step N and loading must reproduce the three state vectors
/// bit-for-bit and leave current and previous states equal.
#[test]
fn round_trip_restores_state_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = solid_only_parameters(dir.path());
    params.gravity = [0.3, -9.8];
    params.time.delta_t = 0.01;
    params.time.end = 1.0;

    let mut solver = make_solid_solver(&params);
    solver.run_one_step(true, None).unwrap();
    for _ in 0..2 {
        solver.run_one_step(false, None).unwrap();
    }
    solver.save_checkpoint().unwrap();
    let saved_step = solver.time.get_timestep();
    let displacement = solver.displacement().clone();
    let velocity = solver.velocity().clone();
    let acceleration = solver.acceleration().clone();

    let mut restored = make_solid_solver(&params);
    assert!(restored.load_checkpoint().unwrap());
    assert_eq!(restored.time.get_timestep(), saved_step);
    assert_eq!(restored.displacement(), &displacement);
    assert_eq!(restored.velocity(), &velocity);
    assert_eq!(restored.acceleration(), &acceleration);
    // Current and previous states coincide right after a load.
    assert_eq!(restored.previous_displacement(), &displacement);
    assert_eq!(restored.previous_velocity(), &velocity);
    assert_eq!(restored.previous_acceleration(), &acceleration);
}

/// After several successive saves exactly one checkpoint triple remains on
/// disk, corresponding to the most recent save.
#[test]
fn retention_keeps_one_generation() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = solid_only_parameters(dir.path());
    params.gravity = [0.0, -1.0];
    params.time.end = 1.0;

    let mut solver = make_solid_solver(&params);
    solver.run_one_step(true, None).unwrap();
    for _ in 0..3 {
        solver.run_one_step(false, None).unwrap();
        solver.save_checkpoint().unwrap();
    }
    let checkpoint_files: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.contains("solid_checkpoint"))
        .collect();
    assert_eq!(checkpoint_files.len(), 3);
    let stem = format!("{:06}", solver.time.get_timestep());
    assert!(checkpoint_files.iter().all(|f| f.starts_with(&stem)));
}

/// A missing checkpoint is the normal "start fresh" signal.
#[test]
fn absent_checkpoint_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let params = solid_only_parameters(dir.path());
    let mut solver = make_solid_solver(&params);
    assert!(!solver.load_checkpoint().unwrap());
    assert_eq!(solver.time.get_timestep(), 0);
}
