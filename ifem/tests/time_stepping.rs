use approx::assert_relative_eq;
use ifem::Time;

/// Repeated increments advance the clock by exactly one step size each and
/// the counter tracks the number of increments.
#[test]
fn increments_are_exact_and_counted() {
    for &dt in &[1e-6, 0.01, 0.125, 2.0] {
        let mut time = Time::new(1e6, dt, 10, 10, 10);
        let mut previous = time.current();
        for n in 1..=1000u32 {
            time.increment();
            assert!(time.current() > previous);
            assert_relative_eq!(time.current() - previous, dt, max_relative = 1e-9);
            assert_eq!(time.get_timestep(), n);
            previous = time.current();
        }
    }
}

#[test]
fn external_step_size_override_takes_effect_immediately() {
    let mut time = Time::new(10.0, 0.5, 1, 1, 1);
    time.increment();
    assert_relative_eq!(time.current(), 0.5);
    time.set_delta_t(0.25);
    time.increment();
    time.increment();
    assert_relative_eq!(time.current(), 1.0);
    assert_eq!(time.get_timestep(), 3);
}
