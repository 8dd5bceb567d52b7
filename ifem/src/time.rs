//! Simulation clock shared by every solver.

/// Current time, step counter and the periodic-event predicates.
///
/// The step size is normally fixed by the parameter file; when the solid side
/// is driven by an external program the step size is overwritten each step
/// with the value obtained from the process-group reduction
/// (see [`crate::sync`]).
#[derive(Clone, Debug)]
pub struct Time {
    end: f64,
    delta_t: f64,
    current: f64,
    timestep: u32,
    output_interval: u32,
    refinement_interval: u32,
    save_interval: u32,
}

impl Time {
    pub fn new(
        end: f64,
        delta_t: f64,
        output_interval: u32,
        refinement_interval: u32,
        save_interval: u32,
    ) -> Self {
        assert!(delta_t > 0.0, "time step must be positive");
        Time {
            end,
            delta_t,
            current: 0.0,
            timestep: 0,
            output_interval,
            refinement_interval,
            save_interval,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn get_delta_t(&self) -> f64 {
        self.delta_t
    }

    pub fn get_timestep(&self) -> u32 {
        self.timestep
    }

    /// Advance the clock by one step.
    pub fn increment(&mut self) {
        self.current += self.delta_t;
        self.timestep += 1;
    }

    /// Override the step size. Used when the step size is dictated by an
    /// external solver.
    pub fn set_delta_t(&mut self, delta_t: f64) {
        assert!(delta_t > 0.0, "time step must be positive");
        self.delta_t = delta_t;
    }

    pub fn time_to_output(&self) -> bool {
        self.timestep % self.output_interval == 0
    }

    pub fn time_to_refine(&self) -> bool {
        self.timestep % self.refinement_interval == 0
    }

    pub fn time_to_save(&self) -> bool {
        self.timestep % self.save_interval == 0
    }

    /// True once the end time has been reached within a small tolerance.
    pub fn finished(&self) -> bool {
        self.end - self.current <= 1e-12
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn increment_advances_by_delta_t() {
        let mut time = Time::new(1.0, 0.125, 2, 5, 10);
        for n in 1..=8u32 {
            time.increment();
            assert_relative_eq!(time.current(), 0.125 * n as f64, max_relative = 1e-14);
            assert_eq!(time.get_timestep(), n);
        }
        assert!(time.finished());
    }

    #[test]
    fn periodic_predicates() {
        let mut time = Time::new(10.0, 1.0, 2, 3, 4);
        let mut outputs = 0;
        let mut refines = 0;
        let mut saves = 0;
        for _ in 0..12 {
            time.increment();
            if time.time_to_output() {
                outputs += 1;
            }
            if time.time_to_refine() {
                refines += 1;
            }
            if time.time_to_save() {
                saves += 1;
            }
        }
        assert_eq!(outputs, 6);
        assert_eq!(refines, 4);
        assert_eq!(saves, 3);
    }

    #[test]
    fn set_delta_t_overrides_step_size() {
        let mut time = Time::new(1.0, 0.1, 1, 1, 1);
        time.increment();
        time.set_delta_t(0.3);
        time.increment();
        assert_relative_eq!(time.current(), 0.4, max_relative = 1e-14);
        assert_eq!(time.get_timestep(), 2);
    }
}
