//! Linear elastic material law.

/// Isotropic linear elasticity described by Young's modulus and Poisson
/// ratio, with the Lame parameters derived once at construction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LinearElasticMaterial {
    youngs_modulus: f64,
    poisson_ratio: f64,
    density: f64,
    lambda: f64,
    mu: f64,
}

impl LinearElasticMaterial {
    pub fn new(youngs_modulus: f64, poisson_ratio: f64, density: f64) -> Self {
        let lambda =
            youngs_modulus * poisson_ratio / ((1.0 + poisson_ratio) * (1.0 - 2.0 * poisson_ratio));
        let mu = youngs_modulus / (2.0 * (1.0 + poisson_ratio));
        LinearElasticMaterial {
            youngs_modulus,
            poisson_ratio,
            density,
            lambda,
            mu,
        }
    }

    pub fn get_lambda(&self) -> f64 {
        self.lambda
    }

    pub fn get_mu(&self) -> f64 {
        self.mu
    }

    pub fn get_density(&self) -> f64 {
        self.density
    }

    /// Map a symmetric strain tensor to stress,
    /// `sigma = lambda tr(eps) I + 2 mu eps`.
    pub fn stress(&self, strain: [[f64; 2]; 2]) -> [[f64; 2]; 2] {
        let trace = strain[0][0] + strain[1][1];
        let mut stress = [[0.0; 2]; 2];
        for i in 0..2 {
            for j in 0..2 {
                stress[i][j] = 2.0 * self.mu * strain[i][j];
                if i == j {
                    stress[i][j] += self.lambda * trace;
                }
            }
        }
        stress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lame_parameters() {
        let material = LinearElasticMaterial::new(10.0, 0.25, 1.0);
        assert_relative_eq!(material.get_mu(), 4.0, max_relative = 1e-14);
        assert_relative_eq!(material.get_lambda(), 4.0, max_relative = 1e-14);
    }

    #[test]
    fn hydrostatic_strain_gives_hydrostatic_stress() {
        let material = LinearElasticMaterial::new(5.0, 0.3, 1.0);
        let strain = [[0.01, 0.0], [0.0, 0.01]];
        let stress = material.stress(strain);
        assert_relative_eq!(stress[0][0], stress[1][1], max_relative = 1e-14);
        assert_relative_eq!(stress[0][1], 0.0, epsilon = 1e-16);
        let expected = 2.0 * material.get_mu() * 0.01 + material.get_lambda() * 0.02;
        assert_relative_eq!(stress[0][0], expected, max_relative = 1e-14);
    }
}
