//! Gauss quadrature on the reference square `[-1, 1]^2` and its edges.

/// 1-D Gauss points and weights on `[-1, 1]`.
pub fn gauss_1d(n_points: usize) -> Vec<(f64, f64)> {
    match n_points {
        1 => vec![(0.0, 2.0)],
        2 => {
            let a = 1.0 / 3.0f64.sqrt();
            vec![(-a, 1.0), (a, 1.0)]
        }
        3 => {
            let a = (3.0 / 5.0f64).sqrt();
            vec![(-a, 5.0 / 9.0), (0.0, 8.0 / 9.0), (a, 5.0 / 9.0)]
        }
        _ => panic!("unsupported Gauss rule with {} points", n_points),
    }
}

/// Tensor-product Gauss rule on the reference square.
#[derive(Clone, Debug)]
pub struct GaussRule {
    /// Reference points `(xi, eta)`.
    pub points: Vec<[f64; 2]>,
    pub weights: Vec<f64>,
}

impl GaussRule {
    pub fn tensor(n_points_1d: usize) -> Self {
        let line = gauss_1d(n_points_1d);
        let mut points = Vec::with_capacity(line.len() * line.len());
        let mut weights = Vec::with_capacity(line.len() * line.len());
        for &(eta, wy) in &line {
            for &(xi, wx) in &line {
                points.push([xi, eta]);
                weights.push(wx * wy);
            }
        }
        GaussRule { points, weights }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn weights_integrate_constants() {
        for n in 1..=3 {
            let rule = GaussRule::tensor(n);
            let total: f64 = rule.weights.iter().sum();
            assert_relative_eq!(total, 4.0, max_relative = 1e-14);
        }
    }

    #[test]
    fn two_point_rule_is_exact_for_cubics() {
        let rule = GaussRule::tensor(2);
        let integral: f64 = rule
            .points
            .iter()
            .zip(&rule.weights)
            .map(|(p, w)| w * p[0] * p[0] * p[1] * p[1])
            .sum();
        assert_relative_eq!(integral, 4.0 / 9.0, max_relative = 1e-14);
    }
}
