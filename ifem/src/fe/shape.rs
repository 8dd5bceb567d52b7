//! Tensor-product Lagrange shape functions on the reference square.
//!
//! Local nodes are ordered lexicographically, `node = iy * (order + 1) + ix`,
//! with 1-D node positions `{-1, 1}` for Q1 and `{-1, 0, 1}` for Q2. Corner
//! nodes therefore match the mesh's (bl, br, tl, tr) vertex ordering for Q1.

/// Number of local nodes of a Qk element.
pub fn nodes_per_cell(order: usize) -> usize {
    (order + 1) * (order + 1)
}

fn lagrange_1d(order: usize, node: usize, t: f64) -> f64 {
    match (order, node) {
        (1, 0) => 0.5 * (1.0 - t),
        (1, 1) => 0.5 * (1.0 + t),
        (2, 0) => 0.5 * t * (t - 1.0),
        (2, 1) => 1.0 - t * t,
        (2, 2) => 0.5 * t * (t + 1.0),
        _ => panic!("unsupported element order {}", order),
    }
}

fn lagrange_1d_deriv(order: usize, node: usize, t: f64) -> f64 {
    match (order, node) {
        (1, 0) => -0.5,
        (1, 1) => 0.5,
        (2, 0) => t - 0.5,
        (2, 1) => -2.0 * t,
        (2, 2) => t + 0.5,
        _ => panic!("unsupported element order {}", order),
    }
}

/// Value of shape function `node` at the reference point `(xi, eta)`.
pub fn shape_value(order: usize, node: usize, xi: f64, eta: f64) -> f64 {
    let n = order + 1;
    let (ix, iy) = (node % n, node / n);
    lagrange_1d(order, ix, xi) * lagrange_1d(order, iy, eta)
}

/// Reference gradient `(d/dxi, d/deta)` of shape function `node`.
pub fn shape_grad(order: usize, node: usize, xi: f64, eta: f64) -> [f64; 2] {
    let n = order + 1;
    let (ix, iy) = (node % n, node / n);
    [
        lagrange_1d_deriv(order, ix, xi) * lagrange_1d(order, iy, eta),
        lagrange_1d(order, ix, xi) * lagrange_1d_deriv(order, iy, eta),
    ]
}

/// Reference coordinates of a local node.
pub fn node_reference_position(order: usize, node: usize) -> [f64; 2] {
    let n = order + 1;
    let coord = |i: usize| match order {
        1 => [-1.0, 1.0][i],
        2 => [-1.0, 0.0, 1.0][i],
        _ => panic!("unsupported element order {}", order),
    };
    [coord(node % n), coord(node / n)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn partition_of_unity() {
        for order in 1..=2 {
            for &(xi, eta) in &[(0.3, -0.7), (-1.0, 1.0), (0.0, 0.0)] {
                let sum: f64 = (0..nodes_per_cell(order))
                    .map(|n| shape_value(order, n, xi, eta))
                    .sum();
                assert_relative_eq!(sum, 1.0, max_relative = 1e-14);
                let gsum: [f64; 2] = (0..nodes_per_cell(order))
                    .map(|n| shape_grad(order, n, xi, eta))
                    .fold([0.0, 0.0], |a, g| [a[0] + g[0], a[1] + g[1]]);
                assert_relative_eq!(gsum[0], 0.0, epsilon = 1e-14);
                assert_relative_eq!(gsum[1], 0.0, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn kronecker_property() {
        for order in 1..=2 {
            for node in 0..nodes_per_cell(order) {
                for other in 0..nodes_per_cell(order) {
                    let p = node_reference_position(order, other);
                    let expected = if node == other { 1.0 } else { 0.0 };
                    assert_relative_eq!(
                        shape_value(order, node, p[0], p[1]),
                        expected,
                        epsilon = 1e-14
                    );
                }
            }
        }
    }
}
