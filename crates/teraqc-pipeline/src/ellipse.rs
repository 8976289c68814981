//! Ellipse fitting over 2D scatter, used to model the envelope of
//! `(distance, depth)` pairs.
//!
//! Two strategies share the [`EllipseFitter`] trait:
//!
//! - [`EllipseFitKind::Direct`]: Fitzgibbon, Pilu and Fisher (1999) direct
//!   least-squares conic fit with the ellipse constraint `4AC - B^2 = 1`.
//!   Needs six points; falls back to moments when the fit is not an
//!   ellipse.
//! - [`EllipseFitKind::Moments`]: covariance ellipse with semi-axes of two
//!   standard deviations. Needs three points and a non-singular
//!   covariance.

use nalgebra::{DMatrix, Matrix2, Matrix3, SymmetricEigen, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Relative eigenvalue floor below which a covariance is singular.
const SINGULAR_RATIO: f64 = 1e-12;

/// A fitted ellipse in the plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center `[x, y]`.
    pub center: [f64; 2],
    /// Semi-major axis length.
    pub semi_major: f64,
    /// Semi-minor axis length.
    pub semi_minor: f64,
    /// Rotation of the major axis from the x axis, radians in `(-pi/2, pi/2]`.
    pub angle: f64,
}

impl Ellipse {
    /// Normalized radius of `point`: `1` on the boundary, `0` at the center.
    #[must_use]
    pub fn normalized_radius(&self, point: [f64; 2]) -> f64 {
        let (sin, cos) = self.angle.sin_cos();
        let dx = point[0] - self.center[0];
        let dy = point[1] - self.center[1];
        let u = dx.mul_add(cos, dy * sin);
        let v = (-dx).mul_add(sin, dy * cos);
        (u / self.semi_major).hypot(v / self.semi_minor)
    }

    fn is_valid(&self) -> bool {
        self.center.iter().all(|c| c.is_finite())
            && self.semi_major.is_finite()
            && self.semi_minor.is_finite()
            && self.semi_minor > 0.0
            && self.semi_major >= self.semi_minor
    }
}

/// Selects the ellipse fitting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EllipseFitKind {
    /// Direct least-squares conic fit with moment fallback.
    #[default]
    Direct,
    /// Covariance ellipse.
    Moments,
}

/// Trait for ellipse fitting strategies.
pub trait EllipseFitter {
    /// Fit an ellipse to `points`, or `None` if the points are too few or
    /// degenerate.
    fn fit(&self, points: &[[f64; 2]]) -> Option<Ellipse>;
}

impl EllipseFitter for EllipseFitKind {
    fn fit(&self, points: &[[f64; 2]]) -> Option<Ellipse> {
        match *self {
            Self::Direct => fit_direct(points).or_else(|| {
                if points.len() >= 6 {
                    log::warn!(
                        "direct ellipse fit failed on {} points; using moments",
                        points.len()
                    );
                }
                fit_moments(points)
            }),
            Self::Moments => fit_moments(points),
        }
    }
}

/// Covariance ellipse: centroid, principal axes along the covariance
/// eigenvectors, semi-axes of two standard deviations.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fit_moments(points: &[[f64; 2]]) -> Option<Ellipse> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() / n;

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let dx = p[0] - mx;
        let dy = p[1] - my;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let covariance = Matrix2::new(sxx / n, sxy / n, sxy / n, syy / n);

    let eigen = SymmetricEigen::new(covariance);
    let (major, minor) = if eigen.eigenvalues[0] >= eigen.eigenvalues[1] {
        (0, 1)
    } else {
        (1, 0)
    };
    let lambda_major = eigen.eigenvalues[major];
    let lambda_minor = eigen.eigenvalues[minor];
    if lambda_minor.is_nan() || lambda_minor <= 0.0 || lambda_minor <= lambda_major * SINGULAR_RATIO
    {
        return None;
    }

    let axis = eigen.eigenvectors.column(major);
    let ellipse = Ellipse {
        center: [mx, my],
        semi_major: 2.0 * lambda_major.sqrt(),
        semi_minor: 2.0 * lambda_minor.sqrt(),
        angle: normalize_angle(axis[1].atan2(axis[0])),
    };
    ellipse.is_valid().then_some(ellipse)
}

/// Direct least-squares ellipse fit.
///
/// Points are centered and scaled to a mean distance of `sqrt(2)` before
/// the fit, and the conic is mapped back afterwards.
#[must_use]
pub fn fit_direct(points: &[[f64; 2]]) -> Option<Ellipse> {
    let n = points.len();
    if n < 6 {
        return None;
    }
    let (mx, my, scale) = normalization(points);

    let mut design = DMatrix::<f64>::zeros(n, 6);
    for (i, p) in points.iter().enumerate() {
        let x = (p[0] - mx) * scale;
        let y = (p[1] - my) * scale;
        design[(i, 0)] = x * x;
        design[(i, 1)] = x * y;
        design[(i, 2)] = y * y;
        design[(i, 3)] = x;
        design[(i, 4)] = y;
        design[(i, 5)] = 1.0;
    }
    let scatter = design.transpose() * &design;
    let s11 = scatter.fixed_view::<3, 3>(0, 0).into_owned();
    let s12 = scatter.fixed_view::<3, 3>(0, 3).into_owned();
    let s22 = scatter.fixed_view::<3, 3>(3, 3).into_owned();

    let s22_inv = s22.try_inverse()?;
    let reduced = s11 - s12 * s22_inv * s12.transpose();
    let constraint = Matrix3::new(0.0, 0.0, 2.0, 0.0, -1.0, 0.0, 2.0, 0.0, 0.0);
    let system = constraint.try_inverse()? * reduced;

    let quadratic = constrained_eigenvector(&system)?;
    let linear = -s22_inv * s12.transpose() * quadratic;
    let normalized = Vector6::new(
        quadratic[0],
        quadratic[1],
        quadratic[2],
        linear[0],
        linear[1],
        linear[2],
    );
    conic_to_ellipse(denormalize(&normalized, mx, my, scale))
}

/// Centroid and isotropic scale taking the mean distance to `sqrt(2)`.
#[allow(clippy::cast_precision_loss)]
fn normalization(points: &[[f64; 2]]) -> (f64, f64, f64) {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| (p[0] - mx).hypot(p[1] - my))
        .sum::<f64>()
        / n;
    let scale = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    (mx, my, scale)
}

/// Undo `x' = s (x - mx)`, `y' = s (y - my)` on conic coefficients.
fn denormalize(c: &Vector6<f64>, mx: f64, my: f64, s: f64) -> [f64; 6] {
    let s2 = s * s;
    let (a, b, cc, d, e, f) = (c[0] * s2, c[1] * s2, c[2] * s2, c[3] * s, c[4] * s, c[5]);
    [
        a,
        b,
        cc,
        -2.0 * a * mx - b * my + d,
        -b * mx - 2.0 * cc * my + e,
        a * mx * mx + b * mx * my + cc * my * my - d * mx - e * my + f,
    ]
}

/// The eigenvector of the 3x3 reduced system that satisfies the ellipse
/// constraint `4 a0 a2 - a1^2 > 0`.
fn constrained_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let m = system;
    let trace = m.trace();
    let minors = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)] + m[(0, 0)] * m[(2, 2)]
        - m[(0, 2)] * m[(2, 0)]
        + m[(1, 1)] * m[(2, 2)]
        - m[(1, 2)] * m[(2, 1)];
    let det = m.determinant();

    let mut best: Option<(f64, Vector3<f64>)> = None;
    for lambda in real_cubic_roots(-trace, minors, -det) {
        let Some(v) = null_vector(&(m - Matrix3::identity() * lambda)) else {
            continue;
        };
        if 4.0 * v[0] * v[2] - v[1] * v[1] <= 0.0 {
            continue;
        }
        if best.is_none_or(|(l, _)| lambda.abs() < l) {
            best = Some((lambda.abs(), v));
        }
    }
    best.map(|(_, v)| v)
}

/// Null vector of a rank-2 matrix: the largest row of its adjugate.
fn null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let rows = [
        Vector3::new(
            m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)],
            m[(1, 2)] * m[(2, 0)] - m[(1, 0)] * m[(2, 2)],
            m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)],
        ),
        Vector3::new(
            m[(0, 2)] * m[(2, 1)] - m[(0, 1)] * m[(2, 2)],
            m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(2, 0)],
            m[(0, 1)] * m[(2, 0)] - m[(0, 0)] * m[(2, 1)],
        ),
        Vector3::new(
            m[(0, 1)] * m[(1, 2)] - m[(0, 2)] * m[(1, 1)],
            m[(0, 2)] * m[(1, 0)] - m[(0, 0)] * m[(1, 2)],
            m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
        ),
    ];
    let best = rows
        .iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;
    let norm = best.norm();
    (norm > 1e-15).then(|| best / norm)
}

/// Real roots of the monic cubic `x^3 + b x^2 + c x + d`.
fn real_cubic_roots(b: f64, c: f64, d: f64) -> Vec<f64> {
    use std::f64::consts::PI;

    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;
    let disc = -4.0 * p * p * p - 27.0 * q * q;

    if disc >= 0.0 {
        let r = (-p / 3.0).max(0.0).sqrt();
        let cos_arg = if r < 1e-15 {
            0.0
        } else {
            (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0)
        };
        let phi = cos_arg.acos();
        (0..3)
            .map(|k| 2.0 * r * (f64::from(k).mul_add(2.0 * PI, phi) / 3.0).cos() + shift)
            .collect()
    } else {
        let root = (q * q / 4.0 + p * p * p / 27.0).sqrt();
        vec![(-q / 2.0 + root).cbrt() + (-q / 2.0 - root).cbrt() + shift]
    }
}

/// Geometric parameters of the conic `A x^2 + B xy + C y^2 + D x + E y + F = 0`.
fn conic_to_ellipse([a, b, c, d, e, f]: [f64; 6]) -> Option<Ellipse> {
    let denom = 4.0 * a * c - b * b;
    if denom <= 0.0 {
        return None;
    }
    let cx = (b * e - 2.0 * c * d) / denom;
    let cy = (b * d - 2.0 * a * e) / denom;

    let sum = a + c;
    let diff = (a - c).hypot(b);
    let lambda_1 = f64::midpoint(sum, diff);
    let lambda_2 = f64::midpoint(sum, -diff);
    let at_center = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;
    if at_center.abs() < 1e-15 {
        return None;
    }
    let r1 = -at_center / lambda_1;
    let r2 = -at_center / lambda_2;
    if r1 <= 0.0 || r2 <= 0.0 {
        return None;
    }

    // Axis of lambda_1 in the quadratic form.
    let angle = 0.5 * b.atan2(a - c);
    let (semi_major, semi_minor, angle) = if r1 >= r2 {
        (r1.sqrt(), r2.sqrt(), angle)
    } else {
        (r2.sqrt(), r1.sqrt(), angle + std::f64::consts::FRAC_PI_2)
    };
    let ellipse = Ellipse {
        center: [cx, cy],
        semi_major,
        semi_minor,
        angle: normalize_angle(angle),
    };
    ellipse.is_valid().then_some(ellipse)
}

/// Wrap an axis angle into `(-pi/2, pi/2]`.
fn normalize_angle(angle: f64) -> f64 {
    use std::f64::consts::{FRAC_PI_2, PI};
    let mut angle = angle % PI;
    if angle > FRAC_PI_2 {
        angle -= PI;
    } else if angle <= -FRAC_PI_2 {
        angle += PI;
    }
    angle
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample(ellipse: &Ellipse, n: usize) -> Vec<[f64; 2]> {
        let (sin, cos) = ellipse.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
                let u = ellipse.semi_major * t.cos();
                let v = ellipse.semi_minor * t.sin();
                [
                    ellipse.center[0] + u * cos - v * sin,
                    ellipse.center[1] + u * sin + v * cos,
                ]
            })
            .collect()
    }

    #[test]
    fn normalized_radius_is_one_on_boundary() {
        let ellipse = Ellipse {
            center: [10.0, -3.0],
            semi_major: 5.0,
            semi_minor: 2.0,
            angle: 0.4,
        };
        for p in sample(&ellipse, 16) {
            assert!((ellipse.normalized_radius(p) - 1.0).abs() < 1e-9);
        }
        assert!(ellipse.normalized_radius(ellipse.center).abs() < 1e-12);
    }

    #[test]
    fn direct_fit_recovers_exact_ellipse() {
        let truth = Ellipse {
            center: [120.0, 6.0],
            semi_major: 40.0,
            semi_minor: 5.0,
            angle: 0.2,
        };
        let fitted = fit_direct(&sample(&truth, 24)).unwrap();
        assert!((fitted.center[0] - 120.0).abs() < 1e-4);
        assert!((fitted.center[1] - 6.0).abs() < 1e-4);
        assert!((fitted.semi_major - 40.0).abs() < 1e-4);
        assert!((fitted.semi_minor - 5.0).abs() < 1e-4);
        assert!((fitted.angle - 0.2).abs() < 1e-4);
    }

    #[test]
    fn direct_fit_needs_six_points() {
        let truth = Ellipse {
            center: [0.0, 0.0],
            semi_major: 3.0,
            semi_minor: 1.0,
            angle: 0.0,
        };
        assert!(fit_direct(&sample(&truth, 5)).is_none());
    }

    #[test]
    fn collinear_points_have_no_ellipse() {
        let points: Vec<[f64; 2]> = (0..10).map(|i| [f64::from(i) * 3.0, 4.0]).collect();
        assert!(fit_direct(&points).is_none());
        assert!(fit_moments(&points).is_none());
        assert!(EllipseFitKind::Direct.fit(&points).is_none());
    }

    #[test]
    fn moments_of_circle_sample() {
        let circle = Ellipse {
            center: [50.0, 7.0],
            semi_major: 10.0,
            semi_minor: 10.0,
            angle: 0.0,
        };
        let fitted = fit_moments(&sample(&circle, 64)).unwrap();
        assert!((fitted.center[0] - 50.0).abs() < 1e-9);
        assert!((fitted.center[1] - 7.0).abs() < 1e-9);
        // Variance of a uniform circle sample is r^2 / 2 along each axis.
        let expected = 2.0 * (50.0_f64).sqrt();
        assert!((fitted.semi_major - expected).abs() < 1e-6);
        assert!((fitted.semi_minor - expected).abs() < 1e-6);
    }

    #[test]
    fn moments_needs_three_points() {
        assert!(fit_moments(&[[0.0, 0.0], [1.0, 1.0]]).is_none());
    }

    #[test]
    fn moments_axis_follows_elongation() {
        let points = [[0.0, 0.0], [10.0, 1.0], [20.0, 0.0], [10.0, -1.0]];
        let fitted = fit_moments(&points).unwrap();
        assert!(fitted.angle.abs() < 1e-9);
        assert!(fitted.semi_major > fitted.semi_minor);
    }

    #[test]
    fn kind_default_and_serde() {
        assert_eq!(EllipseFitKind::default(), EllipseFitKind::Direct);
        let json = serde_json::to_string(&EllipseFitKind::Moments).unwrap();
        assert_eq!(json, "\"moments\"");
    }

    #[test]
    fn direct_kind_falls_back_to_moments() {
        // Five points: too few for the direct fit, enough for moments.
        let points = [[0.0, 0.0], [4.0, 1.0], [8.0, 0.0], [4.0, -1.0], [4.0, 0.0]];
        let direct = EllipseFitKind::Direct.fit(&points).unwrap();
        let moments = fit_moments(&points).unwrap();
        assert_eq!(direct, moments);
    }
}
