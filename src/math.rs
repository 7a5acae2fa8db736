use std::f64::consts::PI;

#[macro_export]
macro_rules! cmplx {
    () => {
        num_complex::Complex64::new(0.0, 0.0)
    };
    ($arg1:expr) => {
        num_complex::Complex64::new($arg1, 0.0)
    };
    ($arg1:expr, $arg2:expr) => {
        num_complex::Complex64::new($arg1, $arg2)
    };
}

/// Wraps an angle difference into `(-pi, pi]`.
pub fn wrap_angle(theta: f64) -> f64 {
    let t = (theta + PI).rem_euclid(2.0 * PI) - PI;
    if t <= -PI {
        t + 2.0 * PI
    } else {
        t
    }
}
