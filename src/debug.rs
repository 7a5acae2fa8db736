//! Compact formatting of solver state for log output.

use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};
use std::f64::consts::PI;

use crate::tensor::ComplexValue;

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(6);

fn format_polar(z: &Complex64) -> String {
    format!(
        "{}\u{2220}{}\u{00B0}",
        dtoa(z.norm(), FLOAT_CONFIG),
        dtoa(z.arg() * 180.0 / PI, FLOAT_CONFIG)
    )
}

fn format_rect(z: &Complex64) -> String {
    format!(
        "{}{}j{}",
        dtoa(z.re, FLOAT_CONFIG),
        if z.im.is_sign_negative() { "-" } else { "+" },
        dtoa(z.im.abs(), FLOAT_CONFIG)
    )
}

fn format_phases<const N: usize>(v: &ComplexValue<N>, f: fn(&Complex64) -> String) -> String {
    if N == 1 {
        return f(&v[0]);
    }
    let a: Vec<String> = v.iter().map(f).collect();
    format!("({})", a.join(" "))
}

/// Bus voltages in polar form, one group per bus.
pub fn format_polar_vec<const N: usize>(v: &[ComplexValue<N>]) -> String {
    let a: Vec<String> = v.iter().map(|z| format_phases(z, format_polar)).collect();
    format!("[{}]", a.join(", "))
}

/// Powers or currents in rectangular form, one group per element.
pub fn format_rect_vec<const N: usize>(v: &[ComplexValue<N>]) -> String {
    let a: Vec<String> = v.iter().map(|z| format_phases(z, format_rect)).collect();
    format!("[{}]", a.join(", "))
}
