use std::collections::BTreeMap;
use std::time::Instant;

/// Named durations and counters collected during a calculation.
pub type CalculationInfo = BTreeMap<String, f64>;

pub const KEY_MAX_ITERATIONS: &str = "Max number of iterations";

/// Measures one named phase of a calculation.
///
/// The code orders and nests the keys: `2220.Prepare matrix` belongs to
/// `2200.Calculate`.
pub struct Timer {
    code: u32,
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(code: u32, name: &'static str) -> Self {
        Self {
            code,
            name,
            start: Instant::now(),
        }
    }

    pub fn key(code: u32, name: &str) -> String {
        format!("{:04}.{}", code, name)
    }

    /// Adds the elapsed seconds to the entry of this phase.
    pub fn stop(self, info: &mut CalculationInfo) {
        let elapsed = self.start.elapsed().as_secs_f64();
        *info.entry(Self::key(self.code, self.name)).or_insert(0.0) += elapsed;
    }
}

/// Keeps the largest iteration count seen.
pub fn record_iterations(info: &mut CalculationInfo, num_iter: usize) {
    let entry = info.entry(KEY_MAX_ITERATIONS.to_string()).or_insert(0.0);
    *entry = entry.max(num_iter as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_accumulate() {
        let mut info = CalculationInfo::new();
        Timer::start(2220, "Prepare matrix").stop(&mut info);
        Timer::start(2220, "Prepare matrix").stop(&mut info);
        assert_eq!(info.len(), 1);
        assert!(info["2220.Prepare matrix"] >= 0.0);

        record_iterations(&mut info, 4);
        record_iterations(&mut info, 2);
        assert_eq!(info[KEY_MAX_ITERATIONS], 4.0);
    }
}
