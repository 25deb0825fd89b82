//! Wall-clock timing of setup and solve phases.

use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Measured wall time of one labelled phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTiming {
    pub label: String,
    pub wall: Duration,
}

impl PhaseTiming {
    pub fn seconds(&self) -> f64 {
        self.wall.as_secs_f64()
    }
}

/// Start marker of a running phase. Stopping it yields the [`PhaseTiming`].
#[derive(Debug)]
pub struct PhaseTimer {
    label: String,
    start: Instant,
}

impl PhaseTimer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        debug!(phase = %label, "phase started");
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn stop(self) -> PhaseTiming {
        let wall = self.start.elapsed();
        info!(phase = %self.label, wall_seconds = wall.as_secs_f64(), "phase finished");
        PhaseTiming {
            label: self.label,
            wall,
        }
    }
}

/// Formats a timing report block such as "Setup phase times".
pub fn format_report(title: &str, timings: &[PhaseTiming]) -> String {
    let rule = "=".repeat(title.len() + 4);
    let mut out = format!("{rule}\n  {title}\n{rule}\n");
    for t in timings {
        out.push_str(&format!("{}:\n  wall clock time = {:.6} seconds\n", t.label, t.seconds()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_keeps_label() {
        let timing = PhaseTimer::start("AMS Setup").stop();
        assert_eq!(timing.label, "AMS Setup");
        assert!(timing.seconds() >= 0.0);
    }

    #[test]
    fn report_lists_each_phase() {
        let timings = [PhaseTiming {
            label: "DS-PCG Solve".into(),
            wall: Duration::from_millis(1500),
        }];
        let report = format_report("Solve phase times", &timings);
        assert!(report.contains("  Solve phase times\n"));
        assert!(report.contains("DS-PCG Solve:\n  wall clock time = 1.500000 seconds"));
    }
}
