//! Simulated video analysis.
//!
//! No video is processed; progress advances through a fixed schedule and the
//! finished run yields the marker the AI stage requires.

use std::time::Duration;

use chrono::Utc;
use colored::*;
use tokio::sync::mpsc;
use tracing::info;

use crate::router::generate_id;
use crate::session::AnalysisMarker;

/// Progress values shown after the initial jump, one per step.
pub const PROGRESS_STEPS: [u8; 7] = [68, 72, 78, 85, 92, 96, 100];

pub struct AnalysisSimulator {
    step: Duration,
    /// When set, each progress value is sent here instead of printed.
    pub progress_tx: Option<mpsc::UnboundedSender<u8>>,
}

impl AnalysisSimulator {
    pub fn new(step: Duration) -> Self {
        AnalysisSimulator { step, progress_tx: None }
    }

    /// Walk the schedule, waiting `step` before each value.
    pub async fn run(&self) -> AnalysisMarker {
        for &progress in PROGRESS_STEPS.iter() {
            tokio::time::sleep(self.step).await;
            self.report(progress);
        }
        let marker = completed_marker();
        info!(session_id = %marker.session_id, "analysis complete");
        marker
    }

    fn report(&self, progress: u8) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(progress);
            return;
        }
        let filled = progress as usize / 5;
        let bar = format!("{}{}", "█".repeat(filled), "░".repeat(20 - filled));
        eprintln!("  {} {}", bar.bright_cyan(), format!("{:>3}%", progress).bold());
    }
}

/// Marker for a finished analysis with a fresh session id.
pub fn completed_marker() -> AnalysisMarker {
    AnalysisMarker {
        progress: 100,
        completed_at: Utc::now(),
        session_id: generate_id("session_"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_increasing_and_ends_at_100() {
        assert!(PROGRESS_STEPS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(PROGRESS_STEPS.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_run_reports_every_step() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sim = AnalysisSimulator::new(Duration::ZERO);
        sim.progress_tx = Some(tx);
        let marker = sim.run().await;
        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p);
        }
        assert_eq!(seen, PROGRESS_STEPS.to_vec());
        assert_eq!(marker.progress, 100);
        assert!(marker.session_id.starts_with("session_"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_takes_one_step_per_value() {
        let sim = AnalysisSimulator {
            step: Duration::from_secs(3),
            progress_tx: Some(mpsc::unbounded_channel().0),
        };
        let start = tokio::time::Instant::now();
        sim.run().await;
        assert_eq!(start.elapsed(), Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_is_pending_before_first_step() {
        let sim = AnalysisSimulator {
            step: Duration::from_secs(3),
            progress_tx: Some(mpsc::unbounded_channel().0),
        };
        let mut run = tokio_test::task::spawn(sim.run());
        tokio_test::assert_pending!(run.poll());
    }
}
