//! Wave execution statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record of one scheduler wave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveStats {
    pub wave_number: u32,
    /// Steps dispatched in this wave.
    pub task_count: usize,
    /// Actual parallelism, at most the configured cap.
    pub parallelism: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completed: usize,
    pub failed: usize,
}

impl WaveStats {
    pub fn begin(wave_number: u32, task_count: usize) -> Self {
        Self {
            wave_number,
            task_count,
            parallelism: task_count,
            started_at: Utc::now(),
            ended_at: None,
            completed: 0,
            failed: 0,
        }
    }

    pub fn finish(&mut self, completed: usize, failed: usize) {
        self.completed = completed;
        self.failed = failed;
        self.ended_at = Some(Utc::now());
    }
}

/// Summary of a whole scheduler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveExecutionResult {
    pub total_waves: usize,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub duration_ms: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wave_stats_lifecycle() {
        let mut stats = WaveStats::begin(0, 3);
        assert_eq!(stats.parallelism, 3);
        assert!(stats.ended_at.is_none());

        stats.finish(2, 1);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert!(stats.ended_at.is_some());
    }
}
