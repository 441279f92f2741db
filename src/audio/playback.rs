//! Gapless FIFO scheduling of model audio.
//!
//! Each chunk starts at `max(now, cursor)` and pushes the cursor to its end,
//! so consecutive chunks play back to back in arrival order and never overlap.

/// Playback window assigned to one chunk, in device seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub start: f64,
    pub end: f64,
}

impl ScheduledChunk {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Default, Clone)]
pub struct PlaybackScheduler {
    cursor: f64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device time at which the last queued chunk ends
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn schedule(&mut self, now: f64, samples: usize, sample_rate: u32) -> ScheduledChunk {
        let start = now.max(self.cursor);
        let end = start + samples as f64 / sample_rate as f64;
        self.cursor = end;
        ScheduledChunk { start, end }
    }

    /// Whether a chunk ending at `ended_at` was the last one queued, within
    /// `slack` seconds.
    pub fn is_drained(&self, ended_at: f64, slack: f64) -> bool {
        ended_at >= self.cursor - slack
    }

    pub fn reset(&mut self) {
        self.cursor = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_back_to_back_chunks_are_contiguous() {
        let mut sched = PlaybackScheduler::new();
        let a = sched.schedule(1.0, 24_000, 24_000);
        let b = sched.schedule(1.2, 12_000, 24_000);
        let c = sched.schedule(1.3, 2_400, 24_000);

        assert!((a.start - 1.0).abs() < EPS);
        assert!((b.start - a.end).abs() < EPS);
        assert!((c.start - b.end).abs() < EPS);
        assert!((c.end - 2.6).abs() < EPS);
        assert!((b.duration() - 0.5).abs() < EPS);
    }

    #[test]
    fn test_chunks_never_overlap() {
        let mut sched = PlaybackScheduler::new();
        let arrivals = [0.0, 0.01, 0.5, 3.0, 3.0, 3.05, 10.0];
        let mut prev: Option<ScheduledChunk> = None;

        for (i, now) in arrivals.iter().enumerate() {
            let chunk = sched.schedule(*now, 1_000 * (i + 1), 24_000);
            assert!(chunk.start >= *now);
            if let Some(p) = prev {
                assert!(chunk.start >= p.end - EPS);
            }
            prev = Some(chunk);
        }
    }

    #[test]
    fn test_gap_after_idle_starts_now() {
        let mut sched = PlaybackScheduler::new();
        sched.schedule(0.0, 2_400, 24_000);
        let late = sched.schedule(5.0, 2_400, 24_000);
        assert_eq!(late.start, 5.0);
    }

    #[test]
    fn test_is_drained_with_slack() {
        let mut sched = PlaybackScheduler::new();
        sched.schedule(0.0, 24_000, 24_000);
        let last = sched.schedule(0.0, 24_000, 24_000);

        assert!(!sched.is_drained(1.0, 0.1));
        assert!(sched.is_drained(last.end - 0.05, 0.1));
        assert!(sched.is_drained(last.end, 0.0));

        sched.reset();
        assert_eq!(sched.cursor(), 0.0);
    }
}
