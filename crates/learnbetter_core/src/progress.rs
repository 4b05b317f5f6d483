use std::time::{Duration, Instant};

pub const PROGRESS_TICK: Duration = Duration::from_millis(500);
pub const PROGRESS_CEILING: f64 = 90.0;
pub const QUIZ_PROGRESS_DIVISOR: f64 = 15.0;
pub const PROCESSING_PROGRESS_DIVISOR: f64 = 20.0;

/// Progress bar that eases toward 90% while a remote step is pending and
/// jumps to 100% when it finishes.
#[derive(Debug, Clone)]
pub struct SimulatedProgress {
    value: f64,
    divisor: f64,
    next_tick_at: Option<Instant>,
}

impl SimulatedProgress {
    pub fn new(divisor: f64) -> Self {
        Self {
            value: 0.0,
            divisor,
            next_tick_at: None,
        }
    }

    pub fn for_quiz() -> Self {
        Self::new(QUIZ_PROGRESS_DIVISOR)
    }

    pub fn for_processing() -> Self {
        Self::new(PROCESSING_PROGRESS_DIVISOR)
    }

    pub fn start(&mut self, now: Instant) {
        self.value = 0.0;
        self.next_tick_at = Some(now + PROGRESS_TICK);
    }

    pub fn is_running(&self) -> bool {
        self.next_tick_at.is_some()
    }

    pub fn next_tick_at(&self) -> Option<Instant> {
        self.next_tick_at
    }

    /// Applies every tick that has come due by `now`.
    pub fn advance(&mut self, now: Instant) -> f64 {
        while let Some(due) = self.next_tick_at {
            if due > now {
                break;
            }
            let step = ((PROGRESS_CEILING - self.value) / self.divisor).max(0.5);
            self.value = (self.value + step).min(PROGRESS_CEILING);
            self.next_tick_at = (self.value < PROGRESS_CEILING).then_some(due + PROGRESS_TICK);
        }
        self.value
    }

    pub fn complete(&mut self) {
        self.value = 100.0;
        self.next_tick_at = None;
    }

    pub fn stop(&mut self) {
        self.next_tick_at = None;
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn percent(&self) -> u8 {
        self.value.round().clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::SimulatedProgress;

    #[test]
    fn eases_toward_ceiling_without_passing_it() {
        let start = Instant::now();
        let mut progress = SimulatedProgress::for_quiz();
        progress.start(start);

        assert_eq!(progress.advance(start + Duration::from_millis(499)), 0.0);
        assert_eq!(progress.advance(start + Duration::from_millis(500)), 6.0);

        let late = progress.advance(start + Duration::from_secs(600));
        assert_eq!(late, 90.0);
        assert_eq!(progress.percent(), 90);
        assert!(!progress.is_running());
    }

    #[test]
    fn minimum_step_applies_near_the_ceiling() {
        let start = Instant::now();
        let mut progress = SimulatedProgress::for_processing();
        progress.start(start);
        progress.advance(start + Duration::from_secs(20));
        let before = progress.value();
        progress.advance(start + Duration::from_millis(20_500));
        assert!(progress.value() - before >= 0.5 || progress.value() == 90.0);
    }

    #[test]
    fn complete_jumps_to_hundred_and_stops_ticking() {
        let start = Instant::now();
        let mut progress = SimulatedProgress::for_processing();
        progress.start(start);
        progress.complete();
        assert!(!progress.is_running());
        assert_eq!(progress.advance(start + Duration::from_secs(5)), 100.0);
    }
}
