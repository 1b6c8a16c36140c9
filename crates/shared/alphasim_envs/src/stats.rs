/// Choice accuracy for reward-driven environments, with a sliding window of
/// recent outcomes.
#[derive(Debug, Clone)]
pub struct ChoiceStats {
    pub correct: u32,
    pub incorrect: u32,
    pub trials: u32,
    pub recent: Vec<bool>,
    /// Trial at which the last-100 rate first reached 0.85.
    pub learned_at_trial: Option<u32>,
}

const WINDOW: usize = 200;
const MIN_TRIALS_FOR_MILESTONE: u32 = 20;

impl ChoiceStats {
    pub fn new() -> Self {
        Self {
            correct: 0,
            incorrect: 0,
            trials: 0,
            recent: Vec::with_capacity(WINDOW),
            learned_at_trial: None,
        }
    }

    pub fn record(&mut self, is_correct: bool) {
        if is_correct {
            self.correct += 1;
        } else {
            self.incorrect += 1;
        }
        self.recent.push(is_correct);
        if self.recent.len() > WINDOW {
            self.recent.remove(0);
        }
        self.trials += 1;

        if self.learned_at_trial.is_none()
            && self.trials >= MIN_TRIALS_FOR_MILESTONE
            && self.last_100_rate() >= 0.85
        {
            self.learned_at_trial = Some(self.trials);
        }
    }

    pub fn accuracy(&self) -> f32 {
        let total = self.correct + self.incorrect;
        if total == 0 {
            0.5
        } else {
            self.correct as f32 / total as f32
        }
    }

    pub fn last_100_rate(&self) -> f32 {
        if self.recent.is_empty() {
            return 0.5;
        }
        let start = self.recent.len().saturating_sub(100);
        let slice = &self.recent[start..];
        slice.iter().filter(|&&x| x).count() as f32 / slice.len() as f32
    }
}

impl Default for ChoiceStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_stats_are_at_chance() {
        let s = ChoiceStats::new();
        assert_eq!(s.accuracy(), 0.5);
        assert_eq!(s.last_100_rate(), 0.5);
    }

    #[test]
    fn learned_milestone_waits_for_enough_trials() {
        let mut s = ChoiceStats::new();
        for _ in 0..19 {
            s.record(true);
        }
        assert_eq!(s.learned_at_trial, None);
        s.record(true);
        assert_eq!(s.learned_at_trial, Some(20));
        s.record(false);
        assert_eq!(s.trials, 21);
        assert_eq!(s.incorrect, 1);
    }

    #[test]
    fn window_is_bounded() {
        let mut s = ChoiceStats::new();
        for i in 0..250 {
            s.record(i % 2 == 0);
        }
        assert_eq!(s.recent.len(), WINDOW);
        assert!((s.last_100_rate() - 0.5).abs() < 1e-6);
    }
}
