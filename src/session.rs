//! Running statistics for one capture session.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::analyzer::Emotion;

/// One analyzed frame: the recorded label, the full score mapping, and when
/// it was captured.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub emotion: Emotion,
    pub scores: Vec<(Emotion, f32)>,
    pub captured_at: DateTime<Local>,
}

/// Owned by the session loop and passed explicitly; mutated once per
/// successfully analyzed frame and replaced wholesale on reset.
#[derive(Debug)]
pub struct SessionState {
    counts: HashMap<Emotion, u64>,
    frame_count: u64,
    started_at: DateTime<Local>,
    started: Instant,
    history: Vec<FrameRecord>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            frame_count: 0,
            started_at: Local::now(),
            started: Instant::now(),
            history: Vec::new(),
        }
    }

    /// Fold one analyzed frame into the aggregates.
    pub fn record(&mut self, emotion: Emotion, scores: Vec<(Emotion, f32)>) {
        *self.counts.entry(emotion).or_insert(0) += 1;
        self.frame_count += 1;
        self.history.push(FrameRecord {
            emotion,
            scores,
            captured_at: Local::now(),
        });
    }

    /// Discard everything and start over, including the start time.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn counts(&self) -> &HashMap<Emotion, u64> {
        &self.counts
    }

    pub fn history(&self) -> &[FrameRecord] {
        &self.history
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Share of analyzed frames per label present, largest first (label
    /// order breaks ties). Empty when no frames were analyzed.
    pub fn percentages(&self) -> Vec<(Emotion, f64)> {
        if self.frame_count == 0 {
            return Vec::new();
        }
        let total = self.frame_count as f64;
        let mut shares: Vec<(Emotion, f64)> = Emotion::ALL
            .into_iter()
            .filter_map(|emotion| {
                self.counts
                    .get(&emotion)
                    .map(|count| (emotion, 100.0 * *count as f64 / total))
            })
            .collect();
        shares.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        shares
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_scores(dominant: Emotion) -> Vec<(Emotion, f32)> {
        Emotion::ALL
            .into_iter()
            .map(|emotion| (emotion, if emotion == dominant { 94.0 } else { 1.0 }))
            .collect()
    }

    #[test]
    fn tallies_match_recorded_labels() {
        let mut session = SessionState::new();
        for emotion in [
            Emotion::Happy,
            Emotion::Happy,
            Emotion::Sad,
            Emotion::Neutral,
        ] {
            session.record(emotion, full_scores(emotion));
        }

        assert_eq!(session.frame_count(), 4);
        assert_eq!(session.counts()[&Emotion::Happy], 2);
        assert_eq!(session.counts()[&Emotion::Sad], 1);
        assert_eq!(session.counts()[&Emotion::Neutral], 1);

        let shares = session.percentages();
        assert_eq!(shares[0], (Emotion::Happy, 50.0));
        assert!(shares.contains(&(Emotion::Sad, 25.0)));
        assert!(shares.contains(&(Emotion::Neutral, 25.0)));
    }

    #[test]
    fn percentages_sum_to_one_hundred() {
        let mut session = SessionState::new();
        for (emotion, n) in [(Emotion::Angry, 3), (Emotion::Fear, 2), (Emotion::Happy, 9)] {
            for _ in 0..n {
                session.record(emotion, full_scores(emotion));
            }
        }
        let total: f64 = session.percentages().iter().map(|(_, p)| p).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_session_has_no_percentages() {
        let session = SessionState::new();
        assert_eq!(session.frame_count(), 0);
        assert!(session.percentages().is_empty());
    }

    #[test]
    fn reset_discards_all_state() {
        let mut session = SessionState::new();
        session.record(Emotion::Surprise, full_scores(Emotion::Surprise));
        session.record(Emotion::Surprise, full_scores(Emotion::Surprise));

        session.reset();

        assert_eq!(session.frame_count(), 0);
        assert!(session.counts().is_empty());
        assert!(session.history().is_empty());
    }

    #[test]
    fn history_preserves_frame_order() {
        let mut session = SessionState::new();
        session.record(Emotion::Sad, full_scores(Emotion::Sad));
        session.record(Emotion::Happy, full_scores(Emotion::Happy));

        let labels: Vec<Emotion> = session.history().iter().map(|r| r.emotion).collect();
        assert_eq!(labels, vec![Emotion::Sad, Emotion::Happy]);

        let first = &session.history()[0];
        assert!(first.captured_at >= session.started_at());
        assert_eq!(first.scores.len(), Emotion::ALL.len());
    }
}
