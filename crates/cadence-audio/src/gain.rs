//! Master, category and mute state.
//!
//! Callers may change gains at any time; changes go onto a pending queue
//! and are only applied when the engine commits them at the top of `idle`,
//! so the device sees at most one internal gain update per frame.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// What kind of sound a source plays. Each category has its own secondary
/// gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCategory {
    /// Uncategorised.
    #[default]
    None,
    /// World sound effects.
    Sfx,
    /// Interface sounds.
    Ui,
    /// Ambient loops.
    Ambient,
}

impl AudioCategory {
    /// Number of categories.
    pub const COUNT: usize = 4;

    /// Every category, in index order.
    pub const ALL: [Self; Self::COUNT] = [Self::None, Self::Sfx, Self::Ui, Self::Ambient];

    /// Slot in per-category tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::None => 0,
            Self::Sfx => 1,
            Self::Ui => 2,
            Self::Ambient => 3,
        }
    }
}

/// One consistent set of gain settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainLevels {
    master: f32,
    secondary: [f32; AudioCategory::COUNT],
    muted: bool,
}

impl Default for GainLevels {
    fn default() -> Self {
        Self {
            master: 1.0,
            secondary: [1.0; AudioCategory::COUNT],
            muted: false,
        }
    }
}

impl GainLevels {
    /// Master gain.
    #[must_use]
    pub const fn master(&self) -> f32 {
        self.master
    }

    /// Secondary gain for `category`.
    #[must_use]
    pub const fn secondary(&self, category: AudioCategory) -> f32 {
        self.secondary[category.index()]
    }

    /// Whether output is muted.
    #[must_use]
    pub const fn muted(&self) -> bool {
        self.muted
    }

    /// Gain applied to the whole device: zero while muted.
    #[must_use]
    pub fn internal_gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.master
        }
    }

    fn apply(&mut self, change: GainChange) {
        match change {
            GainChange::Master(gain) => self.master = gain.clamp(0.0, 1.0),
            GainChange::Secondary(category, gain) => {
                self.secondary[category.index()] = gain.clamp(0.0, 1.0);
            },
            GainChange::Muted(muted) => self.muted = muted,
        }
    }
}

/// A single requested change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainChange {
    /// New master gain.
    Master(f32),
    /// New secondary gain for one category.
    Secondary(AudioCategory, f32),
    /// Mute on or off.
    Muted(bool),
}

/// Requested vs. applied gains plus the changes in between.
#[derive(Debug, Clone, Default)]
pub struct GainState {
    requested: GainLevels,
    applied: GainLevels,
    pending: VecDeque<GainChange>,
}

impl GainState {
    /// Starts with `levels` already applied.
    #[must_use]
    pub fn new(levels: GainLevels) -> Self {
        Self {
            requested: levels,
            applied: levels,
            pending: VecDeque::new(),
        }
    }

    /// Builds levels from explicit values.
    #[must_use]
    pub fn levels(master: f32, secondary: [f32; AudioCategory::COUNT], muted: bool) -> GainLevels {
        let mut levels = GainLevels::default();
        levels.apply(GainChange::Master(master));
        for category in AudioCategory::ALL {
            levels.apply(GainChange::Secondary(category, secondary[category.index()]));
        }
        levels.muted = muted;
        levels
    }

    /// Queues a change. Getters on [`Self::requested`] see it immediately.
    pub fn push(&mut self, change: GainChange) {
        self.requested.apply(change);
        self.pending.push_back(change);
    }

    /// What callers have asked for.
    #[must_use]
    pub const fn requested(&self) -> &GainLevels {
        &self.requested
    }

    /// What the device and channels currently use.
    #[must_use]
    pub const fn applied(&self) -> &GainLevels {
        &self.applied
    }

    /// Number of changes waiting for the next commit.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Applies every pending change. Returns the new internal gain if it
    /// differs from before.
    pub fn commit(&mut self) -> Option<f32> {
        if self.pending.is_empty() {
            return None;
        }
        let before = self.applied.internal_gain();
        while let Some(change) = self.pending.pop_front() {
            self.applied.apply(change);
        }
        let after = self.applied.internal_gain();
        ((after - before).abs() > f32::EPSILON).then_some(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_deferred_until_commit() {
        let mut gains = GainState::default();
        gains.push(GainChange::Master(0.5));
        assert!((gains.requested().master() - 0.5).abs() < f32::EPSILON);
        assert!((gains.applied().master() - 1.0).abs() < f32::EPSILON);

        assert_eq!(gains.commit(), Some(0.5));
        assert!((gains.applied().master() - 0.5).abs() < f32::EPSILON);
        assert_eq!(gains.pending(), 0);
    }

    #[test]
    fn test_commit_coalesces() {
        let mut gains = GainState::default();
        gains.push(GainChange::Master(0.2));
        gains.push(GainChange::Master(0.7));
        gains.push(GainChange::Secondary(AudioCategory::Ui, 0.3));
        assert_eq!(gains.pending(), 3);
        assert_eq!(gains.commit(), Some(0.7));
        assert_eq!(gains.commit(), None);
        assert!((gains.applied().secondary(AudioCategory::Ui) - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_secondary_only_leaves_internal_gain() {
        let mut gains = GainState::default();
        gains.push(GainChange::Secondary(AudioCategory::Sfx, 0.1));
        assert_eq!(gains.commit(), None);
        assert!((gains.applied().secondary(AudioCategory::Sfx) - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_mute_zeroes_internal_gain() {
        let mut gains = GainState::default();
        gains.push(GainChange::Muted(true));
        assert_eq!(gains.commit(), Some(0.0));
        assert!(gains.applied().muted());
        gains.push(GainChange::Muted(false));
        assert_eq!(gains.commit(), Some(1.0));
    }

    #[test]
    fn test_gains_clamped() {
        let levels = GainState::levels(4.0, [-1.0, 0.5, 2.0, 1.0], false);
        assert!((levels.master() - 1.0).abs() < f32::EPSILON);
        assert!(levels.secondary(AudioCategory::None).abs() < f32::EPSILON);
        assert!((levels.secondary(AudioCategory::Ui) - 1.0).abs() < f32::EPSILON);
    }
}
