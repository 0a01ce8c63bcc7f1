//! Foot contact classification with hysteresis.
//!
//! Each foot is classified from its vertical ground reaction force against
//! two thresholds. A force in the band between them keeps whatever the foot
//! was doing before, so a force hovering around a single threshold cannot
//! make the leg odometry source flicker between feet.

use crate::{
    config::GrfBounds,
    foot::{Feet, Foot},
};

/// Settled contact of a foot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum Contact {
    /// The foot is in the air.
    #[default]
    Swing,
    /// The foot is on the ground and bearing load.
    Stance,
}

/// Per-foot contact state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ContactState {
    /// Force below the lower bound.
    #[default]
    Swing,
    /// Force at or above the upper bound.
    Stance,
    /// Force inside the hysteresis band, holding the contact it entered with.
    Uncertain(Contact),
}

impl ContactState {
    /// The contact this state stands for, resolving [`ContactState::Uncertain`]
    /// to the contact it holds.
    #[must_use]
    pub const fn contact(self) -> Contact {
        match self {
            Self::Swing => Contact::Swing,
            Self::Stance => Contact::Stance,
            Self::Uncertain(held) => held,
        }
    }

    /// Whether the foot can be trusted as a leg odometry anchor.
    #[must_use]
    pub const fn is_stance(self) -> bool {
        matches!(self.contact(), Contact::Stance)
    }

    /// Next state for a vertical force of `force` newtons.
    ///
    /// A force equal to the upper bound counts as stance, and a force equal
    /// to the lower bound is inside the band. NaN compares false against both
    /// bounds and therefore holds the current contact.
    #[must_use]
    pub fn classify(self, force: f64, bounds: &GrfBounds) -> Self {
        if force >= bounds.upper {
            Self::Stance
        } else if force < bounds.lower {
            Self::Swing
        } else {
            Self::Uncertain(self.contact())
        }
    }
}

/// Which feet are supporting the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum SupportPhase {
    /// No foot in stance.
    #[default]
    Flight,
    /// Exactly one foot in stance.
    Single(Foot),
    /// Both feet in stance.
    Double,
}

impl SupportPhase {
    /// Phase implied by the per-foot states.
    #[must_use]
    pub fn from_states(states: &Feet<ContactState>) -> Self {
        match (states.left.is_stance(), states.right.is_stance()) {
            (false, false) => Self::Flight,
            (true, false) => Self::Single(Foot::Left),
            (false, true) => Self::Single(Foot::Right),
            (true, true) => Self::Double,
        }
    }

    /// Whether `foot` is supporting the robot in this phase.
    #[must_use]
    pub fn supports(self, foot: Foot) -> bool {
        match self {
            Self::Flight => false,
            Self::Single(support) => support == foot,
            Self::Double => true,
        }
    }

    /// Supporting feet, left first.
    pub fn stance_feet(self) -> impl Iterator<Item = Foot> {
        Foot::ALL.into_iter().filter(move |&foot| self.supports(foot))
    }
}

/// Contact states of both feet, with one cycle of history.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ContactTracker {
    bounds: GrfBounds,
    states: Feet<ContactState>,
    previous_states: Feet<ContactState>,
    phase: SupportPhase,
    previous_phase: SupportPhase,
}

impl ContactTracker {
    /// Creates a tracker with both feet in swing.
    #[must_use]
    pub fn new(bounds: GrfBounds) -> Self {
        Self {
            bounds,
            states: Feet::default(),
            previous_states: Feet::default(),
            phase: SupportPhase::Flight,
            previous_phase: SupportPhase::Flight,
        }
    }

    /// Classifies both feet from their vertical forces.
    ///
    /// Pass `None` when no force estimate is available this cycle; the
    /// classification is then held.
    pub fn update(&mut self, vertical_force: Option<Feet<f64>>) -> SupportPhase {
        self.previous_states = self.states;
        self.previous_phase = self.phase;

        if let Some(force) = vertical_force {
            for foot in Foot::ALL {
                self.states[foot] = self.states[foot].classify(force[foot], &self.bounds);
            }
            self.phase = SupportPhase::from_states(&self.states);
        }

        if self.phase != self.previous_phase {
            log::debug!(
                "support phase changed from {:?} to {:?}",
                self.previous_phase,
                self.phase
            );
        }
        self.phase
    }

    /// Hysteresis thresholds in use.
    #[must_use]
    pub fn bounds(&self) -> &GrfBounds {
        &self.bounds
    }

    /// Current per-foot states.
    #[must_use]
    pub fn states(&self) -> &Feet<ContactState> {
        &self.states
    }

    /// Per-foot states of the previous cycle.
    #[must_use]
    pub fn previous_states(&self) -> &Feet<ContactState> {
        &self.previous_states
    }

    /// Current support phase.
    #[must_use]
    pub fn phase(&self) -> SupportPhase {
        self.phase
    }

    /// Support phase of the previous cycle.
    #[must_use]
    pub fn previous_phase(&self) -> SupportPhase {
        self.previous_phase
    }

    /// Whether the set of supporting feet changed this cycle.
    #[must_use]
    pub fn phase_changed(&self) -> bool {
        self.phase != self.previous_phase
    }
}
