//! State tracker: the broke/not-broke flag and its transition edges.

use crate::classify::HealthVerdict;

/// Edge between two consecutive cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    BecameBroke,
    BecameOk,
}

/// Compute the new broke flag and the edge for one verdict.
///
/// Soft degradation counts as broke: alerts track functional availability,
/// not failure category.
pub fn update(previous_broke: bool, verdict: &HealthVerdict) -> (bool, Transition) {
    let new_broke = !verdict.is_ok();
    let transition = match (previous_broke, new_broke) {
        (false, true) => Transition::BecameBroke,
        (true, false) => Transition::BecameOk,
        _ => Transition::None,
    };
    (new_broke, transition)
}

/// Per-target state, owned by exactly one monitor task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorState {
    is_broke: bool,
}

impl MonitorState {
    /// State carried over from a previous run of the same monitor.
    pub fn restored(is_broke: bool) -> Self {
        Self { is_broke }
    }

    pub fn is_broke(&self) -> bool {
        self.is_broke
    }

    /// Fold a verdict into the state and return the edge it produced.
    pub fn apply(&mut self, verdict: &HealthVerdict) -> Transition {
        let (new_broke, transition) = update(self.is_broke, verdict);
        self.is_broke = new_broke;
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soft() -> HealthVerdict {
        HealthVerdict::SoftDegraded {
            reason: "no global auth".to_string(),
        }
    }

    fn hard() -> HealthVerdict {
        HealthVerdict::HardFailure {
            diagnostics: "timeout".to_string(),
        }
    }

    #[test]
    fn starts_not_broke() {
        assert!(!MonitorState::default().is_broke());
    }

    #[test]
    fn update_table() {
        assert_eq!(update(false, &HealthVerdict::Ok), (false, Transition::None));
        assert_eq!(update(false, &soft()), (true, Transition::BecameBroke));
        assert_eq!(update(false, &hard()), (true, Transition::BecameBroke));
        assert_eq!(update(true, &HealthVerdict::Ok), (false, Transition::BecameOk));
        assert_eq!(update(true, &soft()), (true, Transition::None));
        assert_eq!(update(true, &hard()), (true, Transition::None));
    }

    #[test]
    fn one_edge_per_run_of_failures() {
        let verdicts = [
            HealthVerdict::Ok,
            hard(),
            soft(),
            hard(),
            HealthVerdict::Ok,
            HealthVerdict::Ok,
            soft(),
            HealthVerdict::Ok,
        ];

        let mut state = MonitorState::default();
        let edges: Vec<_> = verdicts.iter().map(|v| state.apply(v)).collect();

        let broke = edges.iter().filter(|t| **t == Transition::BecameBroke).count();
        let ok = edges.iter().filter(|t| **t == Transition::BecameOk).count();
        assert_eq!(broke, 2);
        assert_eq!(ok, 2);
        assert_eq!(edges[1], Transition::BecameBroke);
        assert_eq!(edges[4], Transition::BecameOk);
        assert!(!state.is_broke());
    }

    #[test]
    fn restored_state_suppresses_repeat_alert() {
        let mut state = MonitorState::restored(true);
        assert_eq!(state.apply(&hard()), Transition::None);
        assert_eq!(state.apply(&HealthVerdict::Ok), Transition::BecameOk);
    }
}
