//! Step controller for the launcher dialog

/// Panels of the launcher, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LauncherStep {
    /// Step 1: Environment, version and session name
    #[default]
    Environment,
    /// Step 2: Resource allocation
    Resources,
    /// Step 3: Storage folders to mount
    Folders,
    /// Step 4: Review and launch
    Review,
}

impl LauncherStep {
    pub const ALL: [LauncherStep; 4] = [
        LauncherStep::Environment,
        LauncherStep::Resources,
        LauncherStep::Folders,
        LauncherStep::Review,
    ];

    /// Get the step number (1-4)
    pub fn number(&self) -> usize {
        match self {
            LauncherStep::Environment => 1,
            LauncherStep::Resources => 2,
            LauncherStep::Folders => 3,
            LauncherStep::Review => 4,
        }
    }

    /// Get the step title
    pub fn title(&self) -> &'static str {
        match self {
            LauncherStep::Environment => "Environment & Name",
            LauncherStep::Resources => "Resource Allocation",
            LauncherStep::Folders => "Storage Folders",
            LauncherStep::Review => "Review & Launch",
        }
    }

    /// Step for a 1-based index
    pub fn from_number(number: usize) -> Option<LauncherStep> {
        Self::ALL.get(number.checked_sub(1)?).copied()
    }
}

/// Current position within an N-step wizard. `1 <= current <= total` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardState {
    current: usize,
    total: usize,
}

impl Default for WizardState {
    fn default() -> Self {
        Self::new(LauncherStep::ALL.len())
    }
}

impl WizardState {
    /// A wizard with at least one step, positioned on the first
    pub fn new(total: usize) -> Self {
        Self {
            current: 1,
            total: total.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_first(&self) -> bool {
        self.current == 1
    }

    pub fn is_last(&self) -> bool {
        self.current == self.total
    }

    /// The "previous" control is hidden on the first step
    pub fn show_prev(&self) -> bool {
        !self.is_first()
    }

    /// The "next" control is hidden on the last step
    pub fn show_next(&self) -> bool {
        !self.is_last()
    }

    /// Move by `delta` steps. Forward moves are refused while the current
    /// step is invalid; the result is clamped to `[1, total]`.
    /// Returns whether the position changed.
    pub fn move_progress(&mut self, delta: isize, step_valid: bool) -> bool {
        if delta > 0 && !step_valid {
            return false;
        }
        let target = (self.current as isize)
            .saturating_add(delta)
            .clamp(1, self.total as isize) as usize;
        let changed = target != self.current;
        self.current = target;
        changed
    }

    pub fn reset(&mut self) {
        self.current = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_at_first_step_stays() {
        let mut wizard = WizardState::new(4);
        assert!(!wizard.move_progress(-1, true));
        assert_eq!(wizard.current(), 1);
        assert!(!wizard.show_prev());
        assert!(wizard.show_next());
    }

    #[test]
    fn test_forward_blocked_when_invalid() {
        let mut wizard = WizardState::new(4);
        assert!(!wizard.move_progress(1, false));
        assert_eq!(wizard.current(), 1);
        assert!(wizard.move_progress(1, true));
        assert_eq!(wizard.current(), 2);
        // Going back never needs a valid step
        assert!(wizard.move_progress(-1, false));
        assert_eq!(wizard.current(), 1);
    }

    #[test]
    fn test_clamped_to_range() {
        let mut wizard = WizardState::new(4);
        wizard.move_progress(10, true);
        assert_eq!(wizard.current(), 4);
        assert!(wizard.is_last());
        assert!(!wizard.show_next());
        assert!(!wizard.move_progress(1, true));

        wizard.move_progress(isize::MIN, true);
        assert_eq!(wizard.current(), 1);

        for delta in [-3, 2, 7, -1, 0, 1, -9, 3] {
            wizard.move_progress(delta, delta % 2 == 0);
            assert!((1..=wizard.total()).contains(&wizard.current()));
        }
    }

    #[test]
    fn test_reset_and_degenerate_total() {
        let mut wizard = WizardState::new(4);
        wizard.move_progress(2, true);
        wizard.reset();
        assert_eq!(wizard.current(), 1);

        let single = WizardState::new(0);
        assert_eq!(single.total(), 1);
        assert!(single.is_first() && single.is_last());
    }

    #[test]
    fn test_step_numbers() {
        for step in LauncherStep::ALL {
            assert_eq!(LauncherStep::from_number(step.number()), Some(step));
        }
        assert_eq!(LauncherStep::from_number(0), None);
        assert_eq!(LauncherStep::from_number(5), None);
    }
}
