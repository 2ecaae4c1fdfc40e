use serde::Serialize;
use shared::domain::Mode;

/// When a validated step patch is written to the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStrategy {
    /// Patches accumulate locally; the terminal step inserts the whole draft.
    DeferToTerminal,
    /// Every step upserts the full merged draft under the existing record id.
    WriteThrough,
    ReadOnly,
}

/// Per-mode behaviour, resolved once when a session is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModePolicy {
    pub mode: Mode,
    pub gates_navigation: bool,
    pub save: SaveStrategy,
    pub requires_record: bool,
}

impl ModePolicy {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Create => Self {
                mode,
                gates_navigation: true,
                save: SaveStrategy::DeferToTerminal,
                requires_record: false,
            },
            Mode::Edit => Self {
                mode,
                gates_navigation: false,
                save: SaveStrategy::WriteThrough,
                requires_record: true,
            },
            Mode::View => Self {
                mode,
                gates_navigation: false,
                save: SaveStrategy::ReadOnly,
                requires_record: true,
            },
        }
    }

    pub fn allows_mutation(&self) -> bool {
        self.save != SaveStrategy::ReadOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_create_gates_navigation() {
        assert!(ModePolicy::for_mode(Mode::Create).gates_navigation);
        assert!(!ModePolicy::for_mode(Mode::Edit).gates_navigation);
        assert!(!ModePolicy::for_mode(Mode::View).gates_navigation);
    }

    #[test]
    fn view_is_the_only_read_only_mode() {
        assert!(ModePolicy::for_mode(Mode::Create).allows_mutation());
        assert!(ModePolicy::for_mode(Mode::Edit).allows_mutation());
        let view = ModePolicy::for_mode(Mode::View);
        assert!(!view.allows_mutation());
        assert!(view.requires_record);
        assert_eq!(view.save, SaveStrategy::ReadOnly);
    }
}
