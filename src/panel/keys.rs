use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use super::TaskPanel;
use crate::remote::RemoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Close,
    OpenDeleteConfirmation,
    Ignored,
}

fn classify(key: KeyEvent, has_record: bool, confirm_open: bool) -> KeyOutcome {
    if key.kind == KeyEventKind::Release || !has_record {
        return KeyOutcome::Ignored;
    }
    match key.code {
        // Escape belongs to the confirmation dialog while it is up.
        KeyCode::Esc if confirm_open => KeyOutcome::Ignored,
        KeyCode::Esc => KeyOutcome::Close,
        KeyCode::Backspace
            if key
                .modifiers
                .intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER) =>
        {
            KeyOutcome::OpenDeleteConfirmation
        }
        _ => KeyOutcome::Ignored,
    }
}

impl<R: RemoteStore> TaskPanel<R> {
    /// Panel-level shortcuts. Inert until the panel has a backing record.
    pub fn handle_key(&mut self, key: KeyEvent) -> KeyOutcome {
        let has_record = self.record_id().is_some();
        let Some(session) = self.session.as_mut() else {
            return KeyOutcome::Ignored;
        };

        let outcome = classify(key, has_record, session.confirm_delete_open);
        if outcome == KeyOutcome::OpenDeleteConfirmation {
            session.confirm_delete_open = true;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_escape_closes_with_record() {
        assert_eq!(
            classify(key(KeyCode::Esc, KeyModifiers::NONE), true, false),
            KeyOutcome::Close
        );
    }

    #[test]
    fn test_escape_ignored_while_confirming() {
        assert_eq!(
            classify(key(KeyCode::Esc, KeyModifiers::NONE), true, true),
            KeyOutcome::Ignored
        );
    }

    #[test]
    fn test_delete_chord_accepts_ctrl_and_super() {
        for modifiers in [KeyModifiers::CONTROL, KeyModifiers::SUPER] {
            assert_eq!(
                classify(key(KeyCode::Backspace, modifiers), true, false),
                KeyOutcome::OpenDeleteConfirmation
            );
        }
        assert_eq!(
            classify(key(KeyCode::Backspace, KeyModifiers::NONE), true, false),
            KeyOutcome::Ignored
        );
    }

    #[test]
    fn test_shortcuts_inert_without_record() {
        assert_eq!(
            classify(key(KeyCode::Esc, KeyModifiers::NONE), false, false),
            KeyOutcome::Ignored
        );
        assert_eq!(
            classify(key(KeyCode::Backspace, KeyModifiers::CONTROL), false, false),
            KeyOutcome::Ignored
        );
    }

    #[test]
    fn test_key_release_ignored() {
        let mut release = key(KeyCode::Esc, KeyModifiers::NONE);
        release.kind = KeyEventKind::Release;
        assert_eq!(classify(release, true, false), KeyOutcome::Ignored);
    }
}
