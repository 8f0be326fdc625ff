//! Global keyboard shortcuts, independent of any terminal library.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Mac,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Mac
        } else {
            Platform::Other
        }
    }

    /// Label for the primary modifier in hint text.
    pub fn primary_label(&self) -> &'static str {
        match self {
            Platform::Mac => "⌘",
            Platform::Other => "Ctrl",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Escape,
    Other,
}

/// A key press with its modifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub key: Key,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl KeyChord {
    pub fn plain(key: Key) -> Self {
        Self {
            key,
            ctrl: false,
            meta: false,
            shift: false,
        }
    }

    fn primary(&self, platform: Platform) -> bool {
        match platform {
            Platform::Mac => self.meta,
            Platform::Other => self.ctrl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    FocusInput,
    NewChat,
    Abort,
}

/// Map a chord to the action it triggers, if any.
pub fn resolve(chord: &KeyChord, platform: Platform) -> Option<Shortcut> {
    match chord.key {
        Key::Escape => Some(Shortcut::Abort),
        Key::Char('k') if chord.primary(platform) && !chord.shift => Some(Shortcut::FocusInput),
        Key::Char('n' | 'N') if chord.primary(platform) && chord.shift => Some(Shortcut::NewChat),
        _ => None,
    }
}

/// Hint lines for the shortcuts, e.g. `("Ctrl+K", "focus input")`.
pub fn hints(platform: Platform) -> [(String, &'static str); 3] {
    let primary = platform.primary_label();
    [
        (format!("{primary}+K"), "focus input"),
        (format!("{primary}+Shift+N"), "new chat"),
        ("Esc".to_string(), "stop"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chord(c: char, ctrl: bool, meta: bool, shift: bool) -> KeyChord {
        KeyChord {
            key: Key::Char(c),
            ctrl,
            meta,
            shift,
        }
    }

    #[test]
    fn primary_modifier_depends_on_platform() {
        assert_eq!(
            resolve(&chord('k', true, false, false), Platform::Other),
            Some(Shortcut::FocusInput)
        );
        assert_eq!(resolve(&chord('k', true, false, false), Platform::Mac), None);
        assert_eq!(
            resolve(&chord('k', false, true, false), Platform::Mac),
            Some(Shortcut::FocusInput)
        );
    }

    #[test]
    fn new_chat_needs_shift_and_accepts_either_case() {
        assert_eq!(resolve(&chord('n', true, false, false), Platform::Other), None);
        assert_eq!(
            resolve(&chord('n', true, false, true), Platform::Other),
            Some(Shortcut::NewChat)
        );
        assert_eq!(
            resolve(&chord('N', true, false, true), Platform::Other),
            Some(Shortcut::NewChat)
        );
    }

    #[test]
    fn escape_aborts_regardless_of_modifiers() {
        assert_eq!(
            resolve(&KeyChord::plain(Key::Escape), Platform::Other),
            Some(Shortcut::Abort)
        );
        assert_eq!(resolve(&KeyChord::plain(Key::Char('k')), Platform::Other), None);
    }

    #[test]
    fn hints_use_platform_label() {
        assert_eq!(hints(Platform::Mac)[0].0, "⌘+K");
        assert_eq!(hints(Platform::Other)[1].0, "Ctrl+Shift+N");
    }
}
