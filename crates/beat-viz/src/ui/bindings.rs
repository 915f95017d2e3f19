//! Keyboard bindings and input handling.
//!
//! Centralizes all keyboard shortcuts and key mapping logic.

use nannou::prelude::*;

/// Volume change per Up/Down press
pub const VOLUME_STEP: f32 = 0.1;

/// Actions that can be triggered by key presses
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // App-level
    Quit,

    // Sources
    UseFile,
    UseMicrophone,
    UseKeyboard,
    TogglePlayback,
    VolumeUp,
    VolumeDown,

    // Visualization
    NextVisualization,
    NextTheme,

    // Synth keyboard
    OctaveDown,
    OctaveUp,
    NoteOn(&'static str, i32),
}

/// Piano row of the keyboard: note name and octave offset from the current octave
pub fn key_to_note(key: Key) -> Option<(&'static str, i32)> {
    let note = match key {
        Key::A => ("C", 0),
        Key::W => ("C#", 0),
        Key::S => ("D", 0),
        Key::E => ("D#", 0),
        Key::D => ("E", 0),
        Key::F => ("F", 0),
        Key::T => ("F#", 0),
        Key::G => ("G", 0),
        Key::Y => ("G#", 0),
        Key::H => ("A", 0),
        Key::U => ("A#", 0),
        Key::J => ("B", 0),
        Key::K => ("C", 1),
        _ => return None,
    };
    Some(note)
}

/// Parse a key press into an action. Note keys only apply while the
/// keyboard source is attached.
pub fn parse_key(key: Key, keyboard_active: bool) -> Option<Action> {
    // Global quit key
    if key == Key::Q {
        return Some(Action::Quit);
    }

    if keyboard_active {
        if let Some((name, offset)) = key_to_note(key) {
            return Some(Action::NoteOn(name, offset));
        }
    }

    match key {
        Key::Key1 => Some(Action::UseFile),
        Key::Key2 => Some(Action::UseMicrophone),
        Key::Key3 => Some(Action::UseKeyboard),
        Key::Space => Some(Action::TogglePlayback),
        Key::Up => Some(Action::VolumeUp),
        Key::Down => Some(Action::VolumeDown),
        Key::Tab => Some(Action::NextVisualization),
        Key::C => Some(Action::NextTheme),
        Key::Z => Some(Action::OctaveDown),
        Key::X => Some(Action::OctaveUp),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_always_wins() {
        assert_eq!(parse_key(Key::Q, true), Some(Action::Quit));
        assert_eq!(parse_key(Key::Q, false), Some(Action::Quit));
    }

    #[test]
    fn test_note_keys_need_keyboard_source() {
        assert_eq!(parse_key(Key::A, true), Some(Action::NoteOn("C", 0)));
        assert_eq!(parse_key(Key::K, true), Some(Action::NoteOn("C", 1)));
        assert_eq!(parse_key(Key::A, false), None);
    }

    #[test]
    fn test_normal_keys() {
        assert_eq!(parse_key(Key::Tab, false), Some(Action::NextVisualization));
        assert_eq!(parse_key(Key::Key3, true), Some(Action::UseKeyboard));
        assert_eq!(parse_key(Key::Z, true), Some(Action::OctaveDown));
        assert_eq!(parse_key(Key::B, false), None);
    }
}
