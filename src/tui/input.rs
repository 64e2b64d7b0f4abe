use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};

use super::mode::TuiState;
use crate::middle::InputEvent;

// poll for one key press and resolve it into input events for the middle layer
pub fn poll_input(timeout: Duration, ts: &TuiState) -> anyhow::Result<Vec<InputEvent>> {
    if !event::poll(timeout)? {
        return Ok(vec![]);
    }

    if let Event::Key(key) = event::read()? {
        if key.kind != KeyEventKind::Press {
            return Ok(vec![]);
        }
        return Ok(handle_key(key.code, ts));
    }
    Ok(vec![])
}

fn handle_key(code: KeyCode, ts: &TuiState) -> Vec<InputEvent> {
    match code {
        KeyCode::Esc => vec![InputEvent::Quit],
        KeyCode::Char(' ') if ts.playing => vec![InputEvent::Pause],
        KeyCode::Char(' ') => vec![InputEvent::Play],
        KeyCode::Backspace => vec![InputEvent::Stop],
        KeyCode::Char('0') => vec![InputEvent::ResetToStart],
        KeyCode::Tab if ts.track_count > 0 => vec![InputEvent::NextTrack],

        KeyCode::Char('[') => vec![InputEvent::bpm(false)],
        KeyCode::Char(']') => vec![InputEvent::bpm(true)],
        KeyCode::Char('-') => vec![InputEvent::swing(false)],
        KeyCode::Char('=') => vec![InputEvent::swing(true)],
        KeyCode::Char(',') => vec![InputEvent::echo(false)],
        KeyCode::Char('.') => vec![InputEvent::echo(true)],
        KeyCode::Char(';') => vec![InputEvent::reverb(false)],
        KeyCode::Char('\'') => vec![InputEvent::reverb(true)],

        // anything else on the 4x4 block toggles a step of the selected track
        KeyCode::Char(c) => char_to_step(c).map(InputEvent::ToggleStep).into_iter().collect(),

        _ => vec![],
    }
}

// keyboard 4x4 block, read left to right, top to bottom
fn char_to_step(c: char) -> Option<u8> {
    let idx = match c {
        '1' => 0, '2' => 1, '3' => 2, '4' => 3,
        'q' => 4, 'w' => 5, 'e' => 6, 'r' => 7,
        'a' => 8, 's' => 9, 'd' => 10, 'f' => 11,
        'z' => 12, 'x' => 13, 'c' => 14, 'v' => 15,
        _ => return None,
    };
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_depends_on_transport() {
        let mut ts = TuiState { playing: false, track_count: 4 };
        assert_eq!(handle_key(KeyCode::Char(' '), &ts), vec![InputEvent::Play]);
        ts.playing = true;
        assert_eq!(handle_key(KeyCode::Char(' '), &ts), vec![InputEvent::Pause]);
    }

    #[test]
    fn pad_keys_toggle_steps() {
        let ts = TuiState::default();
        assert_eq!(handle_key(KeyCode::Char('q'), &ts), vec![InputEvent::ToggleStep(4)]);
        assert_eq!(handle_key(KeyCode::Char('v'), &ts), vec![InputEvent::ToggleStep(15)]);
        assert!(handle_key(KeyCode::Char('p'), &ts).is_empty());
        assert_eq!(handle_key(KeyCode::Char('0'), &ts), vec![InputEvent::ResetToStart]);
    }
}
