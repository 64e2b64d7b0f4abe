use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Paragraph};

use pocketseq::shared::PlaybackState;

use super::grid;
use crate::middle::DisplayState;

const HELP: &str = "space play/pause  bksp stop  0 reset  tab track  [ ] bpm  - = swing  , . echo  ; ' reverb  esc quit";

pub fn render(frame: &mut Frame, area: Rect, state: &DisplayState, blink_on: bool) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5), // lcd screen
            Constraint::Length(3), // key help
            Constraint::Min(8),    // step grid
        ])
        .split(area);

    draw_screen(frame, sections[0], state, blink_on);
    draw_help(frame, sections[1]);
    grid::draw_step_grid(
        frame,
        sections[2],
        &state.track_names,
        &state.rows,
        state.selected_track,
        state.playhead,
    );
}

fn draw_screen(frame: &mut Frame, area: Rect, state: &DisplayState, blink_on: bool) {
    // the transport label blinks while paused
    let label = match state.playback {
        PlaybackState::Paused if !blink_on => "     ",
        other => other.label(),
    };
    let color = match state.playback {
        PlaybackState::Playing => Color::Green,
        PlaybackState::Paused => Color::Yellow,
        PlaybackState::Stopped => Color::Gray,
    };
    let lines = vec![
        Line::styled(
            format!("{label:<5}  {:>5.1} bpm  swing {:.2}  step {}", state.bpm, state.swing, playhead_label(state.playhead)),
            Style::default().fg(color),
        ),
        Line::raw(format!(
            "echo {:.2}  reverb {:.2}  late notes {}",
            state.echo_level, state.reverb_level, state.late_notes
        )),
        Line::styled(state.status.as_str(), Style::default().fg(Color::DarkGray)),
    ];
    let screen = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("pocketseq"));
    frame.render_widget(screen, area);
}

fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(HELP).style(Style::default().fg(Color::DarkGray)).block(Block::default().borders(Borders::ALL));
    frame.render_widget(help, area);
}

fn playhead_label(playhead: Option<usize>) -> String {
    playhead.map(|s| format!("{:>2}", s + 1)).unwrap_or_else(|| String::from(" -"))
}
