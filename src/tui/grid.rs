use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Span;
use ratatui::widgets::{Block, Borders, Paragraph};

use pocketseq::pipeline::kit::{GRID_FULL, GRID_OFF};

const LABEL_WIDTH: u16 = 8;

// one row per track, one cell per step; the playhead column is highlighted
pub fn draw_step_grid(
    frame: &mut Frame,
    area: Rect,
    names: &[&str],
    rows: &[Vec<u8>],
    selected: usize,
    playhead: Option<usize>,
) {
    if rows.is_empty() {
        return;
    }
    let row_areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, rows.len() as u32); rows.len()])
        .split(area);

    for (row_idx, (row_area, cells)) in row_areas.iter().zip(rows).enumerate() {
        let split = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(LABEL_WIDTH), Constraint::Min(0)])
            .split(*row_area);

        let mut label_style = Style::default().fg(Color::Gray);
        if row_idx == selected {
            label_style = label_style.fg(Color::LightMagenta).add_modifier(Modifier::BOLD);
        }
        let name = names.get(row_idx).copied().unwrap_or("?");
        frame.render_widget(Paragraph::new(Span::styled(name, label_style)), split[0]);

        if cells.is_empty() {
            continue;
        }
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Ratio(1, cells.len() as u32); cells.len()])
            .split(split[1]);

        for (step, (cell_area, value)) in cols.iter().zip(cells).enumerate() {
            let bg = match *value {
                GRID_OFF => Color::Reset,
                GRID_FULL => Color::Magenta,
                _ => Color::DarkGray,
            };
            let mut style = Style::default().fg(Color::DarkGray).bg(bg);
            if playhead == Some(step) {
                style = style.fg(Color::Yellow);
            }
            let block = Block::default().borders(Borders::ALL).border_style(style).style(style);
            frame.render_widget(block, *cell_area);
        }
    }
}
