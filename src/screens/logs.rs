/// Log viewer for the selected container

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use std::collections::VecDeque;

use cdock::core::LogStreamer;

/// Scrollback kept in the viewer
const MAX_LINES: usize = 2000;

/// Scrollback plus a scroll position counted from the newest line
#[derive(Debug, Default)]
pub struct LogLines {
    lines: VecDeque<String>,
    /// 0 follows new output
    scroll: usize,
}

impl LogLines {
    pub fn append(&mut self, lines: Vec<String>) {
        let added = lines.len();
        for line in lines {
            if self.lines.len() == MAX_LINES {
                self.lines.pop_front();
            }
            self.lines.push_back(line);
        }

        // Keep a scrolled view on the same lines
        if self.scroll > 0 {
            self.scroll = (self.scroll + added).min(self.max_scroll());
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_following(&self) -> bool {
        self.scroll == 0
    }

    pub fn scroll_up(&mut self, by: usize) {
        self.scroll = (self.scroll + by).min(self.max_scroll());
    }

    pub fn scroll_down(&mut self, by: usize) {
        self.scroll = self.scroll.saturating_sub(by);
    }

    pub fn follow(&mut self) {
        self.scroll = 0;
    }

    /// The `height` lines ending `scroll` lines before the newest
    pub fn window(&self, height: usize) -> impl Iterator<Item = &str> {
        let end = self.lines.len().saturating_sub(self.scroll);
        let start = end.saturating_sub(height);
        self.lines.range(start..end).map(String::as_str)
    }

    fn max_scroll(&self) -> usize {
        self.lines.len().saturating_sub(1)
    }
}

pub struct LogPanel {
    streamer: LogStreamer,
    lines: LogLines,
}

impl LogPanel {
    pub fn new(streamer: LogStreamer) -> Self {
        Self {
            streamer,
            lines: LogLines::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.streamer.name()
    }

    /// Move newly received lines into the scrollback
    pub fn pull(&mut self) {
        let lines = self.streamer.take_lines();
        if !lines.is_empty() {
            self.lines.append(lines);
        }
    }

    pub fn lines_mut(&mut self) -> &mut LogLines {
        &mut self.lines
    }

    pub fn render(&self, frame: &mut Frame, status_message: Option<&str>) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Lines
                Constraint::Length(3), // Footer
            ])
            .split(frame.size());

        let mode = if self.lines.is_following() { " | FOLLOW" } else { " | SCROLLED" };
        let ended = self
            .streamer
            .ended()
            .map(|reason| format!(" | ended: {}", reason))
            .unwrap_or_default();
        let header = Paragraph::new(format!(
            "Container: {} | Lines: {}{}{}",
            self.name(),
            self.lines.len(),
            mode,
            ended
        ))
        .style(Style::default().fg(Color::Cyan))
        .block(Block::default().borders(Borders::ALL).title("Log Viewer"));
        frame.render_widget(header, chunks[0]);

        self.render_lines(frame, chunks[1]);

        let footer_text = status_message
            .map(str::to_string)
            .unwrap_or_else(|| "[Esc/l] Back | [↑↓/jk] Scroll | [PgUp/PgDn] Page | [End/G] Follow | [q]uit".to_string());
        let footer = Paragraph::new(footer_text)
            .style(Style::default().add_modifier(Modifier::BOLD))
            .block(Block::default().borders(Borders::ALL));
        frame.render_widget(footer, chunks[2]);
    }

    fn render_lines(&self, frame: &mut Frame, area: Rect) {
        let height = area.height.saturating_sub(2) as usize;
        let lines: Vec<Line> = self.lines.window(height).map(Line::from).collect();

        let body = Paragraph::new(lines).block(Block::default().borders(Borders::ALL));
        frame.render_widget(body, area);
    }
}
