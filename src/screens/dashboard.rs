/// Main dashboard screen

use chrono::{DateTime, Utc};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap},
    Frame,
};
use tracing::warn;

use cdock::core::{MetricView, WorkloadStatus};
use cdock::utils::{auto_unit, format_ago, or_absent, short_id, truncate_string, AppConfig, ABSENT};

/// One table column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Name,
    Id,
    Status,
    Image,
    Cpu,
    Mem,
    Max,
    Rx,
    Tx,
    Ior,
    Iow,
    Created,
    Started,
    Ports,
    Command,
}

impl Column {
    pub const ALL: [Column; 15] = [
        Column::Name,
        Column::Id,
        Column::Status,
        Column::Image,
        Column::Cpu,
        Column::Mem,
        Column::Max,
        Column::Rx,
        Column::Tx,
        Column::Ior,
        Column::Iow,
        Column::Created,
        Column::Started,
        Column::Ports,
        Column::Command,
    ];

    pub fn parse(key: &str) -> Option<Self> {
        let column = match key.trim().to_lowercase().as_str() {
            "name" => Column::Name,
            "id" => Column::Id,
            "status" => Column::Status,
            "image" => Column::Image,
            "cpu" => Column::Cpu,
            "mem" | "mem_usage" => Column::Mem,
            "max" | "mem_limit" => Column::Max,
            "rx" | "rx/s" => Column::Rx,
            "tx" | "tx/s" => Column::Tx,
            "ior" | "ior/s" => Column::Ior,
            "iow" | "iow/s" => Column::Iow,
            "created" => Column::Created,
            "started" => Column::Started,
            "ports" => Column::Ports,
            "command" => Column::Command,
            _ => return None,
        };
        Some(column)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Column::Name => "NAME",
            Column::Id => "ID",
            Column::Status => "STATUS",
            Column::Image => "IMAGE",
            Column::Cpu => "CPU%",
            Column::Mem => "MEM",
            Column::Max => "MAX",
            Column::Rx => "Rx/s",
            Column::Tx => "Tx/s",
            Column::Ior => "IOR/s",
            Column::Iow => "IOW/s",
            Column::Created => "CREATED",
            Column::Started => "STARTED",
            Column::Ports => "PORTS",
            Column::Command => "COMMAND",
        }
    }

    fn width(&self) -> Constraint {
        match self {
            Column::Name => Constraint::Length(20),
            Column::Id => Constraint::Length(12),
            Column::Status => Constraint::Length(10),
            Column::Image => Constraint::Length(22),
            Column::Cpu => Constraint::Length(7),
            Column::Mem | Column::Max => Constraint::Length(7),
            Column::Rx | Column::Tx | Column::Ior | Column::Iow => Constraint::Length(7),
            Column::Created | Column::Started => Constraint::Length(16),
            Column::Ports => Constraint::Length(14),
            Column::Command => Constraint::Min(15),
        }
    }

    /// Cell text for `view`; absent values render as `-`
    pub fn text(&self, view: &MetricView, now: DateTime<Utc>) -> String {
        let metrics = &view.metrics;
        match self {
            Column::Name => view.name.clone(),
            Column::Id => short_id(&view.id).to_string(),
            Column::Status => view.status.to_string(),
            Column::Image => truncate_string(&view.image, 22),
            Column::Cpu => or_absent(metrics.cpu, |cpu| format!("{:.2}", cpu.usage_percent)),
            Column::Mem => or_absent(metrics.memory, |m| auto_unit(m.usage_bytes as f64)),
            Column::Max => or_absent(metrics.memory, |m| auto_unit(m.limit_bytes as f64)),
            Column::Rx => or_absent(metrics.net_io.and_then(|n| n.rx_rate_per_sec), auto_unit),
            Column::Tx => or_absent(metrics.net_io.and_then(|n| n.tx_rate_per_sec), auto_unit),
            Column::Ior => or_absent(metrics.disk_io.and_then(|d| d.read_rate_per_sec), auto_unit),
            Column::Iow => or_absent(metrics.disk_io.and_then(|d| d.write_rate_per_sec), auto_unit),
            Column::Created => or_absent(view.created_at, |t| format_ago(t, now)),
            Column::Started => or_absent(view.started_at, |t| format_ago(t, now)),
            Column::Ports => joined(&view.ports, ", "),
            Column::Command => joined(&view.command, " "),
        }
    }
}

fn joined(parts: &[String], separator: &str) -> String {
    if parts.is_empty() {
        ABSENT.to_string()
    } else {
        parts.join(separator)
    }
}

/// Columns named in the configuration, in order. Unknown names are skipped;
/// an empty result falls back to every column.
pub fn parse_columns(names: &[String]) -> Vec<Column> {
    let columns: Vec<Column> = names
        .iter()
        .filter_map(|name| {
            let column = Column::parse(name);
            if column.is_none() {
                warn!(column = %name, "Unknown column");
            }
            column
        })
        .collect();

    if columns.is_empty() {
        Column::ALL.to_vec()
    } else {
        columns
    }
}

/// Why the row's stats stream was lost and when it last delivered a sample
pub fn stream_notice(view: &MetricView, now: DateTime<Utc>) -> Option<String> {
    let reason = view.stream_failure.as_deref()?;
    Some(match view.last_sample_at {
        Some(at) => format!("{}: {} (last sample {})", view.name, reason, format_ago(at, now)),
        None => format!("{}: {}", view.name, reason),
    })
}

fn status_color(status: WorkloadStatus) -> Color {
    match status {
        WorkloadStatus::Running => Color::Green,
        WorkloadStatus::Paused => Color::Yellow,
        WorkloadStatus::Restarting => Color::Cyan,
        WorkloadStatus::Created => Color::Blue,
        WorkloadStatus::Exited => Color::Gray,
        WorkloadStatus::Dead => Color::Red,
        WorkloadStatus::Unknown => Color::White,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Connection {
    Connecting,
    Connected,
    /// Listing failed; the table shows the last known views
    Disconnected(String),
}

pub struct Dashboard {
    title: String,
    endpoint: String,
    version: Option<String>,
    connection: Connection,
    header_color: Color,
    columns: Vec<Column>,
    views: Vec<MetricView>,
}

impl Dashboard {
    pub fn new(config: &AppConfig, endpoint: &str) -> Self {
        Self {
            title: "cDock".to_string(),
            endpoint: endpoint.to_string(),
            version: None,
            connection: Connection::Connecting,
            header_color: config.header_color.parse().unwrap_or(Color::Cyan),
            columns: parse_columns(&config.columns),
            views: Vec::new(),
        }
    }

    pub fn update_views(&mut self, views: Vec<MetricView>) {
        self.views = views;
        self.connection = Connection::Connected;
    }

    pub fn update_version(&mut self, version: String) {
        self.version = Some(version);
    }

    pub fn set_disconnected(&mut self, reason: String) {
        self.connection = Connection::Disconnected(reason);
    }

    pub fn views(&self) -> &[MetricView] {
        &self.views
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn render(&self, frame: &mut Frame, selected_index: usize, status_message: Option<&str>, show_help: bool) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Table
                Constraint::Length(3), // Footer
            ])
            .split(frame.size());

        frame.render_widget(self.render_header(), chunks[0]);
        self.render_table(frame, chunks[1], selected_index);

        let notice = self
            .views
            .get(selected_index)
            .and_then(|view| stream_notice(view, Utc::now()));

        let (footer_text, footer_style) = match (status_message, notice) {
            (Some(message), _) => (
                message.to_string(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            (None, Some(notice)) => (notice, Style::default().fg(Color::Red)),
            (None, None) => (
                "[↑↓/jk] Select | [l]ogs | [s]tart | s[t]op | [r]estart | [p]ause | [u]npause | [K]ill | [?] Help | [q]uit"
                    .to_string(),
                Style::default(),
            ),
        };

        let footer = Paragraph::new(footer_text)
            .alignment(Alignment::Center)
            .style(footer_style)
            .block(Block::default().borders(Borders::ALL));

        frame.render_widget(footer, chunks[2]);

        if show_help {
            self.render_help(frame);
        }
    }

    fn render_header(&self) -> Paragraph {
        let (state_text, state_color) = match &self.connection {
            Connection::Connecting => ("connecting".to_string(), Color::Yellow),
            Connection::Connected => ("connected".to_string(), Color::Green),
            Connection::Disconnected(reason) => (format!("disconnected: {}", reason), Color::Red),
        };

        let running = self
            .views
            .iter()
            .filter(|v| v.status == WorkloadStatus::Running)
            .count();

        let line = Line::from(vec![
            Span::styled(
                format!(" {} ", self.title),
                Style::default().fg(self.header_color).add_modifier(Modifier::BOLD),
            ),
            Span::raw(" | "),
            Span::styled(self.endpoint.clone(), Style::default().fg(Color::White)),
            Span::raw(" | "),
            Span::styled(
                format!("Docker {}", self.version.as_deref().unwrap_or(ABSENT)),
                Style::default().fg(Color::White),
            ),
            Span::raw(" | "),
            Span::styled(state_text, Style::default().fg(state_color).add_modifier(Modifier::BOLD)),
            Span::raw(" | "),
            Span::styled(
                format!("{}/{} running", running, self.views.len()),
                Style::default().fg(Color::Cyan),
            ),
        ]);

        Paragraph::new(line).block(Block::default().borders(Borders::ALL))
    }

    fn render_table(&self, frame: &mut Frame, area: Rect, selected_index: usize) {
        let header = Row::new(self.columns.iter().map(|c| c.title()))
            .style(Style::default().fg(self.header_color).add_modifier(Modifier::BOLD))
            .bottom_margin(1);

        let now = Utc::now();
        let rows: Vec<Row> = self
            .views
            .iter()
            .enumerate()
            .map(|(idx, view)| {
                let cells: Vec<Cell> = self
                    .columns
                    .iter()
                    .map(|column| {
                        let text = column.text(view, now);
                        match column {
                            Column::Status => Cell::from(Span::styled(
                                text,
                                Style::default().fg(status_color(view.status)),
                            )),
                            Column::Cpu => {
                                let percent = view.metrics.cpu.map(|c| c.usage_percent).unwrap_or(0.0);
                                let color = if percent > 80.0 {
                                    Color::Red
                                } else if percent > 60.0 {
                                    Color::Yellow
                                } else {
                                    Color::White
                                };
                                Cell::from(Span::styled(text, Style::default().fg(color)))
                            }
                            // Flag rows whose stream was lost
                            Column::Name if view.stream_failure.is_some() => {
                                Cell::from(Span::styled(
                                    format!("{} !", text),
                                    Style::default().fg(Color::Red),
                                ))
                            }
                            _ => Cell::from(text),
                        }
                    })
                    .collect();

                let row = Row::new(cells);
                if idx == selected_index {
                    row.style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
                } else {
                    row
                }
            })
            .collect();

        let widths: Vec<Constraint> = self.columns.iter().map(|c| c.width()).collect();
        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title("Containers"));

        frame.render_widget(table, area);
    }

    fn render_help(&self, frame: &mut Frame) {
        // Create centered overlay
        let area = frame.size();
        let popup_width = area.width.min(60);
        let popup_height = area.height.min(19);
        let popup_area = Rect {
            x: (area.width.saturating_sub(popup_width)) / 2,
            y: (area.height.saturating_sub(popup_height)) / 2,
            width: popup_width,
            height: popup_height,
        };

        let section = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
        let help_text = vec![
            Line::from(Span::styled(
                "cDock - Keyboard Shortcuts",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled("Navigation:", section)),
            Line::from("  [↑ ↓] / [k j]  Select container"),
            Line::from(""),
            Line::from(Span::styled("Actions on selected container:", section)),
            Line::from("  [s]            Start"),
            Line::from("  [t]            Stop"),
            Line::from("  [r]            Restart"),
            Line::from("  [p]            Pause"),
            Line::from("  [u]            Resume"),
            Line::from("  [K]            Kill"),
            Line::from("  [l]            Follow logs"),
            Line::from(""),
            Line::from("  [?]            Toggle this help screen"),
            Line::from("  [q]            Quit application"),
        ];

        frame.render_widget(Clear, popup_area);

        let help_widget = Paragraph::new(help_text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan))
                    .title(Span::styled(" Help ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))),
            )
            .wrap(Wrap { trim: true });

        frame.render_widget(help_widget, popup_area);
    }
}
