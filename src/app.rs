/// Main TUI application

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use cdock::core::{ActionKind, ActionParams, DockerClient, MetricView, StreamRegistry, DEFAULT_LOG_TAIL};
use cdock::utils::AppConfig;

use crate::screens::{Dashboard, LogPanel};

/// Lines moved per PageUp/PageDown in the log viewer
const LOG_PAGE: usize = 20;

/// Sent by the background poller to the UI loop
enum Update {
    Views(Vec<MetricView>),
    Disconnected(String),
    Version(String),
}

pub struct App {
    registry: Arc<StreamRegistry>,
    dashboard: Dashboard,
    /// Open while the log viewer is shown
    logs: Option<LogPanel>,
    updates_rx: mpsc::UnboundedReceiver<Update>,
    poller: JoinHandle<()>,
    selected_index: usize,
    status_message: Option<String>,
    show_help: bool,
    should_quit: bool,
}

impl App {
    /// Must be called from within a tokio runtime
    pub fn new(config: &AppConfig, client: DockerClient) -> Self {
        let registry = Arc::new(StreamRegistry::new(config.metric_settings(), config.action_pool));
        let dashboard = Dashboard::new(config, client.endpoint());

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let poller = tokio::spawn(poll_daemon(
            client,
            Arc::clone(&registry),
            config.refresh_interval(),
            updates_tx,
        ));

        Self {
            registry,
            dashboard,
            logs: None,
            updates_rx,
            poller,
            selected_index: 0,
            status_message: None,
            show_help: false,
            should_quit: false,
        }
    }

    fn set_status(&mut self, message: String) {
        self.status_message = Some(message);
    }

    fn clear_status(&mut self) {
        self.status_message = None;
    }

    pub async fn run(&mut self) -> Result<()> {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_loop(&mut terminal).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        self.shutdown();
        result
    }

    fn shutdown(&mut self) {
        self.logs = None;
        self.poller.abort();
        self.registry.shutdown();
        info!("Dashboard closed");
    }

    async fn run_loop<B: ratatui::backend::Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            // Drain updates from the poller (non-blocking)
            while let Ok(update) = self.updates_rx.try_recv() {
                self.apply_update(update);
            }

            if let Some(panel) = self.logs.as_mut() {
                panel.pull();
            }

            terminal.draw(|f| match &self.logs {
                Some(panel) => panel.render(f, self.status_message.as_deref()),
                None => self.dashboard.render(
                    f,
                    self.selected_index,
                    self.status_message.as_deref(),
                    self.show_help,
                ),
            })?;

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key_event) = event::read()? {
                    if key_event.kind == KeyEventKind::Press {
                        self.handle_key(key_event.code);
                    }
                }
            }

            if self.should_quit {
                break;
            }
        }

        Ok(())
    }

    fn apply_update(&mut self, update: Update) {
        match update {
            Update::Views(views) => {
                self.dashboard.update_views(views);
                let rows = self.dashboard.views().len();
                self.selected_index = self.selected_index.min(rows.saturating_sub(1));
            }
            Update::Disconnected(reason) => self.dashboard.set_disconnected(reason),
            Update::Version(version) => self.dashboard.update_version(version),
        }
    }

    fn handle_key(&mut self, key: KeyCode) {
        if let Some(panel) = self.logs.as_mut() {
            let lines = panel.lines_mut();
            match key {
                KeyCode::Esc | KeyCode::Char('l') => {
                    self.logs = None;
                    self.clear_status();
                }
                KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Up | KeyCode::Char('k') => lines.scroll_up(1),
                KeyCode::Down | KeyCode::Char('j') => lines.scroll_down(1),
                KeyCode::PageUp => lines.scroll_up(LOG_PAGE),
                KeyCode::PageDown => lines.scroll_down(LOG_PAGE),
                KeyCode::End | KeyCode::Char('G') => lines.follow(),
                _ => {}
            }
            return;
        }

        if self.show_help {
            match key {
                KeyCode::Char('?') | KeyCode::Esc => self.show_help = false,
                KeyCode::Char('q') => self.should_quit = true,
                _ => {}
            }
            return;
        }

        if let Some(action) = action_for_key(key) {
            self.dispatch_selected(action);
            return;
        }

        self.clear_status();

        match key {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('?') => self.show_help = true,
            KeyCode::Char('l') => self.open_logs(),
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_index = self.selected_index.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let last = self.dashboard.views().len().saturating_sub(1);
                self.selected_index = (self.selected_index + 1).min(last);
            }
            _ => {}
        }
    }

    fn selected_name(&self) -> Option<String> {
        self.dashboard
            .views()
            .get(self.selected_index)
            .map(|view| view.name.clone())
    }

    fn open_logs(&mut self) {
        let Some(name) = self.selected_name() else {
            self.set_status("No container selected".to_string());
            return;
        };

        match self.registry.open_logs(&name, DEFAULT_LOG_TAIL) {
            Ok(streamer) => self.logs = Some(LogPanel::new(streamer)),
            Err(e) => {
                warn!(workload = %name, error = %e, "Cannot follow logs");
                self.set_status(format!("✗ {}", e));
            }
        }
    }

    fn dispatch_selected(&mut self, action: ActionKind) {
        let Some(name) = self.selected_name() else {
            self.set_status("No container selected".to_string());
            return;
        };

        match self.registry.dispatch(&name, action, ActionParams::default()) {
            Ok(()) => self.set_status(format!("✓ {} {} requested", action, name)),
            Err(e) => {
                warn!(workload = %name, %action, error = %e, "Action rejected");
                self.set_status(format!("✗ {}", e));
            }
        }
    }
}

fn action_for_key(key: KeyCode) -> Option<ActionKind> {
    let action = match key {
        KeyCode::Char('s') => ActionKind::Start,
        KeyCode::Char('t') => ActionKind::Stop,
        KeyCode::Char('r') => ActionKind::Restart,
        KeyCode::Char('p') => ActionKind::Pause,
        KeyCode::Char('u') => ActionKind::Resume,
        KeyCode::Char('K') => ActionKind::Kill,
        _ => return None,
    };
    Some(action)
}

/// List, reconcile and publish views once per tick until the UI goes away
async fn poll_daemon(
    client: DockerClient,
    registry: Arc<StreamRegistry>,
    interval: Duration,
    updates_tx: mpsc::UnboundedSender<Update>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut version_known = false;

    loop {
        ticker.tick().await;

        if !version_known {
            if let Ok(version) = client.version().await {
                version_known = true;
                if updates_tx.send(Update::Version(version)).is_err() {
                    break;
                }
            }
        }

        let update = match registry.refresh_from(&client).await {
            Ok(views) => Update::Views(views),
            Err(e) => {
                // Reconnecting may land on a different daemon version
                version_known = false;
                Update::Disconnected(e.to_string())
            }
        };

        if updates_tx.send(update).is_err() {
            break;
        }
    }
}
