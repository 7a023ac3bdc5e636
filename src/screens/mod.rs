pub mod dashboard;
pub mod logs;

// Single-screen TUI:
// - Header: daemon endpoint, version, connection state
// - Table: one row per container with live resource metrics
// - Footer: key hints or the outcome of the last action
// - Help overlay (press '?')
// - Log viewer for the selected container (press 'l')

pub use dashboard::Dashboard;
pub use logs::LogPanel;
