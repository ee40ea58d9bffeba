use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, List, ListItem, Paragraph, Row, Table, TableState, Wrap},
};
use reelswarm_core::monitor::{
    ClusterSnapshot, ClusterView, NodeRow, TABLE_HEADERS, format_clock, node_cells,
};
use std::collections::HashMap;
use std::io;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc;

const MAX_EVENTS: usize = 500;

/// Messages from the polling task to the dashboard
#[derive(Debug, Clone)]
pub enum MonitorMessage {
    /// Result of one poll of the shared store
    View(ClusterView),
    /// Polling ended; the dashboard keeps showing the last view
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// Dashboard state. Events are derived by comparing consecutive views.
pub struct SwarmDashboard {
    store_label: String,
    view: Option<ClusterView>,
    polls: u64,
    stopped: bool,
    known_nodes: HashMap<String, bool>,
    store_down: bool,
    target_announced: bool,
    events: Vec<(EventLevel, String)>,
    table_state: TableState,
    rx: mpsc::UnboundedReceiver<MonitorMessage>,
}

impl SwarmDashboard {
    pub fn new(
        rx: mpsc::UnboundedReceiver<MonitorMessage>,
        store_label: impl Into<String>,
    ) -> Self {
        Self {
            store_label: store_label.into(),
            view: None,
            polls: 0,
            stopped: false,
            known_nodes: HashMap::new(),
            store_down: false,
            target_announced: false,
            events: Vec::new(),
            table_state: TableState::default(),
            rx,
        }
    }

    pub fn events(&self) -> &[(EventLevel, String)] {
        &self.events
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    fn push_event(&mut self, level: EventLevel, message: String) {
        self.events.push((level, message));
        if self.events.len() > MAX_EVENTS {
            self.events.drain(0..self.events.len() - MAX_EVENTS);
        }
    }

    /// Drains pending messages without blocking.
    pub fn process_messages(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                MonitorMessage::View(view) => self.apply(view),
                MonitorMessage::Stopped => {
                    self.stopped = true;
                    self.push_event(EventLevel::Info, "Polling stopped".to_string());
                }
            }
        }
    }

    pub fn apply(&mut self, view: ClusterView) {
        self.polls += 1;
        match &view {
            ClusterView::Unreachable { error, taken_at } => {
                if !self.store_down {
                    self.store_down = true;
                    self.push_event(
                        EventLevel::Error,
                        format!("{} store unreachable: {}", format_clock(*taken_at), error),
                    );
                }
                // Keep the last good snapshot on screen.
                if matches!(self.view, Some(ClusterView::Snapshot(_))) {
                    return;
                }
            }
            ClusterView::Snapshot(snap) => {
                if self.store_down {
                    self.store_down = false;
                    self.push_event(
                        EventLevel::Info,
                        format!("{} store reachable again", format_clock(snap.taken_at)),
                    );
                }
                self.track_nodes(snap);
                if snap.is_satisfied() && !self.target_announced {
                    self.target_announced = true;
                    self.push_event(
                        EventLevel::Info,
                        format!("Target of {} covers and trailers reached", snap.target),
                    );
                }
                self.clamp_selection(snap.nodes.len());
            }
        }
        self.view = Some(view);
    }

    fn track_nodes(&mut self, snap: &ClusterSnapshot) {
        let clock = format_clock(snap.taken_at);
        for node in &snap.nodes {
            match self.known_nodes.insert(node.node_id.clone(), node.active) {
                None => self.push_event(
                    EventLevel::Info,
                    format!("{} node {} joined", clock, node.node_id),
                ),
                Some(true) if !node.active => self.push_event(
                    EventLevel::Warn,
                    format!("{} node {} went stale", clock, node.node_id),
                ),
                Some(false) if node.active => self.push_event(
                    EventLevel::Info,
                    format!("{} node {} is active again", clock, node.node_id),
                ),
                _ => {}
            }
        }
        let gone: Vec<String> = self
            .known_nodes
            .keys()
            .filter(|id| !snap.nodes.iter().any(|n| &n.node_id == *id))
            .cloned()
            .collect();
        for id in gone {
            self.known_nodes.remove(&id);
            self.push_event(EventLevel::Info, format!("{} node {} left", clock, id));
        }
    }

    fn clamp_selection(&mut self, rows: usize) {
        match self.table_state.selected() {
            Some(_) if rows == 0 => self.table_state.select(None),
            Some(idx) if idx >= rows => self.table_state.select(Some(rows - 1)),
            _ => {}
        }
    }

    fn snapshot(&self) -> Option<&ClusterSnapshot> {
        match &self.view {
            Some(ClusterView::Snapshot(snap)) => Some(snap),
            _ => None,
        }
    }

    pub fn select_next(&mut self) {
        let rows = self.snapshot().map(|s| s.nodes.len()).unwrap_or(0);
        if rows == 0 {
            return;
        }
        let next = match self.table_state.selected() {
            Some(idx) => (idx + 1).min(rows - 1),
            None => 0,
        };
        self.table_state.select(Some(next));
    }

    pub fn select_previous(&mut self) {
        let rows = self.snapshot().map(|s| s.nodes.len()).unwrap_or(0);
        if rows == 0 {
            return;
        }
        let prev = match self.table_state.selected() {
            Some(idx) => idx.saturating_sub(1),
            None => rows - 1,
        };
        self.table_state.select(Some(prev));
    }

    pub fn selected_node(&self) -> Option<&NodeRow> {
        let idx = self.table_state.selected()?;
        self.snapshot()?.nodes.get(idx)
    }

    fn render_summary(&self, f: &mut Frame, area: Rect) {
        let (title, border_color) = match (&self.view, self.store_down) {
            (_, true) => (" Store unreachable ", Color::Red),
            (Some(ClusterView::Snapshot(s)), _) if s.is_satisfied() => {
                (" Target reached ", Color::Green)
            }
            _ => (" Swarm ", Color::Yellow),
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(border_color));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let label = Style::default().fg(Color::DarkGray);
        let value = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);

        let mut text = vec![Line::from(vec![
            Span::styled("Store: ", label),
            Span::styled(self.store_label.clone(), Style::default().fg(Color::Cyan)),
        ])];

        match (&self.view, self.snapshot()) {
            (_, Some(snap)) => {
                text.push(Line::from(vec![
                    Span::styled("URL Queue: ", label),
                    Span::styled(snap.queue_size.to_string(), value),
                    Span::styled("  Unique Movies: ", label),
                    Span::styled(snap.unique_movies.to_string(), value),
                    Span::styled("  Seen URLs: ", label),
                    Span::styled(snap.dupefilter_size.to_string(), value),
                ]));
                text.push(Line::from(vec![
                    Span::styled("Active Nodes: ", label),
                    Span::styled(
                        format!("{}/{}", snap.active_nodes, snap.total_nodes()),
                        value,
                    ),
                    Span::styled("  Last poll: ", label),
                    Span::raw(format_clock(snap.taken_at)),
                ]));
            }
            (Some(ClusterView::Unreachable { error, .. }), None) => {
                text.push(Line::from(Span::styled(
                    error.clone(),
                    Style::default().fg(Color::Red),
                )));
            }
            _ => text.push(Line::from("Waiting for first poll...")),
        }

        if self.stopped {
            text.push(Line::from(Span::styled(
                "Polling stopped",
                Style::default().fg(Color::DarkGray),
            )));
        }

        f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
    }

    fn render_gauge(&self, f: &mut Frame, area: Rect, title: &str, done: u64, color: Color) {
        let target = self.snapshot().map(|s| s.target).unwrap_or(0);
        let ratio = if target == 0 {
            1.0
        } else {
            (done as f64 / target as f64).min(1.0)
        };
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title(format!(" {} ", title)))
            .gauge_style(Style::default().fg(color))
            .ratio(ratio)
            .label(format!("{}/{}", done, target));
        f.render_widget(gauge, area);
    }

    fn render_nodes(&mut self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Nodes ")
            .border_style(Style::default().fg(Color::Cyan));

        let rows: Vec<Row> = match self.snapshot() {
            Some(snap) => snap
                .nodes
                .iter()
                .map(|node| {
                    let color = match (&node.status, node.active) {
                        (None, _) => Color::Red,
                        (Some(_), true) => Color::Green,
                        (Some(_), false) => Color::DarkGray,
                    };
                    Row::new(node_cells(node).into_iter().map(Cell::from))
                        .style(Style::default().fg(color))
                })
                .collect(),
            None => Vec::new(),
        };

        if rows.is_empty() {
            let inner = block.inner(area);
            f.render_widget(block, area);
            f.render_widget(
                Paragraph::new("No nodes registered")
                    .style(Style::default().fg(Color::DarkGray)),
                inner,
            );
            return;
        }

        let header = Row::new(TABLE_HEADERS.iter().map(|h| Cell::from(*h)))
            .style(Style::default().add_modifier(Modifier::BOLD));
        let widths = [
            Constraint::Min(16),
            Constraint::Length(9),
            Constraint::Length(7),
            Constraint::Length(7),
            Constraint::Length(9),
            Constraint::Length(12),
            Constraint::Length(7),
        ];
        let table = Table::new(rows, widths)
            .header(header)
            .block(block)
            .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));
        f.render_stateful_widget(table, area, &mut self.table_state);
    }

    fn render_events(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Events ")
            .border_style(Style::default().fg(Color::Magenta));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let height = inner.height as usize;
        let items: Vec<ListItem> = self
            .events
            .iter()
            .skip(self.events.len().saturating_sub(height))
            .map(|(level, message)| {
                let (prefix, style) = match level {
                    EventLevel::Info => ("INFO ", Style::default().fg(Color::Blue)),
                    EventLevel::Warn => ("WARN ", Style::default().fg(Color::Yellow)),
                    EventLevel::Error => ("ERROR", Style::default().fg(Color::Red)),
                };
                ListItem::new(format!("[{}] {}", prefix, message)).style(style)
            })
            .collect();
        f.render_widget(List::new(items), inner);
    }

    fn render_hints(&self, f: &mut Frame, area: Rect) {
        let key = Style::default().fg(Color::Black).bg(Color::Gray);
        let mut spans = vec![
            Span::styled(" q/ESC ", key),
            Span::raw(" Exit  "),
            Span::styled(" ↑/↓ ", key),
            Span::raw(" Select node  "),
        ];
        if let Some(node) = self.selected_node() {
            let detail = match &node.status {
                Some(status) => format!("{}: {}", node.node_id, status.status),
                None => format!("{}: undecodable record", node.node_id),
            };
            spans.push(Span::styled(detail, Style::default().fg(Color::Cyan)));
        }
        f.render_widget(
            Paragraph::new(Line::from(spans))
                .style(Style::default().bg(Color::Black).fg(Color::Gray)),
            area,
        );
    }

    pub fn draw(&mut self, f: &mut Frame) {
        let size = f.area();
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(6),
                Constraint::Length(3),
                Constraint::Min(6),
                Constraint::Length(8),
                Constraint::Length(1),
            ])
            .split(size);

        let gauges = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(vertical[1]);

        let (covers, trailers) = self
            .snapshot()
            .map(|s| (s.covers, s.trailers))
            .unwrap_or((0, 0));

        self.render_summary(f, vertical[0]);
        self.render_gauge(f, gauges[0], "Covers", covers, Color::Green);
        self.render_gauge(f, gauges[1], "Trailers", trailers, Color::Magenta);
        self.render_nodes(f, vertical[2]);
        self.render_events(f, vertical[3]);
        self.render_hints(f, vertical[4]);
    }
}

/// Run the swarm dashboard (blocking function, should be run in separate thread)
pub fn run_monitor(
    rx: mpsc::UnboundedReceiver<MonitorMessage>,
    should_exit: Arc<AtomicBool>,
    store_label: String,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut dashboard = SwarmDashboard::new(rx, store_label);

    let outcome = (|| -> Result<()> {
        loop {
            dashboard.process_messages();
            terminal.draw(|f| dashboard.draw(f))?;

            if should_exit.load(Ordering::Relaxed) {
                return Ok(());
            }

            if event::poll(std::time::Duration::from_millis(100))?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                match key.code {
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return Ok(());
                    }
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Up => dashboard.select_previous(),
                    KeyCode::Down => dashboard.select_next(),
                    _ => {}
                }
            }
        }
    })();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    should_exit.store(true, Ordering::Relaxed);

    outcome
}

/// Create a channel pair for feeding the dashboard
pub fn create_monitor_channel() -> (
    mpsc::UnboundedSender<MonitorMessage>,
    mpsc::UnboundedReceiver<MonitorMessage>,
) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use reelswarm_core::registry::{NodeState, NodeStatus};

    fn row(id: &str, active: bool) -> NodeRow {
        NodeRow {
            node_id: id.to_string(),
            status: Some(NodeStatus {
                status: NodeState::Running,
                requests_seen: 10,
                items_scraped: 4,
                covers: 3,
                trailers: 2,
                last_update: 1000,
            }),
            active,
        }
    }

    fn snapshot(nodes: Vec<NodeRow>, covers: u64, trailers: u64) -> ClusterView {
        ClusterView::Snapshot(ClusterSnapshot {
            taken_at: 1000,
            queue_size: 42,
            unique_movies: 7,
            dupefilter_size: 50,
            covers,
            trailers,
            target: 5,
            active_nodes: nodes.iter().filter(|n| n.active).count(),
            nodes,
        })
    }

    fn dashboard() -> (mpsc::UnboundedSender<MonitorMessage>, SwarmDashboard) {
        let (tx, rx) = create_monitor_channel();
        (tx, SwarmDashboard::new(rx, "redis://test"))
    }

    fn screen(dashboard: &mut SwarmDashboard) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        terminal.draw(|f| dashboard.draw(f)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn test_node_transitions_become_events() {
        let (_tx, mut dash) = dashboard();
        dash.apply(snapshot(vec![row("node_a", true), row("node_b", true)], 0, 0));
        dash.apply(snapshot(vec![row("node_a", false), row("node_b", true)], 0, 0));
        dash.apply(snapshot(vec![row("node_a", true)], 0, 0));

        let messages: Vec<&str> = dash.events().iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(messages.len(), 5);
        assert!(messages[0].ends_with("node node_a joined"));
        assert!(messages[2].ends_with("node node_a went stale"));
        assert!(messages[3].ends_with("node node_a is active again"));
        assert!(messages[4].ends_with("node node_b left"));
        assert_eq!(dash.events()[2].0, EventLevel::Warn);
    }

    #[test]
    fn test_unreachable_keeps_last_snapshot() {
        let (_tx, mut dash) = dashboard();
        dash.apply(snapshot(vec![row("node_a", true)], 1, 1));
        for _ in 0..3 {
            dash.apply(ClusterView::Unreachable {
                error: "connection refused".to_string(),
                taken_at: 1002,
            });
        }
        assert!(matches!(dash.snapshot(), Some(s) if s.queue_size == 42));
        let errors = dash
            .events()
            .iter()
            .filter(|(level, _)| *level == EventLevel::Error)
            .count();
        assert_eq!(errors, 1);

        dash.apply(snapshot(vec![row("node_a", true)], 1, 1));
        assert!(dash.events().last().unwrap().1.ends_with("store reachable again"));
        assert_eq!(dash.polls(), 5);
    }

    #[test]
    fn test_target_reached_announced_once() {
        let (_tx, mut dash) = dashboard();
        dash.apply(snapshot(vec![], 5, 4));
        dash.apply(snapshot(vec![], 5, 5));
        dash.apply(snapshot(vec![], 6, 6));
        let announced = dash
            .events()
            .iter()
            .filter(|(_, m)| m.starts_with("Target of 5"))
            .count();
        assert_eq!(announced, 1);
    }

    #[test]
    fn test_selection_stays_in_bounds() {
        let (_tx, mut dash) = dashboard();
        dash.select_next();
        assert!(dash.selected_node().is_none());

        dash.apply(snapshot(vec![row("node_a", true), row("node_b", true)], 0, 0));
        dash.select_next();
        dash.select_next();
        dash.select_next();
        assert_eq!(dash.selected_node().unwrap().node_id, "node_b");

        dash.apply(snapshot(vec![row("node_a", true)], 0, 0));
        assert_eq!(dash.selected_node().unwrap().node_id, "node_a");
        dash.select_previous();
        assert_eq!(dash.selected_node().unwrap().node_id, "node_a");
    }

    #[test]
    fn test_messages_are_drained_from_channel() {
        let (tx, mut dash) = dashboard();
        tx.send(MonitorMessage::View(snapshot(vec![row("node_a", true)], 0, 0)))
            .unwrap();
        tx.send(MonitorMessage::Stopped).unwrap();
        dash.process_messages();
        assert_eq!(dash.polls(), 1);
        assert!(dash.stopped);
    }

    #[test]
    fn test_draw_shows_counts_and_nodes() {
        let (_tx, mut dash) = dashboard();
        let waiting = screen(&mut dash);
        assert!(waiting.contains("Waiting for first poll"));
        assert!(waiting.contains("No nodes registered"));

        dash.apply(snapshot(vec![row("node_alpha", true)], 3, 2));
        let text = screen(&mut dash);
        assert!(text.contains("redis://test"));
        assert!(text.contains("URL Queue: 42"));
        assert!(text.contains("Active Nodes: 1/1"));
        assert!(text.contains("node_alpha"));
        assert!(text.contains("Last Update"));
        assert!(text.contains("3/5"));
        assert!(text.contains("2/5"));
    }
}
