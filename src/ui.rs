//! Terminal User Interface module using Ratatui.
//!
//! Provides the triage dashboard: traffic overview, anomaly views and an
//! interactive form for classifying a single session.

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, BarChart, Block, Borders, Cell, Chart, Clear, Dataset, GraphType, Paragraph, Row,
        Scrollbar, ScrollbarOrientation, ScrollbarState, Table, TableState, Tabs, Wrap,
    },
    Frame, Terminal,
};

use crate::error::Result;
use crate::export::{format_bytes, format_duration};
use crate::report::{CountryCount, TriageReport};
use crate::scorer::{AnomalyLabel, Prediction, PredictionSource, SessionQuery};
use crate::session::Session;

/// Terminal type alias for convenience.
type Term = Terminal<CrosstermBackend<Stdout>>;

/// Countries shown per bar chart.
const MAX_BARS: usize = 12;

/// Dashboard views, cycled with Tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Overview,
    Anomalies,
    Predict,
}

impl View {
    const ALL: [View; 3] = [View::Overview, View::Anomalies, View::Predict];

    fn title(&self) -> &'static str {
        match self {
            Self::Overview => "Overview",
            Self::Anomalies => "Anomalies",
            Self::Predict => "Predict",
        }
    }

    fn index(&self) -> usize {
        Self::ALL.iter().position(|v| v == self).unwrap_or(0)
    }

    fn next(&self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    fn prev(&self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

/// Fields of the query form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    BytesIn,
    BytesOut,
    Duration,
}

impl FormField {
    const ALL: [FormField; 3] = [FormField::BytesIn, FormField::BytesOut, FormField::Duration];

    fn label(&self) -> &'static str {
        match self {
            Self::BytesIn => "Bytes In",
            Self::BytesOut => "Bytes Out",
            Self::Duration => "Session Duration (seconds)",
        }
    }

    fn accepts(&self, c: char) -> bool {
        match self {
            Self::BytesIn | Self::BytesOut => c.is_ascii_digit(),
            Self::Duration => c.is_ascii_digit() || c == '.' || c == '-',
        }
    }
}

/// What the form shows after submission.
#[derive(Debug, Clone, PartialEq)]
pub enum FormOutcome {
    Predicted(Prediction),
    Rejected(String),
}

/// State of the single-session query form.
#[derive(Debug, Clone)]
pub struct QueryForm {
    bytes_in: String,
    bytes_out: String,
    duration: String,
    active: FormField,
    outcome: Option<FormOutcome>,
}

impl Default for QueryForm {
    fn default() -> Self {
        Self {
            bytes_in: "1000".to_string(),
            bytes_out: "1000".to_string(),
            duration: "600.0".to_string(),
            active: FormField::BytesIn,
            outcome: None,
        }
    }
}

impl QueryForm {
    fn value(&self, field: FormField) -> &str {
        match field {
            FormField::BytesIn => &self.bytes_in,
            FormField::BytesOut => &self.bytes_out,
            FormField::Duration => &self.duration,
        }
    }

    fn value_mut(&mut self, field: FormField) -> &mut String {
        match field {
            FormField::BytesIn => &mut self.bytes_in,
            FormField::BytesOut => &mut self.bytes_out,
            FormField::Duration => &mut self.duration,
        }
    }

    fn next_field(&mut self) {
        let i = FormField::ALL.iter().position(|f| *f == self.active).unwrap_or(0);
        self.active = FormField::ALL[(i + 1) % FormField::ALL.len()];
    }

    fn prev_field(&mut self) {
        let i = FormField::ALL.iter().position(|f| *f == self.active).unwrap_or(0);
        self.active = FormField::ALL[(i + FormField::ALL.len() - 1) % FormField::ALL.len()];
    }

    fn push(&mut self, c: char) {
        let field = self.active;
        if field.accepts(c) {
            self.value_mut(field).push(c);
        }
    }

    fn backspace(&mut self) {
        let field = self.active;
        self.value_mut(field).pop();
    }

    /// Parses the fields into a query, or a message naming the bad field.
    pub fn query(&self) -> std::result::Result<SessionQuery, String> {
        let bytes = |field: FormField| {
            self.value(field)
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("{} must be a non-negative whole number", field.label()))
        };

        let duration_seconds = self
            .duration
            .trim()
            .parse::<f64>()
            .map_err(|_| "Session duration must be a number of seconds".to_string())?;

        Ok(SessionQuery {
            bytes_in: bytes(FormField::BytesIn)?,
            bytes_out: bytes(FormField::BytesOut)?,
            duration_seconds,
        })
    }
}

/// UI state and configuration.
pub struct App {
    session: Session,
    report: TriageReport,
    head_rows: usize,
    view: View,
    /// Table selection state.
    table_state: TableState,
    /// Scrollbar state.
    scroll_state: ScrollbarState,
    form: QueryForm,
    /// Whether to show help overlay.
    show_help: bool,
    /// Application running state.
    running: bool,
    /// Result of the last reload, if any.
    status: Option<(String, Color)>,
}

impl App {
    pub fn new(session: Session, head_rows: usize) -> Self {
        let report = TriageReport::build(&session, head_rows);
        let scroll_state = ScrollbarState::default().content_length(session.labeled().len());

        Self {
            session,
            report,
            head_rows,
            view: View::Overview,
            table_state: TableState::default(),
            scroll_state,
            form: QueryForm::default(),
            show_help: false,
            running: true,
            status: None,
        }
    }

    /// Replaces the session with a fresh one, e.g. after a reload.
    pub fn replace_session(&mut self, session: Session) {
        self.report = TriageReport::build(&session, self.head_rows);
        self.scroll_state = ScrollbarState::default().content_length(session.labeled().len());
        self.table_state = TableState::default();
        self.form.outcome = None;
        self.session = session;
    }

    /// Handles keyboard input.
    pub fn handle_key(&mut self, key: KeyCode) {
        if self.show_help {
            self.show_help = false;
            return;
        }

        match key {
            KeyCode::Esc => self.running = false,
            KeyCode::Tab => self.view = self.view.next(),
            KeyCode::BackTab => self.view = self.view.prev(),
            _ if self.view == View::Predict => self.handle_form_key(key),
            KeyCode::Char('q') => self.running = false,
            KeyCode::Char('?') | KeyCode::Char('h') => self.show_help = true,
            KeyCode::Char('r') => self.reload(),
            KeyCode::Down | KeyCode::Char('j') => self.next_row(),
            KeyCode::Up | KeyCode::Char('k') => self.prev_row(),
            KeyCode::Home => self.first_row(),
            KeyCode::End => self.last_row(),
            _ => {}
        }
    }

    fn handle_form_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') => self.running = false,
            KeyCode::Char('?') => self.show_help = true,
            KeyCode::Char('r') => self.reload(),
            KeyCode::Down => self.form.next_field(),
            KeyCode::Up => self.form.prev_field(),
            KeyCode::Backspace => self.form.backspace(),
            KeyCode::Enter => self.submit(),
            KeyCode::Char(c) => self.form.push(c),
            _ => {}
        }
    }

    /// Runs the form's query against the fitted scorer.
    pub fn submit(&mut self) {
        let outcome = match self.form.query() {
            Ok(query) => match self.session.predict(&query) {
                Ok(prediction) => FormOutcome::Predicted(prediction),
                Err(e) => FormOutcome::Rejected(e.to_string()),
            },
            Err(message) => FormOutcome::Rejected(message),
        };
        self.form.outcome = Some(outcome);
    }

    fn reload(&mut self) {
        match self.session.reload() {
            Ok(session) => {
                let rows = session.labeled().len();
                self.replace_session(session);
                self.status = Some((format!("Reloaded: {} flows scored", rows), Color::Green));
            }
            Err(e) => {
                self.status = Some((format!("Reload failed: {:#}", e), Color::Red));
            }
        }
    }

    fn row_count(&self) -> usize {
        self.session.labeled().len()
    }

    fn next_row(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }

        let i = match self.table_state.selected() {
            Some(i) => (i + 1).min(len - 1),
            None => 0,
        };
        self.table_state.select(Some(i));
        self.scroll_state = self.scroll_state.position(i);
    }

    fn prev_row(&mut self) {
        if self.row_count() == 0 {
            return;
        }

        let i = match self.table_state.selected() {
            Some(i) => i.saturating_sub(1),
            None => 0,
        };
        self.table_state.select(Some(i));
        self.scroll_state = self.scroll_state.position(i);
    }

    fn first_row(&mut self) {
        if self.row_count() > 0 {
            self.table_state.select(Some(0));
            self.scroll_state = self.scroll_state.position(0);
        }
    }

    fn last_row(&mut self) {
        let len = self.row_count();
        if len > 0 {
            self.table_state.select(Some(len - 1));
            self.scroll_state = self.scroll_state.position(len - 1);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn outcome(&self) -> Option<&FormOutcome> {
        self.form.outcome.as_ref()
    }
}

/// Initializes the terminal for TUI rendering.
pub fn init_terminal() -> Result<Term> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(terminal: &mut Term) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Main UI rendering function.
pub fn render(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(3), // Tabs
            Constraint::Length(3), // Stats
            Constraint::Min(10),   // Body
            Constraint::Length(3), // Footer
        ])
        .split(frame.area());

    render_header(frame, chunks[0], app);
    render_tabs(frame, chunks[1], app);
    render_stats(frame, chunks[2], app);

    match app.view() {
        View::Overview => render_overview(frame, chunks[3], app),
        View::Anomalies => render_anomalies(frame, chunks[3], app),
        View::Predict => render_predict(frame, chunks[3], app),
    }

    render_footer(frame, chunks[4], app);

    if app.show_help {
        render_help_overlay(frame);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let mut title = vec![
        Span::styled(
            "  FLOW-TRIAGE",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  "),
        Span::styled(
            app.report.source.clone().unwrap_or_else(|| "in-memory".to_string()),
            Style::default().fg(Color::Gray),
        ),
    ];

    if let Some((message, color)) = &app.status {
        title.push(Span::raw("  |  "));
        title.push(Span::styled(message.clone(), Style::default().fg(*color)));
    }

    let header = Paragraph::new(Line::from(title)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    frame.render_widget(header, area);
}

fn render_tabs(frame: &mut Frame, area: Rect, app: &App) {
    let tabs = Tabs::new(View::ALL.iter().map(|v| v.title()))
        .select(app.view.index())
        .style(Style::default().fg(Color::Gray))
        .highlight_style(Style::default().fg(Color::Yellow).bold())
        .block(Block::default().borders(Borders::ALL));

    frame.render_widget(tabs, area);
}

fn render_stats(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
        ])
        .split(area);

    let report = &app.report;
    let suspicious_color = if report.suspicious > 0 {
        Color::Red
    } else {
        Color::Green
    };

    let blocks = [
        (" Records ", report.records_read.to_string(), Color::Blue),
        (" Dropped ", report.dropped.to_string(), Color::Gray),
        (" Scored ", report.scored.to_string(), Color::Cyan),
        (
            " Suspicious ",
            format!("{} ({:.0}% contamination)", report.suspicious, report.contamination * 100.0),
            suspicious_color,
        ),
    ];

    for ((title, value, color), chunk) in blocks.into_iter().zip(chunks.iter()) {
        let block = Paragraph::new(value)
            .style(Style::default().fg(color))
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::LEFT | Borders::RIGHT)
                    .border_style(Style::default().fg(color)),
            );
        frame.render_widget(block, *chunk);
    }
}

fn render_overview(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(u16::try_from(app.head_rows).unwrap_or(u16::MAX).saturating_add(4)),
            Constraint::Min(8),
        ])
        .split(area);

    let header_cells = ["Row", "Created", "Source IP", "Dest IP", "Country", "Bytes In", "Bytes Out", "Duration", "Avg Size"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).bold()));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = app
        .report
        .sample
        .iter()
        .map(|row| {
            Row::new(vec![
                Cell::from(row.record.row.to_string()),
                Cell::from(
                    row.record
                        .creation_time
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "N/A".to_string()),
                ),
                Cell::from(row.record.src_ip.clone()),
                Cell::from(row.record.dst_ip.clone()),
                Cell::from(row.record.src_ip_country_code.clone().unwrap_or_else(|| "??".to_string())),
                Cell::from(format_bytes(row.bytes_in)),
                Cell::from(format_bytes(row.bytes_out)),
                Cell::from(format_duration(row.duration_seconds)),
                Cell::from(format!("{:.2}", row.avg_packet_size)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(20),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(8),
            Constraint::Length(11),
            Constraint::Length(11),
            Constraint::Length(10),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .title(" Sample of Uploaded Data ")
            .borders(Borders::ALL),
    );
    frame.render_widget(table, chunks[0]);

    render_country_bars(
        frame,
        chunks[1],
        " Country-wise Traffic Distribution ",
        &app.report.countries,
        Color::Cyan,
    );
}

fn render_anomalies(frame: &mut Frame, area: Rect, app: &mut App) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(columns[1]);

    render_labeled_table(frame, columns[0], app);
    render_scatter(frame, right[0], &app.report);
    render_country_bars(
        frame,
        right[1],
        " Suspicious Sessions by Country ",
        &app.report.suspicious_countries,
        Color::Red,
    );
}

fn label_style(label: AnomalyLabel) -> Style {
    match label {
        AnomalyLabel::Suspicious => Style::default().fg(Color::Red).bold(),
        AnomalyLabel::Normal => Style::default().fg(Color::Green),
    }
}

fn render_labeled_table(frame: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Source IP", "Dest IP", "Bytes In", "Bytes Out", "Anomaly"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).bold()));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = app
        .session
        .labeled()
        .iter()
        .map(|flow| {
            Row::new(vec![
                Cell::from(flow.row.record.src_ip.clone()),
                Cell::from(flow.row.record.dst_ip.clone()),
                Cell::from(format_bytes(flow.row.bytes_in)),
                Cell::from(format_bytes(flow.row.bytes_out)),
                Cell::from(flow.label.as_str()).style(label_style(flow.label)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(11),
            Constraint::Length(11),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .title(" Anomaly Detection (Isolation Forest) ")
            .borders(Borders::ALL),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol(">> ");

    frame.render_stateful_widget(table, area, &mut app.table_state);

    frame.render_stateful_widget(
        Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("↑"))
            .end_symbol(Some("↓")),
        area.inner(ratatui::layout::Margin {
            vertical: 1,
            horizontal: 0,
        }),
        &mut app.scroll_state,
    );
}

fn render_scatter(frame: &mut Frame, area: Rect, report: &TriageReport) {
    let (x_max, y_max) = report.scatter.bounds();
    let x_max = if x_max > 0.0 { x_max } else { 1.0 };
    let y_max = if y_max > 0.0 { y_max } else { 1.0 };

    let datasets = vec![
        Dataset::default()
            .name("Normal")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Green))
            .data(&report.scatter.normal),
        Dataset::default()
            .name("Suspicious")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Red))
            .data(&report.scatter.suspicious),
    ];

    let axis_labels = |max: f64| {
        vec![
            Line::from("0"),
            Line::from(format_bytes(max / 2.0)),
            Line::from(format_bytes(max)),
        ]
    };

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .title(" Bytes In vs Bytes Out ")
                .borders(Borders::ALL),
        )
        .x_axis(
            Axis::default()
                .title("bytes_in")
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, x_max])
                .labels(axis_labels(x_max)),
        )
        .y_axis(
            Axis::default()
                .title("bytes_out")
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, y_max])
                .labels(axis_labels(y_max)),
        );

    frame.render_widget(chart, area);
}

fn render_country_bars(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    counts: &[CountryCount],
    color: Color,
) {
    let data: Vec<(&str, u64)> = counts
        .iter()
        .take(MAX_BARS)
        .map(|c| (c.country_code.as_str(), c.count as u64))
        .collect();

    let chart = BarChart::default()
        .block(Block::default().title(title).borders(Borders::ALL))
        .data(data.as_slice())
        .bar_width(5)
        .bar_gap(1)
        .bar_style(Style::default().fg(color))
        .value_style(Style::default().fg(Color::Black).bg(color));

    frame.render_widget(chart, area);
}

fn render_predict(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(5)])
        .split(area);

    let form_lines: Vec<Line> = FormField::ALL
        .iter()
        .map(|field| {
            let active = *field == app.form.active;
            let marker = if active { ">> " } else { "   " };
            let value_style = if active {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::UNDERLINED)
            } else {
                Style::default().fg(Color::White)
            };
            Line::from(vec![
                Span::styled(marker, Style::default().fg(Color::Yellow)),
                Span::styled(format!("{:<28}", field.label()), Style::default().fg(Color::Gray)),
                Span::styled(app.form.value(*field).to_string(), value_style),
            ])
        })
        .collect();

    let form = Paragraph::new(form_lines).block(
        Block::default()
            .title(" Test Live Traffic Session ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    frame.render_widget(form, chunks[0]);

    let result_lines = match app.outcome() {
        None => vec![Line::from(Span::styled(
            "Press Enter to predict",
            Style::default().fg(Color::DarkGray).italic(),
        ))],
        Some(FormOutcome::Rejected(message)) => vec![Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Red),
        ))],
        Some(FormOutcome::Predicted(prediction)) => {
            let mut lines = Vec::new();
            if prediction.source == PredictionSource::ZeroTraffic {
                lines.push(Line::from(Span::styled(
                    "No data transferred. This session is suspicious.",
                    Style::default().fg(Color::Yellow),
                )));
            }
            let mut verdict = vec![
                Span::raw("Prediction: "),
                Span::styled(prediction.label.as_str(), label_style(prediction.label)),
            ];
            if let Some(score) = prediction.score() {
                verdict.push(Span::styled(
                    format!("  (score {:.4}, threshold {:.4})", score, app.session.scorer().threshold()),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            lines.push(Line::from(verdict));
            lines
        }
    };

    let result = Paragraph::new(result_lines)
        .block(Block::default().title(" Result ").borders(Borders::ALL))
        .wrap(Wrap { trim: false });
    frame.render_widget(result, chunks[1]);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let hints: Vec<(&str, &str)> = match app.view() {
        View::Predict => vec![
            ("Tab", ": View  "),
            ("↑/↓", ": Field  "),
            ("Enter", ": Predict  "),
            ("r", ": Reload  "),
            ("q", ": Quit"),
        ],
        _ => vec![
            ("Tab", ": View  "),
            ("↑/↓", ": Navigate  "),
            ("r", ": Reload  "),
            ("?", ": Help  "),
            ("q", ": Quit"),
        ],
    };

    let spans: Vec<Span> = hints
        .into_iter()
        .flat_map(|(key, text)| {
            [
                Span::styled(format!(" {}", key), Style::default().fg(Color::Yellow)),
                Span::raw(text),
            ]
        })
        .collect();

    let footer = Paragraph::new(Line::from(spans))
        .style(Style::default().fg(Color::Gray))
        .block(Block::default().borders(Borders::TOP));

    frame.render_widget(footer, area);
}

fn render_help_overlay(frame: &mut Frame) {
    let area = centered_rect(60, 60, frame.area());

    let key_line = |key: &'static str, text: &'static str| {
        Line::from(vec![
            Span::styled(key, Style::default().fg(Color::Yellow)),
            Span::raw(text),
        ])
    };

    let help_text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().bold().fg(Color::Cyan),
        )),
        Line::from(""),
        key_line("Tab        ", "Next view"),
        key_line("Shift+Tab  ", "Previous view"),
        key_line("↑ / k      ", "Move selection up"),
        key_line("↓ / j      ", "Move selection down"),
        key_line("Home / End ", "Jump to first / last row"),
        key_line("r          ", "Reload the flow export and refit"),
        key_line("q / Esc    ", "Quit application"),
        Line::from(""),
        Line::from(Span::styled(
            "Labels",
            Style::default().bold().fg(Color::Cyan),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled("Suspicious ", Style::default().fg(Color::Red)),
            Span::raw("Outlier under the isolation forest"),
        ]),
        Line::from(vec![
            Span::styled("Normal     ", Style::default().fg(Color::Green)),
            Span::raw("Inlier"),
        ]),
    ];

    let help = Paragraph::new(help_text)
        .block(
            Block::default()
                .title(" Help ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });

    frame.render_widget(Clear, area);
    frame.render_widget(help, area);
}

/// Helper to create a centered rectangle.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Main UI event loop.
pub fn run_ui(session: Session, head_rows: usize) -> Result<()> {
    let mut terminal = init_terminal()?;
    let mut app = App::new(session, head_rows);

    let tick_rate = Duration::from_millis(100);

    while app.is_running() {
        terminal.draw(|f| render(f, &mut app))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key.code);
                }
            }
        }
    }

    restore_terminal(&mut terminal)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::sample_session;

    fn app() -> App {
        App::new(sample_session(120), 5)
    }

    fn predict_view(app: &mut App) {
        app.handle_key(KeyCode::Tab);
        app.handle_key(KeyCode::Tab);
        assert_eq!(app.view(), View::Predict);
    }

    fn set_field(app: &mut App, digits: &str) {
        for _ in 0..16 {
            app.handle_key(KeyCode::Backspace);
        }
        for c in digits.chars() {
            app.handle_key(KeyCode::Char(c));
        }
    }

    #[test]
    fn test_view_cycle() {
        let mut app = app();
        assert_eq!(app.view(), View::Overview);

        app.handle_key(KeyCode::Tab);
        assert_eq!(app.view(), View::Anomalies);
        app.handle_key(KeyCode::BackTab);
        app.handle_key(KeyCode::BackTab);
        assert_eq!(app.view(), View::Predict);
    }

    #[test]
    fn test_quit_keys() {
        let mut app = app();
        app.handle_key(KeyCode::Char('q'));
        assert!(!app.is_running());

        let mut app = self::app();
        predict_view(&mut app);
        app.handle_key(KeyCode::Esc);
        assert!(!app.is_running());
    }

    #[test]
    fn test_row_navigation_is_clamped() {
        let mut app = app();
        app.handle_key(KeyCode::Up);
        assert_eq!(app.table_state.selected(), Some(0));

        app.handle_key(KeyCode::End);
        let last = app.session.labeled().len() - 1;
        assert_eq!(app.table_state.selected(), Some(last));

        app.handle_key(KeyCode::Down);
        assert_eq!(app.table_state.selected(), Some(last));

        app.handle_key(KeyCode::Home);
        assert_eq!(app.table_state.selected(), Some(0));
    }

    #[test]
    fn test_default_form_predicts_with_model() {
        let mut app = app();
        predict_view(&mut app);

        app.handle_key(KeyCode::Enter);

        match app.outcome() {
            Some(FormOutcome::Predicted(p)) => {
                assert!(matches!(p.source, PredictionSource::Model { .. }))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_form_zero_traffic_is_forced_suspicious() {
        let mut app = app();
        predict_view(&mut app);

        set_field(&mut app, "0");
        app.handle_key(KeyCode::Down);
        set_field(&mut app, "0");
        app.handle_key(KeyCode::Enter);

        assert_eq!(
            app.outcome(),
            Some(&FormOutcome::Predicted(Prediction {
                label: AnomalyLabel::Suspicious,
                source: PredictionSource::ZeroTraffic,
            }))
        );
    }

    #[test]
    fn test_form_zero_duration_is_rejected() {
        let mut app = app();
        predict_view(&mut app);

        app.handle_key(KeyCode::Up);
        set_field(&mut app, "0");
        app.handle_key(KeyCode::Enter);

        match app.outcome() {
            Some(FormOutcome::Rejected(message)) => assert!(message.contains("cannot be zero")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_form_filters_characters() {
        let mut form = QueryForm::default();
        form.push('x');
        form.push('.');
        form.push('7');
        assert_eq!(form.value(FormField::BytesIn), "10007");

        form.next_field();
        form.next_field();
        form.push('.');
        form.push('5');
        assert_eq!(form.value(FormField::Duration), "600.0.5");
        assert!(form.query().is_err());
    }

    #[test]
    fn test_form_empty_bytes_rejected() {
        let mut app = app();
        predict_view(&mut app);

        set_field(&mut app, "");
        app.handle_key(KeyCode::Enter);

        match app.outcome() {
            Some(FormOutcome::Rejected(message)) => assert!(message.starts_with("Bytes In")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_reload_without_file_reports_error() {
        let mut app = app();
        app.handle_key(KeyCode::Char('r'));

        let (message, color) = app.status.clone().unwrap();
        assert!(message.starts_with("Reload failed"));
        assert_eq!(color, Color::Red);
    }

    #[test]
    fn test_help_overlay_swallows_next_key() {
        let mut app = app();
        app.handle_key(KeyCode::Char('?'));
        assert!(app.show_help);

        app.handle_key(KeyCode::Char('q'));
        assert!(!app.show_help);
        assert!(app.is_running());
    }

    #[test]
    fn test_render_every_view() {
        use ratatui::backend::TestBackend;

        let mut app = app();
        let mut terminal = Terminal::new(TestBackend::new(160, 50)).unwrap();

        for _ in 0..View::ALL.len() {
            terminal.draw(|f| render(f, &mut app)).unwrap();
            app.handle_key(KeyCode::Tab);
        }
    }

    #[test]
    fn test_render_with_oversized_head_rows() {
        use ratatui::backend::TestBackend;

        let mut terminal = Terminal::new(TestBackend::new(160, 50)).unwrap();

        for head_rows in [65_531, 65_535, 70_000] {
            let mut app = App::new(sample_session(50), head_rows);
            terminal.draw(|f| render(f, &mut app)).unwrap();
        }
    }
}
