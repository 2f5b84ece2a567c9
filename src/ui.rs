//! Interactive flow browser.
//!
//! The capture is read on a blocking worker that reports progress and the
//! finished [`FlowSet`] over a channel; the draw loop polls the channel and
//! the keyboard.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use nucleo::pattern::{CaseMatching, Normalization, Pattern};
use nucleo::{Config, Matcher, Utf32Str};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use tracing::debug;

use crate::accumulator::FlowAccumulator;
use crate::capture::PcapFrames;
use crate::config::Settings;
use crate::error::Result;
use crate::flow::{Flow, SegmentConcat};
use crate::query::FlowSet;

const PROGRESS_EVERY: usize = 1000;
const PREVIEW_BYTES: usize = 48;
const SCROLL_STEP: u16 = 10;

pub enum LoadUpdate {
    Progress(usize),
    Done(std::result::Result<FlowSet, String>),
}

pub async fn browse(path: PathBuf, settings: Settings) -> Result<()> {
    let (tx, rx) = mpsc::channel::<LoadUpdate>();
    let cancel = Arc::new(AtomicBool::new(false));
    let loader = {
        let cancel = Arc::clone(&cancel);
        tokio::task::spawn_blocking(move || load(path, settings, tx, cancel))
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    terminal.clear()?;

    let outcome = run(&mut terminal, &rx);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    cancel.store(true, Ordering::Relaxed);
    if let Err(e) = loader.await {
        debug!(error = %e, "capture loader did not finish cleanly");
    }
    outcome.map_err(Into::into)
}

/// Read and group the capture, reporting progress on `tx`.
fn load(path: PathBuf, settings: Settings, tx: Sender<LoadUpdate>, cancel: Arc<AtomicBool>) {
    let progress = tx.clone();
    let result = PcapFrames::open(&path, settings.buffer_capacity)
        .and_then(|frames| {
            let frames = frames
                .take_while(|_| !cancel.load(Ordering::Relaxed))
                .enumerate()
                .map(|(n, item)| {
                    if n % PROGRESS_EVERY == 0 {
                        let _ = progress.send(LoadUpdate::Progress(n));
                    }
                    item
                });
            FlowAccumulator::new(settings.ip_target).accumulate(frames)
        })
        .map(|acc| acc.finish(&SegmentConcat))
        .map_err(|e| e.to_string());
    let _ = tx.send(LoadUpdate::Done(result));
}

fn run<B: Backend>(terminal: &mut Terminal<B>, rx: &Receiver<LoadUpdate>) -> io::Result<()> {
    let mut app = Browser::default();
    loop {
        while let Ok(update) = rx.try_recv() {
            app.apply(update);
        }

        terminal.draw(|f| draw(f, &mut app))?;

        if event::poll(Duration::from_millis(16))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && app.on_key(key.code) {
                    break;
                }
            }
        }
    }
    Ok(())
}

struct Browser {
    flows: Option<FlowSet>,
    frames_read: usize,
    error: Option<String>,
    /// Indices into `flows` that pass the filter
    visible: Vec<usize>,
    list_state: ListState,
    filter: String,
    editing: bool,
    scroll: u16,
    matcher: Matcher,
}

impl Default for Browser {
    fn default() -> Self {
        Self {
            flows: None,
            frames_read: 0,
            error: None,
            visible: Vec::new(),
            list_state: ListState::default(),
            filter: String::new(),
            editing: false,
            scroll: 0,
            matcher: Matcher::new(Config::DEFAULT),
        }
    }
}

impl Browser {
    fn apply(&mut self, update: LoadUpdate) {
        match update {
            LoadUpdate::Progress(n) => self.frames_read = n,
            LoadUpdate::Done(Ok(flows)) => {
                self.flows = Some(flows);
                self.refilter();
            }
            LoadUpdate::Done(Err(e)) => self.error = Some(e),
        }
    }

    fn refilter(&mut self) {
        if let Some(flows) = &self.flows {
            self.visible = filter_flows(flows, &self.filter, &mut self.matcher);
        }
        self.list_state
            .select((!self.visible.is_empty()).then_some(0));
        self.scroll = 0;
    }

    fn selected(&self) -> Option<&Flow> {
        let flows = self.flows.as_ref()?;
        let slot = *self.visible.get(self.list_state.selected()?)?;
        flows.flows().get(slot)
    }

    /// Returns true when the browser should close.
    fn on_key(&mut self, code: KeyCode) -> bool {
        if self.editing {
            match code {
                KeyCode::Esc => {
                    self.filter.clear();
                    self.editing = false;
                    self.refilter();
                }
                KeyCode::Enter => self.editing = false,
                KeyCode::Backspace => {
                    self.filter.pop();
                    self.refilter();
                }
                KeyCode::Char(c) => {
                    self.filter.push(c);
                    self.refilter();
                }
                _ => {}
            }
            return false;
        }

        let count = self.visible.len();
        match code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('/') => self.editing = true,
            KeyCode::Down if count > 0 => {
                let i = match self.list_state.selected() {
                    Some(i) if i + 1 < count => i + 1,
                    _ => 0,
                };
                self.list_state.select(Some(i));
                self.scroll = 0;
            }
            KeyCode::Up if count > 0 => {
                let i = match self.list_state.selected() {
                    Some(0) | None => count - 1,
                    Some(i) => i - 1,
                };
                self.list_state.select(Some(i));
                self.scroll = 0;
            }
            KeyCode::PageDown => self.scroll = self.scroll.saturating_add(SCROLL_STEP),
            KeyCode::PageUp => self.scroll = self.scroll.saturating_sub(SCROLL_STEP),
            _ => {}
        }
        false
    }
}

/// Flows whose label fuzzy-matches `query`, in capture order.
fn filter_flows(flows: &FlowSet, query: &str, matcher: &mut Matcher) -> Vec<usize> {
    if query.is_empty() {
        return (0..flows.len()).collect();
    }
    let pattern = Pattern::parse(query, CaseMatching::Ignore, Normalization::Smart);
    let mut buf = Vec::new();
    flows
        .flows()
        .iter()
        .enumerate()
        .filter(|(_, flow)| {
            let label = label(flow);
            pattern
                .score(Utf32Str::new(&label, &mut buf), matcher)
                .is_some()
        })
        .map(|(i, _)| i)
        .collect()
}

/// Key plus the start of each direction, which is what the filter searches.
fn label(flow: &Flow) -> String {
    let head = |data: &[u8]| escape_bytes(&data[..data.len().min(PREVIEW_BYTES)]);
    format!("{} {} {}", flow.key, head(&flow.forward), head(&flow.reverse))
}

fn clip(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let kept: String = s.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn draw(f: &mut Frame, app: &mut Browser) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(f.size());
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(rows[0]);

    let Some(flows) = &app.flows else {
        let text = match &app.error {
            Some(e) => Line::from(Span::styled(
                format!("failed to load capture: {e}"),
                Style::default().fg(Color::Red),
            )),
            None => Line::from(format!("reading capture... {} frames", app.frames_read)),
        };
        f.render_widget(
            Paragraph::new(text).block(Block::default().title(" flowshark ").borders(Borders::ALL)),
            rows[0],
        );
        f.render_widget(Paragraph::new("q quit"), rows[1]);
        return;
    };

    let width = (chunks[0].width as usize).saturating_sub(4);
    let items: Vec<ListItem> = app
        .visible
        .iter()
        .map(|&i| {
            let flow = &flows.flows()[i];
            let text = format!(
                "{} {}B",
                flow.key,
                flow.forward.len() + flow.reverse.len()
            );
            ListItem::new(clip(&text, width)).style(Style::default().fg(Color::Cyan))
        })
        .collect();
    let sidebar = List::new(items)
        .block(Block::default().title(" Flows ").borders(Borders::ALL))
        .highlight_style(
            Style::default()
                .add_modifier(Modifier::BOLD)
                .fg(Color::Yellow),
        )
        .highlight_symbol(">> ");
    f.render_stateful_widget(sidebar, chunks[0], &mut app.list_state);

    let detail = match app.selected() {
        Some(flow) => detail_lines(flow),
        None => vec![Line::from("no flow selected")],
    };
    let pane = Paragraph::new(detail)
        .block(Block::default().title(" Data ").borders(Borders::ALL))
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));
    f.render_widget(pane, chunks[1]);

    let status = if app.editing {
        format!("/{}_", app.filter)
    } else {
        format!(
            "{} of {} flows, {} issues | / filter  ↑↓ select  PgUp/PgDn scroll  q quit",
            app.visible.len(),
            flows.len(),
            flows.issues().len()
        )
    };
    f.render_widget(Paragraph::new(status), rows[1]);
}

fn detail_lines(flow: &Flow) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(format!(
        "{} -> {}  {} packets over {:.3}s",
        flow.initiator,
        flow.responder,
        flow.packets.len(),
        flow.duration().as_secs_f64()
    ))];
    for (title, data, color) in [
        ("forward", &flow.forward, Color::Yellow),
        ("reverse", &flow.reverse, Color::Green),
    ] {
        lines.push(Line::from(Span::styled(
            format!("── {title} ({} bytes) ──", data.len()),
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for text in escape_bytes(data).split('\n') {
            lines.push(Line::from(Span::styled(
                text.to_string(),
                Style::default().fg(color),
            )));
        }
    }
    lines
}

/// Printable ASCII and newlines as is, everything else escaped.
pub fn escape_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\n' => out.push('\n'),
            b'\r' => {}
            b'\t' => out.push('\t'),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}

/// Classic 16-bytes-per-row hex dump.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{:08x}  {:<47}  {ascii}\n", row * 16, hex.join(" ")));
    }
    out
}
