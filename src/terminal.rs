//! Terminal renderers for interactive runs.

use std::io::{self, Stdout, Write};

use crossterm::style::Stylize;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Gauge, Paragraph};
use ratatui::{Terminal, TerminalOptions, Viewport};

use crate::progress::{
    FetchObserver, FetchProgress, ProgressEvent, ProgressSink, WorkerProgress, percent,
};

/// One gauge per fetch worker plus a totals line, drawn in an inline viewport below
/// the cursor.
#[derive(Default)]
pub struct TerminalBars {
    terminal: Option<Terminal<CrosstermBackend<Stdout>>>,
    unavailable: bool,
}

impl TerminalBars {
    pub fn new() -> Self {
        Self::default()
    }

    fn terminal(&mut self, rows: usize) -> Option<&mut Terminal<CrosstermBackend<Stdout>>> {
        if self.terminal.is_none() && !self.unavailable {
            let height = u16::try_from(rows + 1).unwrap_or(u16::MAX);
            let options = TerminalOptions {
                viewport: Viewport::Inline(height),
            };
            match Terminal::with_options(CrosstermBackend::new(io::stdout()), options) {
                Ok(terminal) => self.terminal = Some(terminal),
                Err(err) => {
                    tracing::warn!(error = %err, "progress bars unavailable");
                    self.unavailable = true;
                }
            }
        }
        self.terminal.as_mut()
    }
}

impl FetchObserver for TerminalBars {
    fn update(&mut self, progress: &FetchProgress) {
        let workers = progress.workers();
        let Some(terminal) = self.terminal(workers.len()) else {
            return;
        };
        let drawn = terminal.draw(|frame| {
            let mut constraints = vec![Constraint::Length(1); workers.len()];
            constraints.push(Constraint::Length(1));
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints(constraints)
                .split(frame.area());

            for (worker, row) in workers.iter().zip(rows.iter()) {
                frame.render_widget(worker_gauge(worker), *row);
            }
            if let Some(last) = rows.last() {
                frame.render_widget(totals_line(progress), *last);
            }
        });
        if let Err(err) = drawn {
            tracing::debug!(error = %err, "progress redraw failed");
        }
    }

    fn finish(&mut self, progress: &FetchProgress) {
        self.update(progress);
        if self.terminal.take().is_some() {
            let mut stdout = io::stdout();
            let _ = writeln!(stdout);
            let _ = stdout.flush();
        }
    }
}

fn worker_gauge(worker: &WorkerProgress) -> Gauge<'static> {
    let color = match (worker.done, worker.failed) {
        (false, _) => Color::Cyan,
        (true, 0) => Color::Green,
        (true, _) => Color::Yellow,
    };
    let label = format!(
        "{} {}/{} ({} failed)",
        worker.label(),
        worker.attempted(),
        worker.total,
        worker.failed
    );
    let ratio = percent(worker.attempted(), worker.total) / 100.0;
    Gauge::default()
        .gauge_style(Style::default().fg(color))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label)
}

fn totals_line(progress: &FetchProgress) -> Paragraph<'static> {
    let attempted = progress.succeeded() + progress.failed();
    Paragraph::new(Line::from(vec![
        Span::styled(
            "Total ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("{attempted}/{} ", progress.total())),
        Span::styled(
            format!("{} ok ", progress.succeeded()),
            Style::default().fg(Color::Green),
        ),
        Span::styled(
            format!("{} failed", progress.failed()),
            Style::default().fg(Color::Yellow),
        ),
    ]))
}

/// Prints phase messages as dimmed status lines on stderr.
pub struct StatusLines;

impl ProgressSink for StatusLines {
    fn event(&self, event: ProgressEvent) {
        let line = match event.elapsed {
            Some(elapsed) => format!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => event.message,
        };
        eprintln!("{}", line.dark_grey());
    }
}
