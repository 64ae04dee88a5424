//! Watch-mode pane UI.
//!
//! A full-screen view owned by a dedicated render thread: one group of
//! four panes per package and a bottom row of package buttons. Producers
//! never touch widget state; they enqueue fragments through the channel
//! drained at the top of the render loop.

use std::io::Stdout;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{
    DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Terminal;
use tokio::sync::mpsc;

use crate::ansi::{style_spans, PaneBuf};
use crate::logger::{UiMsg, BUILD_PANES};
use crate::process::KillSet;

type UiTerminal = Terminal<CrosstermBackend<Stdout>>;

const TICK: Duration = Duration::from_millis(33);

struct PkgView {
    name: String,
    panes: Vec<(&'static str, PaneBuf)>,
}

impl PkgView {
    fn new(name: String) -> Self {
        let panes = BUILD_PANES
            .iter()
            .map(|&pane| (pane, PaneBuf::new()))
            .collect();
        PkgView { name, panes }
    }
}

fn init_terminal() -> Result<UiTerminal> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

fn restore_terminal(mut terminal: UiTerminal) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Render-thread entry point. Returns when a shutdown message arrives;
/// exits the whole process on the exit keybindings.
pub fn run(
    mut rx: mpsc::UnboundedReceiver<UiMsg>,
    packages: Vec<String>,
    visible: usize,
    kills: KillSet,
) -> Result<()> {
    let mut views = packages.into_iter().map(PkgView::new).collect::<Vec<_>>();
    let mut selected = visible.min(views.len().saturating_sub(1));
    let mut buttons: Vec<Rect> = Vec::new();
    let mut terminal = init_terminal()?;
    let mut last_draw = Instant::now() - TICK;

    'outer: loop {
        loop {
            match rx.try_recv() {
                Ok(UiMsg::Chunk { pkg, pane, data }) => {
                    if let Some(view) = views.iter_mut().find(|v| v.name == pkg) {
                        if let Some((_, buf)) = view.panes.iter_mut().find(|(p, _)| *p == pane) {
                            buf.append(&data);
                        }
                    }
                }
                Ok(UiMsg::Shutdown) => break 'outer,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => break 'outer,
            }
        }

        if crossterm::event::poll(Duration::from_millis(25))? {
            match crossterm::event::read()? {
                Event::Key(key) => {
                    if is_exit_key(&key) {
                        // Same shutdown path as SIGINT: no child survives.
                        kills.kill_all();
                        let _ = restore_terminal(terminal);
                        std::process::exit(130);
                    }
                    match key.code {
                        KeyCode::Left => {
                            selected = selected
                                .checked_sub(1)
                                .unwrap_or(views.len().saturating_sub(1));
                        }
                        KeyCode::Right => selected = (selected + 1) % views.len().max(1),
                        _ => {}
                    }
                }
                Event::Mouse(mouse) => {
                    if let Some(hit) = button_hit(&buttons, &mouse) {
                        selected = hit;
                    }
                }
                Event::Resize(..) => {
                    terminal.autoresize()?;
                }
                _ => {}
            }
        }

        if last_draw.elapsed() >= TICK {
            terminal.draw(|frame| {
                buttons = draw(frame, &views, selected);
            })?;
            last_draw = Instant::now();
        }
    }

    restore_terminal(terminal)
}

fn is_exit_key(key: &KeyEvent) -> bool {
    matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
}

fn button_hit(buttons: &[Rect], mouse: &MouseEvent) -> Option<usize> {
    if mouse.kind != MouseEventKind::Down(MouseButton::Left) {
        return None;
    }
    buttons.iter().position(|rect| {
        mouse.column >= rect.x
            && mouse.column < rect.x + rect.width
            && mouse.row >= rect.y
            && mouse.row < rect.y + rect.height
    })
}

/// Draws the visible package's pane grid and the button strip; returns the
/// button rectangles for click mapping.
fn draw(frame: &mut ratatui::Frame<'_>, views: &[PkgView], selected: usize) -> Vec<Rect> {
    let area = frame.size();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(3)])
        .split(area);

    if let Some(view) = views.get(selected) {
        draw_panes(frame, view, rows[0]);
    }

    draw_buttons(frame, views, selected, rows[1])
}

fn draw_panes(frame: &mut ratatui::Frame<'_>, view: &PkgView, area: Rect) {
    // Reading order, two columns; the top row gets two thirds of the
    // height.
    let halves = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Ratio(2, 3), Constraint::Ratio(1, 3)])
        .split(area);
    let slots = halves.iter().flat_map(|&half| {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
            .split(half)
            .to_vec()
    });

    for ((pane, buf), slot) in view.panes.iter().zip(slots) {
        let block = Block::default().title(*pane).borders(Borders::ALL);
        let inner = block.inner(slot);
        let height = inner.height as usize;

        let lines = buf.lines();
        let start = lines.len().saturating_sub(height);
        let text = lines[start..]
            .iter()
            .map(|line| Line::from(style_spans(line)))
            .collect::<Vec<_>>();

        frame.render_widget(Paragraph::new(text).block(block), slot);
    }
}

fn draw_buttons(
    frame: &mut ratatui::Frame<'_>,
    views: &[PkgView],
    selected: usize,
    area: Rect,
) -> Vec<Rect> {
    let width = views
        .iter()
        .map(|view| view.name.chars().count())
        .max()
        .unwrap_or(0) as u16
        + 4;
    let constraints = views
        .iter()
        .map(|_| Constraint::Length(width))
        .chain(std::iter::once(Constraint::Min(0)))
        .collect::<Vec<_>>();
    let slots = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(area);

    let mut buttons = Vec::with_capacity(views.len());
    for (index, view) in views.iter().enumerate() {
        let style = if index == selected {
            Style::default().bg(Color::Green).fg(Color::Black)
        } else {
            Style::default().bg(Color::Black)
        };
        let button = Paragraph::new(view.name.as_str())
            .style(style)
            .block(Block::default().borders(Borders::ALL));
        frame.render_widget(button, slots[index]);
        buttons.push(slots[index]);
    }
    buttons
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mouse_down(column: u16, row: u16) -> MouseEvent {
        MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    #[test]
    fn button_hit_maps_click_to_package() {
        let buttons = vec![Rect::new(0, 20, 10, 3), Rect::new(10, 20, 10, 3)];
        assert_eq!(button_hit(&buttons, &mouse_down(3, 21)), Some(0));
        assert_eq!(button_hit(&buttons, &mouse_down(12, 21)), Some(1));
        assert_eq!(button_hit(&buttons, &mouse_down(25, 21)), None);
        assert_eq!(button_hit(&buttons, &mouse_down(3, 1)), None);
    }

    #[test]
    fn exit_keys() {
        let plain = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert!(is_exit_key(&plain(KeyCode::Char('q'))));
        assert!(is_exit_key(&plain(KeyCode::Esc)));
        assert!(is_exit_key(&KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL
        )));
        assert!(!is_exit_key(&plain(KeyCode::Char('x'))));
    }

    #[test]
    fn pkg_view_has_the_fixed_pane_set() {
        let view = PkgView::new("foo".into());
        let names = view.panes.iter().map(|(name, _)| *name).collect::<Vec<_>>();
        assert_eq!(names, BUILD_PANES);
    }
}
