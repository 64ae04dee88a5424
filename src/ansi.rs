//! ANSI handling for log panes.
//!
//! Child processes write byte chunks that may contain color codes and the
//! progress-refresh sequences common to watch-mode tools. [`PaneBuf`]
//! interprets the small set needed for a live pane (erase-line,
//! cursor-home, carriage return) while keeping SGR color codes in the
//! stored text; [`style_spans`] turns a stored line into styled ratatui
//! spans at render time. A full terminal emulator is deliberately avoided.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Span;

const DEFAULT_MAX_LINES: usize = 500;

/// A bounded line buffer fed raw chunks from one child process.
#[derive(Debug)]
pub struct PaneBuf {
    lines: Vec<String>,
    max_lines: usize,
    pending_cr: bool,
    stash: String,
}

impl PaneBuf {
    pub fn new() -> Self {
        PaneBuf {
            lines: Vec::new(),
            max_lines: DEFAULT_MAX_LINES,
            pending_cr: false,
            stash: String::new(),
        }
    }

    #[cfg(test)]
    fn with_max_lines(max_lines: usize) -> Self {
        PaneBuf {
            max_lines,
            ..Self::new()
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Appends a raw chunk. Chunk boundaries are arbitrary: escape
    /// sequences split across chunks are stitched back together.
    pub fn append(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk).into_owned();
        let data = if self.stash.is_empty() {
            text
        } else {
            std::mem::take(&mut self.stash) + &text
        };

        let mut chars = data.char_indices().peekable();
        while let Some((at, ch)) = chars.next() {
            if self.pending_cr {
                self.pending_cr = false;
                // A bare carriage return overwrites the line from column 0;
                // CRLF is an ordinary line ending.
                if ch != '\n' {
                    self.current_line().clear();
                }
            }
            match ch {
                '\u{1b}' => {
                    if !self.consume_escape(&mut chars) {
                        // Sequence continues in the next chunk.
                        self.stash = data[at..].to_string();
                        return;
                    }
                }
                '\n' => {
                    self.lines.push(String::new());
                    if self.lines.len() > self.max_lines {
                        self.lines.remove(0);
                    }
                }
                '\r' => self.pending_cr = true,
                _ => self.current_line().push(ch),
            }
        }
    }

    fn current_line(&mut self) -> &mut String {
        if self.lines.is_empty() {
            self.lines.push(String::new());
        }
        self.lines.last_mut().expect("just pushed")
    }

    /// Consumes one escape sequence from `chars`. Returns false when the
    /// sequence is cut off by the chunk boundary.
    fn consume_escape(
        &mut self,
        chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    ) -> bool {
        match chars.peek().map(|&(_, c)| c) {
            Some('[') => {
                chars.next();
                let mut params = String::new();
                loop {
                    match chars.next() {
                        Some((_, c)) if ('@'..='~').contains(&c) => {
                            self.apply_csi(&params, c);
                            return true;
                        }
                        Some((_, c)) => params.push(c),
                        None => return false,
                    }
                }
            }
            Some(']') => {
                // OSC (e.g. window title): skip to BEL or ST.
                chars.next();
                loop {
                    match chars.next() {
                        Some((_, '\u{7}')) => return true,
                        Some((_, '\u{1b}')) => {
                            if chars.peek().map(|&(_, c)| c) == Some('\\') {
                                chars.next();
                                return true;
                            }
                        }
                        Some(_) => {}
                        None => return false,
                    }
                }
            }
            Some(_) => {
                chars.next();
                true
            }
            None => false,
        }
    }

    fn apply_csi(&mut self, params: &str, final_byte: char) {
        match final_byte {
            // Keep colors in the stored line for the renderer.
            'm' => {
                let line = self.current_line();
                line.push('\u{1b}');
                line.push('[');
                line.push_str(params);
                line.push('m');
            }
            // Erase-line: progress meters clear before redrawing.
            'K' => self.current_line().clear(),
            // Cursor-home and other cursor movement are stripped.
            _ => {}
        }
    }
}

/// Splits a stored line into ratatui spans, applying its SGR codes.
pub fn style_spans(line: &str) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    let mut buffer = String::new();
    let mut style = Style::default();
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            let mut params = String::new();
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    if c == 'm' {
                        if !buffer.is_empty() {
                            spans.push(Span::styled(std::mem::take(&mut buffer), style));
                        }
                        style = apply_sgr(style, &params);
                    }
                    break;
                }
                params.push(c);
            }
            continue;
        }
        buffer.push(ch);
    }
    if !buffer.is_empty() {
        spans.push(Span::styled(buffer, style));
    }
    spans
}

fn apply_sgr(mut style: Style, params: &str) -> Style {
    let codes: Vec<u16> = if params.is_empty() {
        vec![0]
    } else {
        params
            .split(';')
            .map(|part| part.parse::<u16>().unwrap_or(0))
            .collect()
    };

    let mut codes = codes.into_iter().peekable();
    while let Some(code) = codes.next() {
        style = match code {
            0 => Style::default(),
            1 => style.add_modifier(Modifier::BOLD),
            2 => style.add_modifier(Modifier::DIM),
            3 => style.add_modifier(Modifier::ITALIC),
            4 => style.add_modifier(Modifier::UNDERLINED),
            22 => style.remove_modifier(Modifier::BOLD | Modifier::DIM),
            23 => style.remove_modifier(Modifier::ITALIC),
            24 => style.remove_modifier(Modifier::UNDERLINED),
            30..=37 => style.fg(base_color(code - 30, false)),
            90..=97 => style.fg(base_color(code - 90, true)),
            40..=47 => style.bg(base_color(code - 40, false)),
            100..=107 => style.bg(base_color(code - 100, true)),
            39 => Style { fg: None, ..style },
            49 => Style { bg: None, ..style },
            38 | 48 => {
                let color = match codes.next() {
                    Some(5) => codes
                        .next()
                        .and_then(|n| u8::try_from(n).ok())
                        .map(Color::Indexed),
                    Some(2) => {
                        let mut part = || codes.next().and_then(|n| u8::try_from(n).ok());
                        match (part(), part(), part()) {
                            (Some(r), Some(g), Some(b)) => Some(Color::Rgb(r, g, b)),
                            _ => None,
                        }
                    }
                    _ => None,
                };
                match (code, color) {
                    (38, Some(color)) => style.fg(color),
                    (48, Some(color)) => style.bg(color),
                    _ => style,
                }
            }
            _ => style,
        };
    }
    style
}

fn base_color(index: u16, bright: bool) -> Color {
    match (index, bright) {
        (0, false) => Color::Black,
        (1, false) => Color::Red,
        (2, false) => Color::Green,
        (3, false) => Color::Yellow,
        (4, false) => Color::Blue,
        (5, false) => Color::Magenta,
        (6, false) => Color::Cyan,
        (7, false) => Color::Gray,
        (0, true) => Color::DarkGray,
        (1, true) => Color::LightRed,
        (2, true) => Color::LightGreen,
        (3, true) => Color::LightYellow,
        (4, true) => Color::LightBlue,
        (5, true) => Color::LightMagenta,
        (6, true) => Color::LightCyan,
        _ => Color::White,
    }
}
