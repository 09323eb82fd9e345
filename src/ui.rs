use std::collections::hash_map::DefaultHasher;
use std::env;
use std::hash::{Hash, Hasher};
use std::io::{self, Cursor, Stdout, Write};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use crossterm::cursor::MoveTo;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseEventKind,
};
use crossterm::style::Print;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, window_size, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use image::{DynamicImage, ImageFormat};
use percent_encoding::percent_decode_str;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Padding, Paragraph};
use ratatui::{Frame, Terminal};
use textwrap::wrap;
use url::Url;

use crate::app::FeedEntry;

const KITTY_CHUNK_SIZE: usize = 4096;
const FALLBACK_CELL_WIDTH: f64 = 8.0;
const FALLBACK_CELL_HEIGHT: f64 = 16.0;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_BORDER: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);

pub struct Options {
    pub subreddit: String,
    pub entries: Vec<FeedEntry>,
    pub status_message: String,
    pub inline_images: bool,
}

#[derive(Clone)]
struct KittyImage {
    id: u32,
    transmit_chunks: Vec<String>,
    transmitted: bool,
    wrap_tmux: bool,
}

impl KittyImage {
    fn ensure_transmitted<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if self.transmitted {
            return Ok(());
        }
        for chunk in &self.transmit_chunks {
            writer.write_all(chunk.as_bytes())?;
        }
        writer.flush()?;
        self.transmitted = true;
        Ok(())
    }

    fn placement_sequence(&self, cols: u16, rows: u16) -> String {
        let base = format!(
            "\x1b_Ga=p,q=2,C=1,i={},p=1,c={},r={};\x1b\\",
            self.id, cols, rows
        );
        self.wrap(base)
    }

    /// Removes the placement but keeps the image data on the terminal side.
    fn hide_sequence(&self) -> String {
        self.wrap(format!("\x1b_Ga=d,d=i,q=2,i={};\x1b\\", self.id))
    }

    /// Removes placement and image data.
    fn free_sequence(&self) -> String {
        self.wrap(format!("\x1b_Ga=d,d=I,q=2,i={};\x1b\\", self.id))
    }

    fn wrap(&self, base: String) -> String {
        if self.wrap_tmux {
            format!("\x1bPtmux;\x1b{base}\x1b\\")
        } else {
            base
        }
    }
}

/// Where an entry's image sits inside the scrolled content.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
struct MediaLayout {
    line_offset: usize,
    cols: u16,
    rows: u16,
}

#[derive(Clone, Copy)]
struct CellMetrics {
    width: f64,
    height: f64,
}

fn terminal_cell_metrics() -> CellMetrics {
    static METRICS: OnceLock<CellMetrics> = OnceLock::new();
    *METRICS.get_or_init(|| {
        window_size().ok().map_or(
            CellMetrics {
                width: FALLBACK_CELL_WIDTH,
                height: FALLBACK_CELL_HEIGHT,
            },
            |size| {
                let columns = size.columns.max(1) as f64;
                let rows = size.rows.max(1) as f64;
                let width = if size.width > 0 {
                    f64::from(size.width) / columns
                } else {
                    FALLBACK_CELL_WIDTH
                };
                let height = if size.height > 0 {
                    f64::from(size.height) / rows
                } else {
                    FALLBACK_CELL_HEIGHT
                };
                CellMetrics { width, height }
            },
        )
    })
}

/// Cell box for a `width`x`height` pixel image, shrunk to fit `max_cols`.
fn image_cells(width: u32, height: u32, max_cols: u16, metrics: CellMetrics) -> (u16, u16) {
    let cell_width = metrics.width.max(1.0);
    let cell_height = metrics.height.max(1.0);
    let mut cols = (f64::from(width.max(1)) / cell_width).ceil();
    let mut rows = (f64::from(height.max(1)) / cell_height).ceil();
    let max_cols = f64::from(max_cols.max(1));
    if cols > max_cols {
        rows = (rows * max_cols / cols).ceil();
        cols = max_cols;
    }
    (cols.max(1.0) as u16, rows.max(1.0) as u16)
}

pub struct Viewer {
    subreddit: String,
    entries: Vec<FeedEntry>,
    kitty: Vec<Option<KittyImage>>,
    layouts: Vec<MediaLayout>,
    content: Text<'static>,
    layout_width: u16,
    scroll: usize,
    view_height: u16,
    content_area: Option<Rect>,
    status_message: String,
    needs_redraw: bool,
    needs_kitty_flush: bool,
    placed: Vec<usize>,
}

impl Viewer {
    pub fn new(opts: Options) -> Self {
        let wrap_tmux = tmux_passthrough_enabled();
        let kitty = opts
            .entries
            .iter()
            .map(|entry| {
                if !opts.inline_images {
                    return None;
                }
                let id = kitty_image_id(&entry.post.title, &entry.post.url);
                match kitty_transmit_inline(&entry.image.image, id, wrap_tmux) {
                    Ok(image) => Some(image),
                    Err(err) => {
                        log::warn!("inline preview for {} failed: {:#}", entry.post.url, err);
                        None
                    }
                }
            })
            .collect();

        Self {
            subreddit: opts.subreddit,
            entries: opts.entries,
            kitty,
            layouts: Vec::new(),
            content: Text::default(),
            layout_width: 0,
            scroll: 0,
            view_height: 0,
            content_area: None,
            status_message: opts.status_message,
            needs_redraw: true,
            needs_kitty_flush: false,
            placed: Vec::new(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        let restored = self.shutdown(terminal.backend_mut(), restore_terminal);
        let cursor = terminal.show_cursor();
        result?;
        restored?;
        cursor?;
        Ok(())
    }

    /// Frees inline images, then restores the terminal even if freeing failed.
    fn shutdown<W: Write>(
        &mut self,
        out: &mut W,
        restore: impl FnOnce(&mut W) -> Result<()>,
    ) -> Result<()> {
        let freed = self.free_inline_images(out);
        let restored = restore(out);
        freed.and(restored)
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.flush_inline_images(terminal.backend_mut())?;
                self.needs_redraw = false;
            }

            if !event::poll(Duration::from_millis(200))? {
                continue;
            }
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if self.handle_key(key.code) {
                        break;
                    }
                }
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::ScrollDown => self.scroll_by(3),
                    MouseEventKind::ScrollUp => self.scroll_by(-3),
                    _ => {}
                },
                Event::Resize(_, _) => self.mark_dirty(),
                _ => {}
            }
        }
        Ok(())
    }

    /// Returns true when the viewer should close.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        let page = i64::from(self.view_height.max(2) - 1);
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('j') | KeyCode::Down => self.scroll_by(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_by(-1),
            KeyCode::PageDown | KeyCode::Char(' ') => self.scroll_by(page),
            KeyCode::PageUp => self.scroll_by(-page),
            KeyCode::Char('g') | KeyCode::Home => self.scroll_to(0),
            KeyCode::Char('G') | KeyCode::End => self.scroll_to(usize::MAX),
            _ => {}
        }
        false
    }

    fn scroll_by(&mut self, delta: i64) {
        let target = if delta < 0 {
            self.scroll.saturating_sub(delta.unsigned_abs() as usize)
        } else {
            self.scroll.saturating_add(delta as usize)
        };
        self.scroll_to(target);
    }

    fn scroll_to(&mut self, target: usize) {
        let clamped = target.min(self.max_scroll());
        if clamped != self.scroll {
            self.scroll = clamped;
            self.mark_dirty();
        }
    }

    fn max_scroll(&self) -> usize {
        self.content
            .lines
            .len()
            .saturating_sub(usize::from(self.view_height.max(1)))
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
        self.needs_kitty_flush = true;
    }

    /// Lays entries out as: wrapped bold title, image rows, blank separator.
    fn rebuild_content(&mut self, width: u16, metrics: CellMetrics) {
        let wrap_width = usize::from(width.max(1));
        let mut lines: Vec<Line<'static>> = Vec::new();
        let mut layouts = Vec::with_capacity(self.entries.len());

        if self.entries.is_empty() {
            lines.push(Line::from(Span::styled(
                format!("No images found in r/{}", self.subreddit),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }

        for (index, entry) in self.entries.iter().enumerate() {
            let title_style = Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD);
            for part in wrap(&entry.post.title, wrap_width) {
                lines.push(Line::from(Span::styled(part.into_owned(), title_style)));
            }

            let line_offset = lines.len();
            if self.kitty[index].is_some() {
                let (cols, rows) =
                    image_cells(entry.image.width(), entry.image.height(), width, metrics);
                for _ in 0..rows {
                    lines.push(Line::default());
                }
                layouts.push(MediaLayout {
                    line_offset,
                    cols,
                    rows,
                });
            } else {
                let label = format!(
                    "[image: {} {}x{}]",
                    image_label(&entry.post.url),
                    entry.image.width(),
                    entry.image.height()
                );
                lines.push(Line::from(Span::styled(
                    label,
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )));
                layouts.push(MediaLayout {
                    line_offset,
                    cols: 0,
                    rows: 0,
                });
            }
            lines.push(Line::default());
        }

        self.content = Text::from(lines);
        self.layouts = layouts;
        self.layout_width = width;
        self.needs_kitty_flush = true;
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let area = frame.size();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(1)])
            .split(area);

        let title = format!(" r/{} · {} images ", self.subreddit, self.entries.len());
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER))
            .title(Span::styled(
                title,
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .padding(Padding::horizontal(1))
            .style(Style::default().bg(COLOR_BG));
        let inner = block.inner(chunks[0]);
        if inner.width != self.layout_width {
            self.rebuild_content(inner.width, terminal_cell_metrics());
        }
        self.view_height = inner.height;
        self.scroll = self.scroll.min(self.max_scroll());
        self.content_area = Some(inner);

        let scroll = u16::try_from(self.scroll).unwrap_or(u16::MAX);
        let body = Paragraph::new(self.content.clone())
            .block(block)
            .scroll((scroll, 0));
        frame.render_widget(body, chunks[0]);

        let footer = Paragraph::new(self.status_message.clone())
            .style(Style::default().fg(COLOR_TEXT_SECONDARY).bg(COLOR_BG));
        frame.render_widget(footer, chunks[1]);
    }

    /// Images that fit entirely inside the visible window, with their
    /// screen position.
    fn visible_images(&self) -> Vec<(usize, u16, u16)> {
        let Some(area) = self.content_area else {
            return Vec::new();
        };
        let top = self.scroll;
        let bottom = self.scroll + usize::from(area.height);
        self.layouts
            .iter()
            .enumerate()
            .filter(|(index, layout)| self.kitty[*index].is_some() && layout.rows > 0)
            .filter(|(_, layout)| {
                layout.line_offset >= top && layout.line_offset + usize::from(layout.rows) <= bottom
            })
            .map(|(index, layout)| {
                let row = area.y + (layout.line_offset - top) as u16;
                (index, area.x, row)
            })
            .collect()
    }

    fn flush_inline_images<W: Write>(&mut self, backend: &mut W) -> Result<()> {
        if !self.needs_kitty_flush {
            return Ok(());
        }
        self.needs_kitty_flush = false;

        for index in self.placed.drain(..) {
            if let Some(kitty) = &self.kitty[index] {
                backend.write_all(kitty.hide_sequence().as_bytes())?;
            }
        }

        for (index, col, row) in self.visible_images() {
            let layout = self.layouts[index];
            let Some(kitty) = self.kitty[index].as_mut() else {
                continue;
            };
            kitty.ensure_transmitted(backend)?;
            let sequence = kitty.placement_sequence(layout.cols, layout.rows);
            crossterm::queue!(backend, MoveTo(col, row), Print(sequence))?;
            self.placed.push(index);
        }
        backend.flush()?;
        Ok(())
    }

    fn free_inline_images<W: Write>(&mut self, backend: &mut W) -> Result<()> {
        for kitty in self.kitty.iter().flatten() {
            if kitty.transmitted {
                backend.write_all(kitty.free_sequence().as_bytes())?;
            }
        }
        self.placed.clear();
        backend.flush()?;
        Ok(())
    }
}

fn restore_terminal<W: Write>(out: &mut W) -> Result<()> {
    disable_raw_mode()?;
    out.execute(DisableMouseCapture)?;
    out.execute(LeaveAlternateScreen)?;
    Ok(())
}

fn kitty_image_id(title: &str, url: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    title.hash(&mut hasher);
    url.hash(&mut hasher);
    // zero is reserved by the protocol
    (hasher.finish() as u32).max(1)
}

fn kitty_transmit_inline(image: &DynamicImage, image_id: u32, wrap_tmux: bool) -> Result<KittyImage> {
    let mut png_data = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png_data), ImageFormat::Png)
        .context("encode preview as png")?;
    let encoded = general_purpose::STANDARD.encode(&png_data);
    if encoded.is_empty() {
        bail!("failed to encode image preview");
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut offset = 0;
    while offset < encoded.len() {
        let end = usize::min(offset + KITTY_CHUNK_SIZE, encoded.len());
        let more = if end < encoded.len() { 1 } else { 0 };
        let mut out = String::new();
        if wrap_tmux {
            out.push_str("\x1bPtmux;\x1b");
        }
        if offset == 0 {
            out.push_str(&format!("\x1b_Ga=t,q=2,i={},f=100,m={more};", image_id));
        } else {
            out.push_str(&format!("\x1b_Gm={more};"));
        }
        out.push_str(&encoded[offset..end]);
        out.push_str("\x1b\\");
        if wrap_tmux {
            out.push_str("\x1b\\");
        }
        chunks.push(out);
        offset = end;
    }

    Ok(KittyImage {
        id: image_id,
        transmit_chunks: chunks,
        transmitted: false,
        wrap_tmux,
    })
}

fn image_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(|segment| percent_decode_str(segment).decode_utf8_lossy().to_string())
        })
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| "media".to_string())
}

fn env_truthy(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes" | "YES"))
        .unwrap_or(false)
}

fn env_present(key: &str) -> bool {
    env::var(key).map(|v| !v.is_empty()).unwrap_or(false)
}

fn tmux_passthrough_enabled() -> bool {
    env_present("TMUX")
}

fn running_inside_tmux() -> bool {
    if env_present("TMUX") || env_present("TMUX_PANE") {
        return true;
    }
    env::var("TERM")
        .map(|term| term.to_ascii_lowercase().contains("tmux"))
        .unwrap_or(false)
}

/// Whether the terminal speaks the Kitty graphics protocol.
pub fn is_kitty_terminal() -> bool {
    if env_truthy("REDDIT_IMAGE_FEED_DISABLE_KITTY") {
        return false;
    }
    if env_truthy("REDDIT_IMAGE_FEED_FORCE_KITTY") {
        return true;
    }
    if running_inside_tmux() {
        return false;
    }
    if env_present("KITTY_WINDOW_ID") || env_present("WEZTERM_PANE") {
        return true;
    }
    if env::var("TERM_PROGRAM")
        .map(|term| term.to_lowercase().contains("wezterm"))
        .unwrap_or(false)
    {
        return true;
    }
    env::var("TERM")
        .map(|term| {
            let lower = term.to_lowercase();
            lower.contains("kitty") || lower.contains("wezterm")
        })
        .unwrap_or(false)
}
