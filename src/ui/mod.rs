use std::sync::OnceLock;
use std::time::Instant;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, Popup};
use crate::sim::Platform;
use crate::theme::Theme;

// Set once at startup from the config's overrides
static THEME: OnceLock<Theme> = OnceLock::new();

pub fn init_theme(theme: Theme) {
    if THEME.set(theme).is_err() {
        tracing::debug!("Theme already initialized");
    }
}

fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::default)
}

fn bg() -> Color { theme().bg }
fn terminal_fg() -> Color { theme().terminal }
fn heading() -> Color { theme().heading }
fn thought() -> Color { theme().thought }
fn godmode() -> Color { theme().godmode }
fn input_bg() -> Color { theme().input_bg }
fn border() -> Color { theme().border }
fn border_active() -> Color { theme().border_active }
fn danger() -> Color { theme().danger }
fn text_dim() -> Color { theme().text_dim }
fn debug() -> Color { theme().debug }
fn bg_selected() -> Color { theme().bg_selected }

const CURSOR: &str = "█";

pub fn draw(f: &mut Frame, app: &App) {
    let area = f.area();
    f.render_widget(Block::default().style(Style::default().bg(bg())), area);

    let debug_height = if app.show_debug && area.height >= 20 {
        Constraint::Length(8)
    } else {
        Constraint::Length(0)
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(0)
        .constraints([
            Constraint::Length(1), // Title bar
            Constraint::Length(1), // Info line
            Constraint::Min(6),    // Terminal + thoughts
            debug_height,          // API status log
            Constraint::Length(1), // Footer
        ])
        .split(area);

    draw_title(f, app, chunks[0]);
    draw_info_line(f, app, chunks[1]);

    // Narrow terminals stack the panes
    let direction = if area.width < 80 { Direction::Vertical } else { Direction::Horizontal };
    let body = Layout::default()
        .direction(direction)
        .constraints([Constraint::Ratio(2, 3), Constraint::Ratio(1, 3)])
        .split(chunks[2]);

    draw_terminal(f, app, body[0]);

    let input_height = (app.input.lines().count().max(1) as u16 + 2).clamp(3, 7);
    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(input_height)])
        .split(body[1]);

    draw_thoughts(f, app, side[0]);
    draw_godmode_input(f, app, side[1]);

    if app.show_debug && chunks[3].height > 0 {
        draw_debug_log(f, app, chunks[3]);
    }
    draw_footer(f, app, chunks[4]);

    // Draw popups on top
    match app.popup {
        Popup::None => {}
        Popup::Help => draw_help_popup(f),
        Popup::Platform => draw_platform_popup(f, app),
    }
}

fn draw_title(f: &mut Frame, app: &App, area: Rect) {
    let line = Line::from(vec![
        Span::styled(
            "HackerSim - Autonomous Hacker Terminal",
            Style::default().fg(heading()).add_modifier(Modifier::BOLD),
        ),
        Span::styled(" │ ", Style::default().fg(text_dim())),
        Span::styled(app.backend_name().to_string(), Style::default().fg(terminal_fg())),
        Span::styled(" │ ", Style::default().fg(text_dim())),
        Span::styled(app.engine.platform().label(), Style::default().fg(terminal_fg())),
        Span::styled(if app.sound { " │ ♪" } else { "" }, Style::default().fg(text_dim())),
    ]);

    f.render_widget(Paragraph::new(line).alignment(Alignment::Center), area);
}

fn draw_info_line(f: &mut Frame, app: &App, area: Rect) {
    // Priority: status message > engine phase
    let line = if let Some(ref status) = app.status_message {
        Line::from(Span::styled(status.as_str(), Style::default().fg(godmode())))
    } else {
        let mut spans = vec![Span::styled(
            app.engine.status(Instant::now()),
            Style::default().fg(text_dim()),
        )];
        if let Some(influence) = app.engine.influence() {
            spans.push(Span::styled(" │ ", Style::default().fg(text_dim())));
            spans.push(Span::styled(
                format!("GodMode pending: {}", influence.replace('\n', " ")),
                Style::default().fg(godmode()),
            ));
        }
        Line::from(spans)
    };

    f.render_widget(Paragraph::new(line).alignment(Alignment::Center), area);
}

fn pane_block(title: &str, active: bool) -> Block<'_> {
    let color = if active { border_active() } else { border() };
    Block::default()
        .title(Span::styled(
            format!(" {} ", title),
            Style::default().fg(heading()).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
}

fn draw_terminal(f: &mut Frame, app: &App, area: Rect) {
    let title = if app.scroll > 0 {
        format!("Terminal [+{}]", app.scroll)
    } else {
        "Terminal".to_string()
    };
    let block = pane_block(&title, !app.engine.thought_streaming());
    let inner = block.inner(area);

    let mut text = app.terminal.clone();
    if app.scroll == 0 {
        text.push_str(CURSOR);
    }

    let lines: Vec<Line> = wrap_tail(&text, inner.width as usize, inner.height as usize, app.scroll)
        .into_iter()
        .map(|row| {
            let color = if row.starts_with("[!]") { danger() } else { terminal_fg() };
            Line::from(Span::styled(row, Style::default().fg(color)))
        })
        .collect();

    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_thoughts(f: &mut Frame, app: &App, area: Rect) {
    let block = pane_block("Hacker Thoughts", app.engine.thought_streaming());
    let inner = block.inner(area);

    let mut text = app.thoughts.clone();
    if app.engine.thought_streaming() {
        text.push_str(CURSOR);
    }

    let lines: Vec<Line> = wrap_tail(&text, inner.width as usize, inner.height as usize, 0)
        .into_iter()
        .map(|row| {
            let style = if row.starts_with("[GodMode Command:") {
                Style::default().fg(godmode()).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(thought()).add_modifier(Modifier::ITALIC)
            };
            Line::from(Span::styled(row, style))
        })
        .collect();

    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_godmode_input(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(Span::styled(
            " GodMode ",
            Style::default().fg(godmode()).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(godmode()))
        .style(Style::default().bg(input_bg()));
    let inner = block.inner(area);

    let lines: Vec<Line> = if app.input.is_empty() {
        vec![Line::from(vec![
            Span::styled("> ", Style::default().fg(godmode())),
            Span::styled("Influence the hacker's next move...", Style::default().fg(text_dim())),
        ])]
    } else {
        let text = format!("> {}{}", app.input, CURSOR);
        wrap_tail(&text, inner.width as usize, inner.height as usize, 0)
            .into_iter()
            .map(|row| Line::from(Span::styled(row, Style::default().fg(godmode()))))
            .collect()
    };

    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_debug_log(f: &mut Frame, app: &App, area: Rect) {
    let block = pane_block("API Status", false);
    let inner = block.inner(area);

    let log: Vec<&str> = app.engine.debug_log().collect();
    let skip = log.len().saturating_sub(inner.height as usize);
    let lines: Vec<Line> = log
        .into_iter()
        .skip(skip)
        .map(|l| Line::from(Span::styled(l, Style::default().fg(debug()))))
        .collect();

    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_footer(f: &mut Frame, app: &App, area: Rect) {
    let hints: Vec<(&str, &str)> = match app.popup {
        Popup::Platform => vec![("↑↓", "Select"), ("Enter", "Apply"), ("Esc", "Cancel")],
        _ => vec![
            ("Enter", "GodMode"),
            ("Alt+Enter", "Newline"),
            ("PgUp/PgDn", "Scroll"),
            ("F4", "Platform"),
            ("F2", "Sound"),
            ("F3", "Log"),
            ("F1", "Help"),
            ("^Q", "Quit"),
        ],
    };

    // Responsive: show fewer hints on narrow terminals
    let max_hints = if area.width < 60 { 3 } else if area.width < 100 { 5 } else { hints.len() };

    let hint_spans: Vec<Span> = hints
        .iter()
        .take(max_hints)
        .flat_map(|(key, action)| {
            vec![
                Span::styled(*key, Style::default().fg(heading())),
                Span::styled(format!(" {} │ ", action), Style::default().fg(text_dim())),
            ]
        })
        .collect();

    f.render_widget(Paragraph::new(Line::from(hint_spans)).alignment(Alignment::Center), area);
}

fn help_heading(title: &str) -> Line<'static> {
    Line::from(Span::styled(
        format!("═══ {} ═══", title),
        Style::default().fg(heading()).add_modifier(Modifier::BOLD),
    ))
}

fn help_row(key: &'static str, text: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("  {:<12}", key), Style::default().fg(godmode())),
        Span::styled(text, Style::default().fg(terminal_fg())),
    ])
}

fn draw_help_popup(f: &mut Frame) {
    let area = f.area();
    let popup_area = centered_rect(
        if area.width < 80 { 95 } else { 65 },
        if area.height < 30 { 95 } else { 75 },
        area,
    );

    f.render_widget(Clear, popup_area);

    let help_text = vec![
        help_heading("GodMode"),
        help_row("type", "Write a command or an intent"),
        help_row("Enter", "Send it. The hacker weaves it into the next move"),
        help_row("Alt+Enter", "New line in the input"),
        help_row("Esc", "Clear the input"),
        Line::from(Span::styled(
            "              Keywords like scan, exploit, brute or shell",
            Style::default().fg(text_dim()),
        )),
        Line::from(Span::styled(
            "              pick a matching attack; anything else runs as typed",
            Style::default().fg(text_dim()),
        )),
        Line::from(""),
        help_heading("View"),
        help_row("PgUp/PgDn", "Scroll the terminal"),
        help_row("End", "Follow the live output"),
        help_row("F3", "Toggle the API status log"),
        Line::from(""),
        help_heading("Session"),
        help_row("F4", "Choose the target platform"),
        help_row("F2", "Toggle the bell after each command"),
        help_row("Ctrl+Q", "Quit"),
        Line::from(""),
        help_heading("Command Line"),
        help_row("--backend", "playbook (offline) or remote (LLM)"),
        help_row("--speed", "Pacing multiplier, 0.5 = twice as fast"),
        help_row("--transcript", "Print N steps as JSON lines, no TUI"),
        Line::from(""),
        Line::from(Span::styled(
            "  Everything here is simulated. No command ever runs.",
            Style::default().fg(danger()),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled("  Press ", Style::default().fg(text_dim())),
            Span::styled("F1", Style::default().fg(godmode())),
            Span::styled("/", Style::default().fg(text_dim())),
            Span::styled("?", Style::default().fg(godmode())),
            Span::styled("/", Style::default().fg(text_dim())),
            Span::styled("Esc", Style::default().fg(godmode())),
            Span::styled(" to close", Style::default().fg(text_dim())),
        ]),
    ];

    let help = Paragraph::new(help_text)
        .block(
            Block::default()
                .title(Span::styled(" HackerSim Help ", Style::default().fg(heading())))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_active()))
                .style(Style::default().bg(bg())),
        )
        .wrap(Wrap { trim: false });

    f.render_widget(help, popup_area);
}

fn draw_platform_popup(f: &mut Frame, app: &App) {
    let area = f.area();
    let popup_area = centered_rect(if area.width < 80 { 90 } else { 50 }, 40, area);

    f.render_widget(Clear, popup_area);

    let current = app.engine.platform();
    let items: Vec<ListItem> = Platform::ALL
        .iter()
        .map(|p| {
            let marker = if *p == current { "● " } else { "  " };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(godmode())),
                Span::styled(format!("{:<8}", p.label()), Style::default().fg(heading())),
                Span::styled(p.describe(), Style::default().fg(text_dim())),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .title(Span::styled(" Target Platform ", Style::default().fg(heading())))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_active()))
                .style(Style::default().bg(bg())),
        )
        .highlight_style(Style::default().bg(bg_selected()).add_modifier(Modifier::BOLD));

    let mut state = ListState::default();
    state.select(Some(app.platform_selected));
    f.render_stateful_widget(list, popup_area, &mut state);
}

/// Tab stops every 8 columns, like a real terminal
const TAB_WIDTH: usize = 8;

/// Replace tabs with spaces up to the next tab stop. A raw tab in the
/// buffer would make the terminal jump past the pane border.
fn expand_tabs(line: &str) -> Vec<char> {
    let mut out = Vec::with_capacity(line.len());
    for c in line.chars() {
        if c == '\t' {
            let pad = TAB_WIDTH - out.len() % TAB_WIDTH;
            out.extend(std::iter::repeat(' ').take(pad));
        } else {
            out.push(c);
        }
    }
    out
}

/// Hard-wrap `text` to `width` columns and return the `height` rows that end
/// `offset` rows above the bottom.
pub fn wrap_tail(text: &str, width: usize, height: usize, offset: usize) -> Vec<String> {
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let mut rows = Vec::new();
    for line in text.split('\n') {
        let chars = expand_tabs(line);
        if chars.is_empty() {
            rows.push(String::new());
            continue;
        }
        for chunk in chars.chunks(width) {
            rows.push(chunk.iter().collect());
        }
    }

    // Scrolling past the top pins the first screenful
    let end = rows.len().saturating_sub(offset).max(height.min(rows.len()));
    let start = end.saturating_sub(height);
    rows.drain(start..end).collect()
}

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
