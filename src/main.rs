mod content;
mod engine;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use rand::rngs::ThreadRng;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::time::{Duration, Instant};
use tui_textarea::TextArea;

use content::types::LevelDef;
use engine::level::{LevelEvent, LevelMachine};
use engine::rules::{self, AcceptanceRule};
use engine::sequencer::{Sequencer, Summary, Tier, LAST_LEVEL};

enum Screen {
    Menu,
    Playing,
    Summary,
}

/// How the current scenario is interacted with, derived from its rule.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Interaction {
    MultiSelect,
    SingleChoice,
    FreeText { meter: bool },
    Credentials,
    Classification,
    SafeUsage,
}

fn interaction(rule: &AcceptanceRule) -> Interaction {
    match rule.inner() {
        AcceptanceRule::SingleChoice { .. } => Interaction::SingleChoice,
        AcceptanceRule::PasswordPolicy { .. } => Interaction::FreeText { meter: true },
        AcceptanceRule::CodeEntry { .. } => Interaction::FreeText { meter: false },
        AcceptanceRule::Credentials => Interaction::Credentials,
        AcceptanceRule::Classification { .. } => Interaction::Classification,
        AcceptanceRule::SafeUsage { .. } => Interaction::SafeUsage,
        _ => Interaction::MultiSelect,
    }
}

struct App<'a> {
    levels: Vec<LevelDef>,
    screen: Screen,
    menu_index: usize,
    sequencer: Option<Sequencer>,
    machine: Option<LevelMachine>,
    inputs: Vec<TextArea<'a>>,
    active_input: usize,
    cursor: usize,
    summary: Option<Summary>,
    rng: ThreadRng,
}

impl App<'_> {
    fn new(levels: Vec<LevelDef>) -> Self {
        App {
            levels,
            screen: Screen::Menu,
            menu_index: 0,
            sequencer: None,
            machine: None,
            inputs: Vec::new(),
            active_input: 0,
            cursor: 0,
            summary: None,
            rng: rand::thread_rng(),
        }
    }

    fn start_sequence(&mut self, start_level: u32) {
        self.sequencer = Some(Sequencer::new(start_level));
        self.summary = None;
        self.begin_next_level();
    }

    fn begin_next_level(&mut self) {
        let Some(seq) = self.sequencer.as_mut() else {
            return;
        };
        match seq.begin_level() {
            Some(number) => {
                let def = &self.levels[(number - 1) as usize];
                self.machine = Some(LevelMachine::new(def, Instant::now(), &mut self.rng));
                self.cursor = 0;
                self.rebuild_inputs();
                self.screen = Screen::Playing;
            }
            None => {
                self.summary = Some(seq.summary());
                self.sequencer = None;
                self.machine = None;
                self.screen = Screen::Summary;
            }
        }
    }

    /// Text widgets mirror the engine's field buffers; rebuilt whenever the
    /// current scenario changes or retries.
    fn rebuild_inputs(&mut self) {
        let Some(machine) = &self.machine else {
            self.inputs.clear();
            return;
        };
        let kind = interaction(&machine.scenario().rule);
        let fields: Vec<String> = machine.run().fields.clone();
        self.inputs = match kind {
            Interaction::FreeText { meter } => {
                let title = if meter { " Password " } else { " Code " };
                vec![text_input(fields.first().map(String::as_str).unwrap_or(""), title, false)]
            }
            Interaction::Credentials => vec![
                text_input(fields.first().map(String::as_str).unwrap_or(""), " Username ", false),
                text_input(fields.get(1).map(String::as_str).unwrap_or(""), " Password ", true),
            ],
            _ => Vec::new(),
        };
        self.active_input = 0;
    }

    /// Routes one key press while a level is in progress. Returns false when
    /// the key asks to quit.
    fn on_play_key(&mut self, key: KeyEvent) -> bool {
        if key.code == KeyCode::Esc {
            return false;
        }
        let now = Instant::now();

        // Modal feedback: the next input event resumes the engine.
        if self.machine.as_ref().is_some_and(|m| m.feedback().is_some()) {
            if let Some(machine) = self.machine.as_mut() {
                machine.acknowledge(now, &mut self.rng);
            }
            if let Some(passed) = self.machine.as_ref().and_then(|m| m.outcome()) {
                if let Some(seq) = self.sequencer.as_mut() {
                    seq.record(passed);
                }
                self.begin_next_level();
            } else {
                self.cursor = 0;
                self.rebuild_inputs();
            }
            return true;
        }

        let Some(machine) = self.machine.as_mut() else {
            return true;
        };
        let kind = interaction(&machine.scenario().rule);
        match kind {
            Interaction::FreeText { .. } => match key.code {
                KeyCode::Enter => machine.handle(LevelEvent::Submit, now),
                _ => {
                    if let Some(input) = self.inputs.first_mut() {
                        input.input(key);
                        let text = input.lines().join("");
                        machine.handle(LevelEvent::SetField { index: 0, text }, now);
                    }
                }
            },
            Interaction::Credentials => match key.code {
                KeyCode::Enter => machine.handle(LevelEvent::Submit, now),
                KeyCode::Tab | KeyCode::Down | KeyCode::Up => {
                    self.active_input = (self.active_input + 1) % 2;
                }
                _ => {
                    let index = self.active_input;
                    if let Some(input) = self.inputs.get_mut(index) {
                        input.input(key);
                        let text = input.lines().join("");
                        machine.handle(LevelEvent::SetField { index, text }, now);
                    }
                }
            },
            Interaction::MultiSelect | Interaction::SingleChoice => {
                let count = machine.scenario().options.len();
                match key.code {
                    KeyCode::Up | KeyCode::Char('k') => self.cursor_up(),
                    KeyCode::Down | KeyCode::Char('j') => self.cursor_down(count),
                    KeyCode::Char(' ') => {
                        let event = if kind == Interaction::SingleChoice {
                            LevelEvent::Choose(self.cursor)
                        } else {
                            LevelEvent::Toggle(self.cursor)
                        };
                        machine.handle(event, now);
                    }
                    KeyCode::Enter => machine.handle(LevelEvent::Submit, now),
                    _ => {}
                }
            }
            Interaction::Classification => {
                let count = machine.scenario().options.len();
                match key.code {
                    KeyCode::Up | KeyCode::Char('k') => self.cursor_up(),
                    KeyCode::Down | KeyCode::Char('j') => self.cursor_down(count),
                    KeyCode::Left | KeyCode::Char('h') => {
                        machine.handle(LevelEvent::SetVerdict { row: self.cursor, choice: 0 }, now);
                    }
                    KeyCode::Right | KeyCode::Char('l') => {
                        machine.handle(LevelEvent::SetVerdict { row: self.cursor, choice: 1 }, now);
                    }
                    KeyCode::Enter => machine.handle(LevelEvent::Submit, now),
                    _ => {}
                }
            }
            Interaction::SafeUsage => {
                let switches = machine.run().switches.len();
                let count = switches + machine.scenario().options.len();
                match key.code {
                    KeyCode::Up | KeyCode::Char('k') => self.cursor_up(),
                    KeyCode::Down | KeyCode::Char('j') => self.cursor_down(count),
                    KeyCode::Char(' ') => {
                        let event = if self.cursor < switches {
                            LevelEvent::FlipSwitch(self.cursor)
                        } else {
                            LevelEvent::Toggle(self.cursor - switches)
                        };
                        machine.handle(event, now);
                    }
                    KeyCode::Enter => machine.handle(LevelEvent::Submit, now),
                    _ => {}
                }
            }
        }
        true
    }

    fn cursor_up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn cursor_down(&mut self, count: usize) {
        if self.cursor + 1 < count {
            self.cursor += 1;
        }
    }
}

fn text_input(initial: &str, title: &str, mask: bool) -> TextArea<'static> {
    let mut input = TextArea::default();
    input.insert_str(initial);
    input.set_cursor_line_style(Style::default());
    input.set_block(Block::default().borders(Borders::ALL).title(title.to_string()));
    if mask {
        input.set_mask_char('*');
    }
    input
}

fn main() -> Result<()> {
    let levels = content::load_levels()?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(levels);

    loop {
        terminal.draw(|f| draw_ui(f, &app))?;

        // Poll so timed scenarios keep counting down between key presses.
        if !event::poll(Duration::from_millis(100))? {
            if let Some(machine) = app.machine.as_mut() {
                machine.tick(Instant::now());
            }
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match app.screen {
            Screen::Menu => match key.code {
                KeyCode::Up | KeyCode::Char('k') => {
                    app.menu_index = app.menu_index.saturating_sub(1);
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    if app.menu_index < LAST_LEVEL as usize {
                        app.menu_index += 1;
                    }
                }
                KeyCode::Enter => {
                    if app.menu_index < LAST_LEVEL as usize {
                        app.start_sequence(app.menu_index as u32 + 1);
                    } else {
                        break;
                    }
                }
                KeyCode::Char('q') | KeyCode::Esc => break,
                _ => {}
            },
            Screen::Playing => {
                if !app.on_play_key(key) {
                    break;
                }
            }
            Screen::Summary => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                _ => {
                    app.screen = Screen::Menu;
                    app.summary = None;
                }
            },
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    Ok(())
}

fn draw_ui(f: &mut Frame, app: &App) {
    match app.screen {
        Screen::Menu => draw_menu(f, app),
        Screen::Playing => draw_level(f, app),
        Screen::Summary => draw_summary(f, app),
    }
}

const TITLE_ART: &str = r#"
   ██████╗██╗   ██╗██████╗ ███████╗██████╗
  ██╔════╝╚██╗ ██╔╝██╔══██╗██╔════╝██╔══██╗
  ██║      ╚████╔╝ ██████╔╝█████╗  ██████╔╝
  ██║       ╚██╔╝  ██╔══██╗██╔══╝  ██╔══██╗
  ╚██████╗   ██║   ██████╔╝███████╗██║  ██║
   ╚═════╝   ╚═╝   ╚═════╝ ╚══════╝╚═╝  ╚═╝
  ██████╗ ██████╗ ██╗██╗     ██╗
  ██╔══██╗██╔══██╗██║██║     ██║
  ██║  ██║██████╔╝██║██║     ██║
  ██║  ██║██╔══██╗██║██║     ██║
  ██████╔╝██║  ██║██║███████╗███████╗
  ╚═════╝ ╚═╝  ╚═╝╚═╝╚══════╝╚══════╝
"#;

fn draw_menu(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(15),
            Constraint::Length(2),
            Constraint::Min(12),
            Constraint::Length(1),
        ])
        .split(f.area());

    let title = Paragraph::new(TITLE_ART)
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center);
    f.render_widget(title, chunks[0]);

    let subtitle =
        Paragraph::new("Pick where to start; the drill runs through all remaining levels.")
            .style(Style::default().fg(Color::White))
            .alignment(Alignment::Center);
    f.render_widget(subtitle, chunks[1]);

    let mut lines = Vec::new();
    for (i, def) in app.levels.iter().enumerate() {
        let label = format!("  Play from Level {:>2}: {}  ", i + 1, def.meta.title);
        lines.push(menu_line(label, app.menu_index == i));
    }
    lines.push(menu_line("  Quit  ".to_string(), app.menu_index == app.levels.len()));
    let menu = Paragraph::new(lines).alignment(Alignment::Center);
    f.render_widget(menu, chunks[2]);

    let help = Paragraph::new("↑/↓ select  •  ENTER confirm  •  q quit")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(help, chunks[3]);
}

fn menu_line(label: String, selected: bool) -> Line<'static> {
    let style = if selected {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };
    Line::from(Span::styled(label, style))
}

fn draw_level(f: &mut Frame, app: &App) {
    let Some(machine) = &app.machine else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(10), Constraint::Length(1)])
        .split(f.area());

    draw_status_bar(f, app, machine, chunks[0]);

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[1]);

    draw_facts(f, machine, main[0]);
    draw_interaction(f, app, machine, main[1]);

    let help = Paragraph::new(help_text(interaction(&machine.scenario().rule)))
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(help, chunks[2]);

    if let Some(note) = machine.feedback() {
        draw_feedback_modal(f, note);
    }
}

fn draw_status_bar(f: &mut Frame, app: &App, machine: &LevelMachine, area: Rect) {
    let (current, total) = machine.progress();
    let mut spans = vec![
        Span::styled(" CYBERDRILL ", Style::default().fg(Color::Black).bg(Color::Yellow)),
        Span::raw("  "),
        Span::styled(
            format!(" Level {}: {} ", machine.number(), machine.title()),
            Style::default().fg(Color::White).bg(Color::DarkGray),
        ),
        Span::raw("  "),
        Span::styled(format!(" Scenario {current}/{total} "), Style::default().fg(Color::Cyan)),
    ];
    if let Some(seq) = &app.sequencer {
        let s = seq.summary();
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!(" Levels passed: {} ", s.passed),
            Style::default().fg(Color::Yellow),
        ));
    }
    if let Some(left) = machine.remaining_secs(Instant::now()) {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!(" Time left: {left}s "),
            Style::default().fg(if left <= 5 { Color::Red } else { Color::Green }),
        ));
    }
    let status = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::BOTTOM));
    f.render_widget(status, area);
}

fn draw_facts(f: &mut Frame, machine: &LevelMachine, area: Rect) {
    let sc = machine.scenario();
    let mut lines = vec![
        Line::from(Span::styled(machine.intro().to_string(), Style::default().fg(Color::DarkGray))),
        Line::raw(""),
    ];
    for fact in &sc.facts {
        let text = match &fact.label {
            Some(label) => format!("{}: {}", label, fact.text),
            None => fact.text.clone(),
        };
        lines.push(Line::from(Span::raw(text)));
        lines.push(Line::raw(""));
    }
    if let Some(code) = &machine.run().code {
        lines.push(Line::from(Span::styled(
            format!("(Simulated authenticator code for demo): {code}"),
            Style::default().fg(Color::Magenta),
        )));
    }
    let panel = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(format!(" {} ", sc.title)))
        .wrap(Wrap { trim: false })
        .style(Style::default().fg(Color::White));
    f.render_widget(panel, area);
}

fn draw_interaction(f: &mut Frame, app: &App, machine: &LevelMachine, area: Rect) {
    let sc = machine.scenario();
    let run = machine.run();
    let kind = interaction(&sc.rule);
    let block = Block::default().borders(Borders::ALL).title(format!(" {} ", sc.prompt));

    match kind {
        Interaction::MultiSelect | Interaction::SingleChoice => {
            let mut lines = Vec::new();
            for (i, option) in sc.options.iter().enumerate() {
                let marker = match (kind, run.selected.contains(&i)) {
                    (Interaction::SingleChoice, true) => "(o)",
                    (Interaction::SingleChoice, false) => "( )",
                    (_, true) => "[x]",
                    (_, false) => "[ ]",
                };
                lines.push(option_line(
                    format!("{marker} {option}"),
                    app.cursor == i,
                    run.selected.contains(&i),
                ));
            }
            f.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
        }
        Interaction::Classification => {
            let choices = match sc.rule.inner() {
                AcceptanceRule::Classification { choices, .. } => choices.clone(),
                _ => Vec::new(),
            };
            let mut lines = Vec::new();
            for (i, option) in sc.options.iter().enumerate() {
                let verdict = match run.verdicts.get(i).copied().flatten() {
                    Some(c) => choices.get(c).cloned().unwrap_or_default(),
                    None => "----".to_string(),
                };
                lines.push(option_line(
                    format!("{option:<40} [{verdict}]"),
                    app.cursor == i,
                    run.verdicts.get(i).copied().flatten().is_some(),
                ));
            }
            f.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
        }
        Interaction::SafeUsage => {
            let switch_labels = match sc.rule.inner() {
                AcceptanceRule::SafeUsage { switches, .. } => switches.clone(),
                _ => Vec::new(),
            };
            let mut lines = Vec::new();
            for (i, label) in switch_labels.iter().enumerate() {
                let on = run.switches.get(i).copied().unwrap_or(false);
                let state = if on { "ON " } else { "OFF" };
                lines.push(option_line(format!("<{state}> {label}"), app.cursor == i, on));
            }
            lines.push(Line::raw(""));
            let base = switch_labels.len();
            for (i, option) in sc.options.iter().enumerate() {
                let marker = if run.selected.contains(&i) { "[x]" } else { "[ ]" };
                lines.push(option_line(
                    format!("{marker} {option}"),
                    app.cursor == base + i,
                    run.selected.contains(&i),
                ));
            }
            f.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
        }
        Interaction::FreeText { meter } => {
            let inner = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(3), Constraint::Length(3), Constraint::Min(0)])
                .split(block.inner(area));
            f.render_widget(block, area);
            if let Some(input) = app.inputs.first() {
                f.render_widget(input, inner[0]);
            }
            if meter {
                if let AcceptanceRule::PasswordPolicy { min_len, specials, .. } = sc.rule.inner() {
                    let score = rules::strength(*min_len, specials, run.field(0));
                    let color = match score {
                        0..=2 => Color::Red,
                        3 => Color::Yellow,
                        _ => Color::Green,
                    };
                    let gauge = Gauge::default()
                        .block(Block::default().borders(Borders::ALL).title(" Strength "))
                        .gauge_style(Style::default().fg(color))
                        .ratio(f64::from(score) / 5.0);
                    f.render_widget(gauge, inner[1]);
                }
            }
        }
        Interaction::Credentials => {
            let inner = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(3), Constraint::Length(3), Constraint::Min(0)])
                .split(block.inner(area));
            f.render_widget(block, area);
            for (i, input) in app.inputs.iter().enumerate().take(2) {
                f.render_widget(input, inner[i]);
            }
        }
    }
}

fn option_line(text: String, under_cursor: bool, selected: bool) -> Line<'static> {
    let mut style = if selected {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::White)
    };
    if under_cursor {
        style = style.bg(Color::DarkGray).add_modifier(Modifier::BOLD);
    }
    Line::from(Span::styled(text, style))
}

fn help_text(kind: Interaction) -> &'static str {
    match kind {
        Interaction::MultiSelect | Interaction::SingleChoice | Interaction::SafeUsage => {
            " ↑/↓ move  •  SPACE select  •  ENTER submit  •  ESC quit"
        }
        Interaction::Classification => {
            " ↑/↓ move  •  ←/→ set verdict  •  ENTER submit  •  ESC quit"
        }
        Interaction::FreeText { .. } => " type your answer  •  ENTER submit  •  ESC quit",
        Interaction::Credentials => " type  •  TAB switch field  •  ENTER submit  •  ESC quit",
    }
}

fn draw_feedback_modal(f: &mut Frame, note: &engine::level::Feedback) {
    let area = centered_rect(64, 40, f.area());
    f.render_widget(Clear, area);

    let (fg, bg) = if note.success {
        (Color::Black, Color::Green)
    } else {
        (Color::White, Color::Red)
    };
    let mut lines = Vec::new();
    for line in &note.lines {
        lines.push(Line::from(format!("• {line}")));
        lines.push(Line::raw(""));
    }
    lines.push(Line::from(Span::styled(
        "Press any key to continue.",
        Style::default().add_modifier(Modifier::ITALIC),
    )));
    let modal = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} ", note.title))
                .title_style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .wrap(Wrap { trim: false })
        .style(Style::default().fg(fg).bg(bg));
    f.render_widget(modal, area);
}

fn draw_summary(f: &mut Frame, app: &App) {
    let Some(summary) = &app.summary else {
        return;
    };
    let (title, color, tips): (&str, Color, &[&str]) = match summary.tier {
        Tier::Flawless => (
            "FLAWLESS VICTORY!",
            Color::Green,
            &["Perfect run. Your instincts are on point."],
        ),
        Tier::Win => (
            "YOU WIN!",
            Color::Green,
            &["Strong performance. Keep practicing to perfect your responses."],
        ),
        Tier::TryAgain => (
            "TRY AGAIN",
            Color::Yellow,
            &[
                "Review the feedback from each level.",
                "Small changes can greatly reduce risk.",
            ],
        ),
    };

    let mut lines = vec![
        Line::from(Span::styled(title, Style::default().fg(color).add_modifier(Modifier::BOLD))),
        Line::raw(""),
        Line::from(format!("You completed levels {}-{}.", summary.start, LAST_LEVEL)),
        Line::from(format!("Score: {} / {} levels passed", summary.passed, summary.total)),
        Line::raw(""),
    ];
    for tip in tips {
        lines.push(Line::from(format!("• {tip}")));
    }
    lines.push(Line::raw(""));
    lines.push(Line::from(Span::styled(
        "Press any key to return to the menu.",
        Style::default().fg(Color::DarkGray),
    )));

    let panel = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Drill Complete "))
        .wrap(Wrap { trim: false })
        .alignment(Alignment::Center);
    f.render_widget(panel, centered_rect(70, 60, f.area()));
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);
    horizontal[1]
}
