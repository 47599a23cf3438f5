use crate::app::{App, UiEvent};
use crate::conversation::{title_for, Author, Part};
use crate::media;
use ratatui::{
    crossterm::event::{self, Event as CrosstermEvent, KeyCode, KeyEventKind, KeyModifiers},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::time::Duration;

pub struct Tui {
    terminal: Terminal<ratatui::backend::CrosstermBackend<io::Stdout>>,
}

impl Tui {
    pub fn new() -> io::Result<Self> {
        let stdout = io::stdout();
        let backend = ratatui::backend::CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal })
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

    /// One line per part, numbering images in the same order as
    /// `App::image_refs` so `/view`, `/edit` and `/recall` indices line up
    /// with what is on screen.
    fn messages_text(app: &App) -> String {
        let mut out = String::new();
        let mut image_no = 0usize;
        let mut result_no = 0usize;
        for message in &app.messages {
            let author = match message.author {
                Author::User => "You",
                Author::Model => "Gemini",
            };
            out.push_str(author);
            out.push_str(": ");
            for (i, part) in message.parts.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                match part {
                    Part::Text { text } => out.push_str(text),
                    Part::Image { url, mime_type, .. } => {
                        image_no += 1;
                        out.push_str(&format!(
                            "[image {}: {} ({})]",
                            image_no,
                            media::summarize_url(url),
                            mime_type
                        ));
                    }
                    Part::ImageGenerationResult {
                        prompt,
                        params,
                        images,
                    } => {
                        result_no += 1;
                        out.push_str(&format!(
                            "Generated {} image(s) for \"{}\" ({}, {}) — /recall {} to reuse",
                            images.len(),
                            prompt,
                            params.model,
                            params.aspect_ratio,
                            result_no
                        ));
                        for url in images {
                            image_no += 1;
                            out.push_str(&format!(
                                "\n  [image {}: {}] — /view {} | /edit {} <instruction>",
                                image_no,
                                media::summarize_url(url),
                                image_no,
                                image_no
                            ));
                        }
                    }
                    Part::Unknown(_) => out.push_str("[unsupported content]"),
                }
            }
            out.push('\n');
        }
        out
    }

    fn draw_generation_panel(f: &mut Frame, app: &App) {
        let area = Self::centered_rect(70, 40, f.area());
        f.render_widget(Clear, area);
        let panel = &app.panel;
        let text = format!(
            "Prompt: {}\nModel: {}\nAspect ratio: {}\nImages: {}\n\n\
             /gen runs the request | /gen -m <model> -a <ratio> -n <count> <prompt> | Esc closes",
            panel.prompt, panel.params.model, panel.params.aspect_ratio, panel.params.count,
        );
        let paragraph = Paragraph::new(text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Image Generation")
                    .style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, area);
    }

    fn draw(f: &mut Frame, app: &App) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Min(3),
                Constraint::Length(1),
                Constraint::Length(3),
            ])
            .split(f.area());

        let star = if app.favorite { "★ " } else { "" };
        let title = format!("{}{} — {}", star, title_for(&app.messages), app.chat_model);
        let messages = Paragraph::new(Self::messages_text(app))
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: true });
        f.render_widget(messages, chunks[0]);

        let status = if app.loading {
            "Waiting for Gemini…".to_string()
        } else {
            app.status.clone()
        };
        f.render_widget(
            Paragraph::new(status).style(Style::default().fg(Color::DarkGray)),
            chunks[1],
        );

        let input_title = match &app.upload {
            Some(upload) => format!("Input — attachment: {}", upload.url),
            None => "Input — Enter sends, /gen opens the image panel, Ctrl+C quits".to_string(),
        };
        let input = Paragraph::new(format!("{}█", app.input))
            .style(Style::default().fg(Color::White))
            .block(Block::default().borders(Borders::ALL).title(input_title));
        f.render_widget(input, chunks[2]);

        if app.panel.open {
            Self::draw_generation_panel(f, app);
        }
    }

    fn handle_ui_event(app: &mut App, ui_event: UiEvent) {
        match ui_event {
            UiEvent::ConversationCreated { id } => {
                app.status = format!("Conversation {} created", id);
            }
            UiEvent::ViewImage { urls, start } => {
                let Some(url) = urls.get(start) else { return };
                if url.starts_with("data:") {
                    match media::save_data_url(&app.data_dir, url) {
                        Ok(path) => app.status = format!("Saved image to {}", path.display()),
                        Err(e) => app.status = e.to_string(),
                    }
                } else {
                    app.status = format!("Image: {}", url);
                }
            }
            UiEvent::EditImage { url } => {
                log::info!("Editing image {}", media::summarize_url(&url));
            }
        }
    }

    pub async fn run_loop(&mut self, app: &mut App) -> io::Result<()> {
        ratatui::crossterm::terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        ratatui::crossterm::execute!(
            stdout,
            ratatui::crossterm::terminal::EnterAlternateScreen
        )?;
        log::info!("TUI run loop started.");

        loop {
            // Background service calls report back through the action
            // channel; apply everything pending before drawing.
            while let Some(action) = app.try_recv_action() {
                app.handle_action(action).await;
            }
            for ui_event in app.take_events() {
                Self::handle_ui_event(app, ui_event);
            }

            self.terminal.draw(|f| Self::draw(f, app))?;

            if event::poll(Duration::from_millis(100))? {
                if let CrosstermEvent::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('c') | KeyCode::Char('q')
                            if key.modifiers.contains(KeyModifiers::CONTROL) =>
                        {
                            app.should_quit = true;
                        }
                        KeyCode::Char('g') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            app.panel.open = !app.panel.open;
                            if app.panel.open {
                                // Upload and generation are mutually
                                // exclusive input modes.
                                app.upload = None;
                            }
                        }
                        KeyCode::Enter => app.handle_input().await,
                        KeyCode::Backspace => {
                            app.input.pop();
                        }
                        KeyCode::Esc => {
                            if app.panel.open {
                                app.panel.open = false;
                            } else {
                                app.status.clear();
                            }
                        }
                        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                            app.input.push(c);
                        }
                        _ => {}
                    }
                }
            }

            if app.should_quit {
                log::info!("Quit requested, exiting TUI loop.");
                break;
            }
        }

        ratatui::crossterm::terminal::disable_raw_mode()?;
        ratatui::crossterm::execute!(
            self.terminal.backend_mut(),
            ratatui::crossterm::terminal::LeaveAlternateScreen
        )?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}
