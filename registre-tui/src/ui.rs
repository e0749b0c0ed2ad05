use std::iter;

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, List, ListItem, ListState, Paragraph, Row, Table, Wrap},
};
use registre_core::model::BSD_TYPES;

use crate::app::{App, ExportSummary, FormField, Screen};

pub(crate) fn draw(frame: &mut Frame<'_>, app: &App) {
    let area = frame.area();

    // Outer layout: title, main content, status line
    let layout_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);

    let chunks = layout_chunks.as_ref();
    let [header_area, content_area, status_area] = chunks else {
        return;
    };

    let header = Paragraph::new("registre – export des registres réglementaires Trackdéchets")
        .block(Block::default().borders(Borders::ALL).title("Registre"));
    frame.render_widget(header, *header_area);

    match app.screen {
        Screen::EstablishmentSelect => draw_establishment_select(frame, app, *content_area),
        Screen::ExportForm => draw_export_form(frame, app, *content_area),
        Screen::ExportResult => draw_export_result(frame, app, *content_area),
    }

    let nav_hint = match app.screen {
        Screen::EstablishmentSelect => "↑/↓ move · Enter/Space select · q/Ctrl-C quit",
        Screen::ExportForm => {
            "Tab/↑/↓ field · ←/→/Space change · a all types · f complete registry · Enter export · Esc back"
        }
        Screen::ExportResult => "Esc/←/b back to form · q/Ctrl-C quit",
    };

    let status_text = if app.is_loading {
        format!("Export in progress, this can take up to a few minutes… · {nav_hint}")
    } else if let Some(msg) = &app.error_message {
        format!("{msg} · {nav_hint}")
    } else {
        nav_hint.to_owned()
    };

    let status_style = if app.error_message.is_some() {
        Style::default().fg(Color::Red)
    } else if app.is_loading {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };

    let status = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(status_style)
        .wrap(Wrap { trim: true });

    frame.render_widget(status, *status_area);
}

fn draw_establishment_select(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let items = if app.establishments.is_empty() {
        vec![ListItem::new(if app.is_loading {
            "Loading establishments…"
        } else {
            "No establishment reachable with this token."
        })]
    } else {
        app.establishments
            .iter()
            .enumerate()
            .map(|(idx, establishment)| {
                let prefix = if idx == app.establishment_index {
                    "> "
                } else {
                    "  "
                };
                ListItem::new(format!("{prefix}{establishment}"))
            })
            .collect::<Vec<ListItem<'_>>>()
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Établissement (SIRET)"),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );

    let mut state = ListState::default();
    if !app.establishments.is_empty() {
        state.select(Some(app.establishment_index));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_export_form(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let establishment = app
        .selected_establishment
        .as_ref()
        .map_or_else(|| "<no establishment>".to_owned(), ToString::to_string);

    let field_style = |field: FormField| {
        if app.focus == field {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        }
    };

    let type_spans = BSD_TYPES
        .iter()
        .zip(app.selected_types)
        .enumerate()
        .flat_map(|(idx, (bsd_type, selected))| {
            let mark = if selected { "[x]" } else { "[ ]" };
            let mut style = Style::default();
            if app.focus == FormField::Types && idx == app.type_index {
                style = style.add_modifier(Modifier::REVERSED);
            }
            [
                Span::styled(format!("{mark} {bsd_type}"), style),
                Span::raw("  "),
            ]
        });

    let type_label = if app.all_types_selected() {
        "Types (all):  "
    } else {
        "Types:        "
    };

    let lines = vec![
        Line::from(vec![
            Span::styled("Registre:     ", field_style(FormField::Direction)),
            Span::raw(app.directions.label()),
        ]),
        Line::from(vec![
            Span::styled("Du:           ", field_style(FormField::Start)),
            Span::raw(app.start_input.as_str()),
        ]),
        Line::from(vec![
            Span::styled("Au:           ", field_style(FormField::End)),
            Span::raw(app.end_input.as_str()),
        ]),
        Line::from(
            iter::once(Span::styled(type_label, field_style(FormField::Types)))
                .chain(type_spans)
                .collect::<Vec<Span<'_>>>(),
        ),
        Line::from(vec![
            Span::styled("Date filter:  ", field_style(FormField::DateFilter)),
            Span::raw(if app.date_filter {
                "[x] keep only records dated within the period"
            } else {
                "[ ] keep every exported record"
            }),
        ]),
    ];

    let form = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Export for {establishment}")),
        )
        .wrap(Wrap { trim: false });

    frame.render_widget(form, area);
}

fn draw_export_result(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let title = "Exports (Esc/←/b to go back)";

    if app.results.is_empty() {
        let paragraph = Paragraph::new("No export produced.")
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
        return;
    }

    let rows = app.results.iter().map(|summary| {
        let style = if summary.notices.is_empty() {
            Style::default().fg(Color::Green)
        } else {
            Style::default().fg(Color::Yellow)
        };
        Row::new(vec![
            Cell::from(summary.direction.label()),
            Cell::from(rows_label(summary)),
            Cell::from(summary.saved_to.display().to_string()),
            Cell::from(remarks(summary)),
        ])
        .style(style)
    });

    let column_widths = [
        Constraint::Length(30),
        Constraint::Length(18),
        Constraint::Min(30),
        Constraint::Min(20),
    ];

    let table = Table::new(rows, column_widths)
        .header(
            Row::new(vec!["Registre", "Rows", "File", "Remarks"])
                .style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .block(Block::default().borders(Borders::ALL).title(title))
        .column_spacing(1);

    frame.render_widget(table, area);
}

fn rows_label(summary: &ExportSummary) -> String {
    match (summary.rows, summary.filtered) {
        (Some(rows), true) => format!("{rows} (filtered)"),
        (Some(rows), false) => rows.to_string(),
        (None, _) => "?".to_owned(),
    }
}

fn remarks(summary: &ExportSummary) -> String {
    let mut parts: Vec<&str> = summary
        .notices
        .iter()
        .map(|notice| notice.message())
        .collect();
    if summary.recovered {
        parts.push("Recent export reused");
    }
    parts.join(" · ")
}
