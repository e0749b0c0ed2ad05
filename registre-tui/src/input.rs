use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, FormField, Screen};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Action {
    None,
    Quit,
    /// Run the export described by the form
    RunExport,
}

pub(crate) fn handle_key_event(key: KeyEvent, app: &mut App) -> Action {
    use KeyCode::{BackTab, Backspace, Char, Down, Enter, Esc, Left, Right, Tab, Up};

    // Global quit shortcuts
    if key.code == Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Action::Quit;
    }
    if key.code == Char('q') && key.modifiers.is_empty() {
        return Action::Quit;
    }

    let mut action = Action::None;

    match app.screen {
        Screen::EstablishmentSelect => match key.code {
            Up | Char('k') => {
                if app.establishment_index > 0 {
                    app.establishment_index -= 1;
                }
            }
            Down | Char('j') => {
                if app.establishment_index + 1 < app.establishments.len() {
                    app.establishment_index += 1;
                }
            }
            Enter | Char(' ') => {
                app.select_current_establishment();
            }
            _ => {}
        },

        Screen::ExportForm => match key.code {
            Tab | Down => app.focus = app.focus.next(),
            BackTab | Up => app.focus = app.focus.previous(),
            Enter => action = Action::RunExport,
            Esc => {
                app.screen = Screen::EstablishmentSelect;
                app.error_message = None;
            }
            Char('f') => app.use_full_history(),
            Char('a') => app.toggle_all_types(),
            Backspace => {
                if let Some(input) = app.focused_input() {
                    input.pop();
                }
            }
            Char(character) if character.is_ascii_digit() || character == '-' => {
                if let Some(input) = app.focused_input() {
                    input.push(character);
                }
            }
            Left | Right | Char(' ') => match app.focus {
                FormField::Direction => app.directions = app.directions.cycle(),
                FormField::Types => match key.code {
                    Left => app.type_index = app.type_index.saturating_sub(1),
                    Right => {
                        if app.type_index + 1 < app.selected_types.len() {
                            app.type_index += 1;
                        }
                    }
                    _ => app.toggle_current_type(),
                },
                FormField::DateFilter => app.date_filter = !app.date_filter,
                FormField::Start | FormField::End => {}
            },
            _ => {}
        },

        Screen::ExportResult => match key.code {
            Left | Esc | Char('b') => {
                app.screen = Screen::ExportForm;
            }
            _ => {}
        },
    }
    action
}
