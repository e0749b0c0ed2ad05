//! Terminal UI that exports Trackdéchets waste registries for the establishments of a token.

mod app;
mod config;
mod input;
mod logging;
mod ui;

use std::{fs, io, sync::Arc, time::Duration as StdDuration};

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use registre_core::{
    ports::ExportRequest,
    service::{ExportService, RegistryDownload},
};
use registre_provider_trackdechets::TrackdechetsClient;
use reqwest::Client;
use tracing::{error, info};

use crate::app::{App, DirectionChoice, ExportPlan, ExportSummary, Screen};
use crate::config::Config;
use crate::input::Action;

type Tui = Terminal<CrosstermBackend<io::Stdout>>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();
    if config.token.trim().is_empty() {
        bail!("TRACKDECHETS_TOKEN is empty");
    }
    let _log_guard = logging::init(&config.log_file)?;
    info!(endpoint = %config.endpoint, "Starting registre");

    // HTTP + service setup
    let client = Client::builder()
        .user_agent(concat!("registre/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let api = TrackdechetsClient::new(client, config.endpoint.clone(), &config.token);
    let service = Arc::new(ExportService::with_policy(
        Arc::new(api),
        config.poll_policy(),
    ));

    // App state
    let app = App::new(service, config.output_dir.clone());

    // Terminal init
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run event loop
    let res = run(&mut terminal, app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res
}

async fn run(terminal: &mut Tui, mut app: App) -> Result<()> {
    load_establishments(terminal, &mut app).await?;

    loop {
        // Draw current UI
        terminal.draw(|frame| ui::draw(frame, &app))?;

        // Poll for input (non-blocking, small timeout to keep CPU low)
        if event::poll(StdDuration::from_millis(100))?
            && let CEvent::Key(key) = event::read()?
        {
            let action = input::handle_key_event(key, &mut app);

            match action {
                Action::Quit => break,
                Action::None => {}
                Action::RunExport => {
                    let plan = match app.export_plan() {
                        Ok(plan) => plan,
                        Err(message) => {
                            app.error_message = Some(message);
                            continue;
                        }
                    };

                    app.is_loading = true;
                    app.error_message = None;
                    terminal.draw(|frame| ui::draw(frame, &app))?;

                    let res = run_export(&mut app, &plan).await;

                    app.is_loading = false;
                    match res {
                        Ok(summaries) => {
                            app.results = summaries;
                            app.screen = Screen::ExportResult;
                        }
                        Err(err) => {
                            error!(error = %format!("{err:#}"), "Export failed");
                            app.error_message = Some(format!("Export failed: {err:#}"));
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

async fn load_establishments(terminal: &mut Tui, app: &mut App) -> Result<()> {
    app.is_loading = true;
    terminal.draw(|frame| ui::draw(frame, app))?;

    let res = app.service.establishments().await;

    app.is_loading = false;
    match res {
        Ok(establishments) => {
            info!(count = establishments.len(), "Establishments loaded");
            app.establishments = establishments;
            app.establishment_index = 0;
        }
        Err(err) => {
            error!(error = %err, "Could not list establishments");
            app.error_message = Some(format!("Could not list establishments: {err}"));
        }
    }
    Ok(())
}

async fn run_export(app: &mut App, plan: &ExportPlan) -> Result<Vec<ExportSummary>> {
    let siret = &plan.establishment.siret;
    let downloads = match plan.directions {
        DirectionChoice::Single(direction) => {
            let request = ExportRequest::new(siret.clone(), direction, plan.range);
            vec![app.service.fetch_registry(&mut app.cache, &request).await?]
        }
        DirectionChoice::Both => {
            app.service
                .fetch_both_directions(&mut app.cache, siret, plan.range)
                .await?
        }
    };

    downloads
        .iter()
        .map(|download| save_download(app, plan, download))
        .collect()
}

fn save_download(
    app: &App,
    plan: &ExportPlan,
    download: &RegistryDownload,
) -> Result<ExportSummary> {
    let prepared = download.prepare(&plan.filters)?;

    fs::create_dir_all(&app.output_dir)
        .with_context(|| format!("Cannot create {}", app.output_dir.display()))?;
    let saved_to = app.output_dir.join(&prepared.file_name);
    fs::write(&saved_to, &prepared.bytes)
        .with_context(|| format!("Cannot write {}", saved_to.display()))?;

    info!(
        export_id = %download.export_id,
        file = %saved_to.display(),
        rows = prepared.row_count,
        filtered = prepared.filtered,
        "Registry saved"
    );

    Ok(ExportSummary {
        direction: download.request.direction,
        saved_to,
        rows: prepared.row_count,
        filtered: prepared.filtered,
        recovered: download.recovered,
        notices: prepared.notices,
    })
}
