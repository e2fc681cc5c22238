// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// djvuwerk: incremental DjVu book publisher.
//
// Entry point. Initialises logging, opens the project and runs one
// subcommand. Ctrl-C cancels the running encoders.

mod services;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use djvuwerk_core::error::{PublishError, Result};
use djvuwerk_core::human_errors::{Severity, humanize_error};
use djvuwerk_core::types::PageId;
use djvuwerk_document::ForceReprocess;

use services::project_dir::ProjectDir;
use services::workspace::{Workspace, parse_page};

#[derive(Debug, Parser)]
#[command(name = "djvuwerk", version, about = "Incremental DjVu publishing for scanned books")]
struct Cli {
    /// Project directory, or the project database file.
    #[arg(long, short = 'p', default_value = ".")]
    project: PathBuf,

    /// Output directory. Defaults to `<project>/out`.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Export suggestions of every page, as a JSON list in reading order.
    #[arg(long, short = 's')]
    suggestions: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bring one page and the pages sharing its dictionary up to date.
    Process {
        /// `scan.tif`, `scan.tif#left` or `scan.tif#right`.
        #[arg(value_parser = parse_page)]
        page: PageId,
        /// Ignore every cached artifact of the page.
        #[arg(long)]
        force: bool,
        /// Rebuild every page sharing the page's dictionary.
        #[arg(long)]
        force_dictionary: bool,
    },
    /// Bring the whole project up to date.
    ProcessAll,
    /// Show the dictionary and cache state of every page.
    Status,
    /// Rebuild the dictionary assignment of every unlocked page.
    Reassign {
        #[arg(long)]
        pages_per_dictionary: usize,
    },
    /// Set the document metadata applied to the bundle (`KEY=VALUE`).
    Metadata {
        #[arg(value_parser = parse_metadata)]
        entries: Vec<(String, String)>,
    },
    /// Bundle every page into one multi-page document.
    Bundle {
        /// Target file. Defaults to `<out-dir>/book.djvu`.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

fn parse_metadata(arg: &str) -> std::result::Result<(String, String), String> {
    arg.split_once('=')
        .map(|(k, v)| (k.trim().to_owned(), v.to_owned()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got `{arg}`"))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping encoders");
            on_interrupt.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<()> {
    let dir = ProjectDir::resolve(&cli.project, cli.out_dir.as_deref());
    let mut workspace = Workspace::open(dir, &cli.suggestions)?;
    let publisher = &workspace.publisher;

    match cli.command {
        Command::Process {
            page,
            force,
            force_dictionary,
        } => {
            let mut flags = ForceReprocess::NONE;
            if force {
                flags.insert(ForceReprocess::PAGE);
            }
            if force_dictionary {
                flags.insert(ForceReprocess::DICTIONARY);
            }
            if !flags.is_empty() {
                publisher.invalidate(&page, flags)?;
            }
            let outcome = publisher.process(&page, cancel).await?;
            if outcome.reprocessed {
                println!("{page}: rebuilt");
            } else {
                println!("{page}: up to date");
            }
            if outcome.bundle_ready {
                println!("every page is ready; run `djvuwerk bundle` to update the document");
            }
        }

        Command::ProcessAll => {
            let outcome = publisher.process_all(cancel).await?;
            println!(
                "{} dictionary groups checked, {} rebuilt",
                outcome.processed, outcome.reprocessed
            );
            if outcome.bundle_ready {
                println!("every page is ready; run `djvuwerk bundle` to update the document");
            }
        }

        Command::Status => print_status(&workspace)?,

        Command::Reassign { pages_per_dictionary } => {
            let changed = publisher.reassign(pages_per_dictionary).await?;
            workspace.save_pages_per_dictionary(pages_per_dictionary)?;
            println!("{changed} pages moved");
        }

        Command::Metadata { entries } => {
            let metadata: BTreeMap<String, String> = entries.into_iter().collect();
            let store = publisher.store();
            let store = store
                .lock()
                .map_err(|_| PublishError::Database("parameter store lock poisoned".into()))?;
            store.set_metadata(&metadata)?;
            println!("{} metadata entries saved", metadata.len());
        }

        Command::Bundle { output } => {
            let target = output.unwrap_or_else(|| publisher.project().layout.bundle("book"));
            let stamp = publisher.build_bundle(&target, cancel).await?;
            println!("{} ({} bytes)", target.display(), stamp.size);
        }
    }
    Ok(())
}

fn print_status(workspace: &Workspace) -> Result<()> {
    let publisher = &workspace.publisher;
    let assignments: Vec<(PageId, String)> = {
        let registry = publisher.registry();
        let registry = registry
            .lock()
            .map_err(|_| PublishError::Database("dictionary registry lock poisoned".into()))?;
        publisher
            .project()
            .pages
            .iter()
            .map(|page| {
                let id = registry
                    .dictionary_of(page)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".into());
                (page.clone(), id)
            })
            .collect()
    };

    for (page, dictionary) in assignments {
        let status = publisher.page_status(&page)?;
        println!("{:<12} {:<8} {page}", status.label(), dictionary);
    }
    Ok(())
}

/// Print a plain-language error and pick the exit code.
fn report(err: &PublishError) -> ExitCode {
    let human = humanize_error(err);
    match human.severity {
        Severity::Interrupted => info!(error = %err, "run interrupted"),
        _ => error!(error = %err, "command failed"),
    }
    eprintln!("{}", human.message);
    eprintln!("  {}", human.suggestion);
    if human.retriable {
        eprintln!("  Running the command again may succeed.");
    }
    match human.severity {
        Severity::Interrupted => ExitCode::from(130),
        Severity::ActionRequired => ExitCode::from(2),
        Severity::Transient | Severity::Permanent => ExitCode::FAILURE,
    }
}
