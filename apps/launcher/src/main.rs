use std::{
    io::{self, BufRead, Write},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    attach_probe, Activation, CatalogController, CatalogEvent, CatalogSource, ConfirmPrompt,
    DeleteOutcome, FrameLoader, FrameOverlay, HttpCatalogApi, HttpEmbedProbe, NewLinkDraft,
    SyncError,
};
use shared::{
    domain::{CategoryId, LinkId, OpenMode},
    protocol::LinkPatch,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "launcher", about = "Browse and manage the app launcher catalog")]
struct Args {
    /// Overrides the configured API base url.
    #[arg(long)]
    api_url: Option<String>,
    /// Answers yes to delete confirmations.
    #[arg(long, short)]
    yes: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints the catalog.
    List {
        /// Also lists links of collapsed categories.
        #[arg(long)]
        all: bool,
    },
    /// Activates a link, embedding it when the target allows framing.
    Open { link_id: String },
    /// Expands or collapses a category.
    Toggle { category_id: String },
    AddCategory { name: String },
    RenameCategory { category_id: String, name: String },
    MoveCategory { category_id: String, sort_order: i64 },
    DeleteCategory { category_id: String },
    AddLink {
        category_id: String,
        name: String,
        url: String,
        #[arg(long, value_enum, default_value_t = ModeArg::App)]
        mode: ModeArg,
        /// Marks the link as refusing to be framed.
        #[arg(long)]
        not_embeddable: bool,
    },
    EditLink {
        link_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        #[arg(long)]
        embeddable: Option<bool>,
    },
    MoveLink { link_id: String, sort_order: i64 },
    DeleteLink { link_id: String },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    App,
    Tab,
}

impl From<ModeArg> for OpenMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::App => OpenMode::App,
            ModeArg::Tab => OpenMode::Tab,
        }
    }
}

/// Asks on the terminal unless `--yes` was given.
struct StdinConfirm {
    assume_yes: bool,
}

#[async_trait]
impl ConfirmPrompt for StdinConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stdout = io::stdout().lock();
            write!(stdout, "{prompt} [y/N] ")?;
            stdout.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Ok(Err(err)) => {
                warn!(%err, "could not read confirmation");
                false
            }
            Err(err) => {
                warn!(%err, "confirmation prompt did not finish");
                false
            }
        }
    }
}

fn init_tracing(log_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let mut settings = load_settings();
    if let Some(api_url) = args.api_url.clone() {
        settings.api_base_url = api_url;
    }
    init_tracing(&settings.log_filter);

    let api = HttpCatalogApi::new(settings.api_url()?, settings.request_timeout())
        .context("failed to build catalog client")?;
    let (frame, frame_events) = FrameLoader::new(settings.embed_timeout());
    let controller = CatalogController::new(
        Arc::new(api),
        frame,
        Arc::new(StdinConfirm {
            assume_yes: args.yes,
        }),
    );
    let frame_task = controller.spawn_frame_event_task(frame_events);

    if controller.load_catalog().await? == CatalogSource::Fallback {
        eprintln!("Catalog server unavailable; showing the built-in catalog.");
    }

    let outcome = run(&controller, &settings, args.command).await;
    controller.settle().await;
    controller.teardown();
    frame_task.abort();

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => match err.downcast_ref::<SyncError>() {
            Some(sync) => {
                eprintln!("{}", sync.user_message());
                Ok(ExitCode::FAILURE)
            }
            None => Err(err),
        },
    }
}

async fn run(
    controller: &Arc<CatalogController>,
    settings: &Settings,
    command: Command,
) -> Result<()> {
    match command {
        Command::List { all } => print_catalog(controller, all).await,
        Command::Open { link_id } => open_link(controller, settings, LinkId::new(link_id)).await?,
        Command::Toggle { category_id } => {
            let expanded = controller
                .toggle_category(&CategoryId::new(category_id.clone()))
                .await?;
            let state = if expanded { "expanded" } else { "collapsed" };
            println!("category {category_id} is {state}");
        }
        Command::AddCategory { name } => {
            let category = controller.create_category(&name).await?;
            println!("created category {} ({})", category.id, category.name);
        }
        Command::RenameCategory { category_id, name } => {
            controller
                .rename_category(&CategoryId::new(category_id.clone()), &name)
                .await?;
            println!("renamed category {category_id}");
        }
        Command::MoveCategory {
            category_id,
            sort_order,
        } => {
            controller
                .move_category(&CategoryId::new(category_id.clone()), sort_order)
                .await?;
            println!("moved category {category_id} to position {sort_order}");
        }
        Command::DeleteCategory { category_id } => {
            let outcome = controller
                .delete_category(&CategoryId::new(category_id.clone()))
                .await?;
            report_delete("category", &category_id, outcome);
        }
        Command::AddLink {
            category_id,
            name,
            url,
            mode,
            not_embeddable,
        } => {
            let draft = NewLinkDraft {
                open_mode: mode.into(),
                iframe_compatible: !not_embeddable,
                ..NewLinkDraft::new(name, url)
            };
            let link = controller
                .create_link(&CategoryId::new(category_id), draft)
                .await?;
            println!("created link {} ({})", link.id, link.name);
        }
        Command::EditLink {
            link_id,
            name,
            url,
            mode,
            embeddable,
        } => {
            let patch = LinkPatch {
                name,
                url,
                open_mode: mode.map(OpenMode::from),
                iframe_compatible: embeddable,
                ..LinkPatch::default()
            };
            controller
                .update_link(&LinkId::new(link_id.clone()), patch)
                .await?;
            println!("updated link {link_id}");
        }
        Command::MoveLink {
            link_id,
            sort_order,
        } => {
            controller
                .move_link(&LinkId::new(link_id.clone()), sort_order)
                .await?;
            println!("moved link {link_id} to position {sort_order}");
        }
        Command::DeleteLink { link_id } => {
            let outcome = controller.delete_link(&LinkId::new(link_id.clone())).await?;
            report_delete("link", &link_id, outcome);
        }
    }
    Ok(())
}

fn report_delete(kind: &str, id: &str, outcome: DeleteOutcome) {
    match outcome {
        DeleteOutcome::Deleted => println!("deleted {kind} {id}"),
        DeleteOutcome::Cancelled => println!("kept {kind} {id}"),
    }
}

async fn print_catalog(controller: &CatalogController, all: bool) {
    let catalog = controller.catalog().await;
    if catalog.is_empty() {
        println!("(no categories)");
        return;
    }
    for category in catalog.categories() {
        let marker = if category.expanded { "-" } else { "+" };
        println!("[{marker}] {} {}", category.id, category.name);
        if !category.expanded && !all {
            continue;
        }
        for link in &category.links {
            let framing = if link.embeddable() { "" } else { " (opens externally)" };
            println!("      {} {} <{}>{framing}", link.id, link.name, link.url);
        }
    }
}

async fn open_link(
    controller: &CatalogController,
    settings: &Settings,
    link_id: LinkId,
) -> Result<()> {
    let mut events = controller.subscribe_events();
    let attempt = match controller.activate_link(&link_id).await? {
        Activation::External { url } => {
            println!("open in a new tab: {url}");
            return Ok(());
        }
        Activation::Embedded { attempt } => attempt,
    };

    let Some(snapshot) = controller.frame().snapshot() else {
        bail!("frame was torn down before {link_id} started loading");
    };
    if let FrameOverlay::Busy { label } = controller.frame().overlay() {
        println!("Loading {label}...");
    }
    let http = reqwest::Client::builder()
        .timeout(settings.embed_timeout())
        .build()
        .context("failed to build embed probe client")?;
    let probe = attach_probe(
        controller.frame(),
        attempt,
        snapshot.address.clone(),
        Arc::new(HttpEmbedProbe::new(http)),
    );

    let loaded = wait_for_embed(&mut events, &link_id).await?;
    probe.abort();
    debug!(%link_id, attempt = attempt.get(), loaded, "embed attempt resolved");

    match controller.frame().overlay() {
        FrameOverlay::Blocked {
            message,
            external_url,
        } => {
            println!("{message}");
            println!("open in a new tab: {external_url}");
        }
        _ => println!("embedded {} <{}>", snapshot.label, snapshot.address),
    }
    Ok(())
}

/// Waits until the controller resolved the embed of `link_id`. Returns
/// whether it loaded.
async fn wait_for_embed(
    events: &mut broadcast::Receiver<CatalogEvent>,
    link_id: &LinkId,
) -> Result<bool> {
    loop {
        match events.recv().await {
            Ok(CatalogEvent::EmbedLoaded { link_id: loaded }) if &loaded == link_id => {
                return Ok(true)
            }
            Ok(CatalogEvent::EmbedBlocked { link_id: blocked }) if &blocked == link_id => {
                return Ok(false)
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed catalog events"),
            Err(RecvError::Closed) => bail!("catalog controller closed while loading {link_id}"),
        }
    }
}
