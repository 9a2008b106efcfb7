use crate::autosave::{AutosaveEvent, open_screen};
use crate::catalog::{ComponentCatalog, StaticCatalog};
use crate::config::{Config, load_config};
use crate::dump::write_state_dump;
use crate::graph::{GraphState, check_invariants, serialize};
use crate::logging;
use crate::persistence::FilePersistence;
use crate::session::Edit;
use anyhow::Result;
use clap::Parser;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "scv", version, about = "Apply edit scripts to a versioned canvas screen")]
pub struct Args {
    /// Screen document ({ "version": n, "nodes": [...] })
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,

    /// JSON array of edits, or '-' for stdin
    #[arg(short = 'e', long = "edits")]
    pub edits: Option<PathBuf>,

    /// Config file (JSON or JSON5)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Component catalog used for display names in the dump
    #[arg(long = "catalog")]
    pub catalog: Option<PathBuf>,

    /// Write a diagnostic dump of the final state instead of printing nodes
    #[arg(short = 'd', long = "dump")]
    pub dump: Option<PathBuf>,

    /// Fail if the final state breaks a structural invariant
    #[arg(long = "check")]
    pub check: bool,

    /// Create an empty screen when the store file does not exist
    #[arg(long = "init")]
    pub init: bool,
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    logging::init(&config.logging)?;

    let catalog = args.catalog.as_deref().map(StaticCatalog::load).transpose()?;
    let edits = match args.edits.as_deref() {
        Some(path) => parse_edits(&read_input(path)?)?,
        None => Vec::new(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let state = runtime.block_on(edit_screen(&args, &config, &edits))?;

    if args.check {
        let violations = check_invariants(&state);
        if !violations.is_empty() {
            for violation in &violations {
                eprintln!("invariant violated: {violation}");
            }
            return Err(anyhow::anyhow!(
                "{} invariant violation(s) in {}",
                violations.len(),
                args.store.display()
            ));
        }
    }

    if let Some(path) = args.dump.as_deref() {
        let catalog = catalog.as_ref().map(|catalog| catalog as &dyn ComponentCatalog);
        write_state_dump(path, &state, catalog)?;
    } else {
        let nodes = serialize(&state);
        println!("{}", serde_json::to_string_pretty(&nodes)?);
    }
    Ok(())
}

async fn edit_screen(args: &Args, config: &Config, edits: &[Edit]) -> Result<Arc<GraphState>> {
    let client = Arc::new(FilePersistence::new(&args.store));
    if args.init && client.create_if_missing().await? {
        info!(path = %client.path().display(), "created empty screen");
    }

    let screen = open_screen(client, &config.autosave).await?;
    let store = screen.session.store().clone();
    for edit in edits {
        screen.session.apply(edit);
    }

    let events = screen.close().await;
    for event in &events {
        match event {
            AutosaveEvent::Saved { version } => info!(%version, "saved"),
            AutosaveEvent::Conflict { version } => {
                warn!(%version, "screen changed elsewhere; local edits were replaced by the stored copy");
            }
            AutosaveEvent::ScreenMissing => {
                return Err(anyhow::anyhow!("screen {} no longer exists", args.store.display()));
            }
            AutosaveEvent::Failed { message } => {
                return Err(anyhow::anyhow!("save failed: {message}"));
            }
            AutosaveEvent::Scheduled | AutosaveEvent::Saving { .. } => {}
        }
    }
    Ok(store.current())
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Reads an edit script: a JSON array of edits, or a single edit object.
fn parse_edits(input: &str) -> Result<Vec<Edit>> {
    let value: serde_json::Value = serde_json::from_str(input)?;
    let edits = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(edits)
}
