use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use portal_client::adapters::{SystemClipboard, SystemUrlOpener};
use portal_client::config::Config;
use portal_client::control::{ControlChannel, HttpControlChannel};
use portal_client::sync::Synchronizer;
use portal_client::{Action, ActionSuccess, Directory, DirectorySnapshot, Dispatcher};
use shared::types::{NewPortal, PortalId};

#[derive(Parser)]
#[command(name = "portalctl", about = "List and act on local portals")]
struct Args {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon URL, overrides the config file
    #[arg(long, global = true)]
    daemon: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print all portals
    List,
    /// Print the portal list on every change until interrupted
    Watch,
    /// Open a portal's URL with the default handler
    Open { id: String },
    /// Copy a portal's address:port to the clipboard
    Copy { id: String },
    /// Create an invitation for a portal
    Invite { id: String },
    /// Delete a portal
    Delete { id: String },
    /// Provision a new portal
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "127.0.0.1")]
        address: String,
        #[arg(long)]
        port: u16,
        #[arg(long)]
        scheme: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new("portal_client=info,portalctl=info")
                }),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(url) = args.daemon {
        config.daemon.url = url;
    }

    let channel = Arc::new(HttpControlChannel::new(&config.daemon)?);
    let (directory, writer) = Directory::new();
    let mut sync = Synchronizer::new(writer, channel.clone());

    let action = match args.command {
        Command::Watch => return watch(directory, sync, &config).await,
        Command::Create { name, address, port, scheme } => {
            let created = channel
                .create_portal(&NewPortal { name, address, port, scheme })
                .await
                .context("Failed to create portal")?;
            println!("{}", created.record.id);
            return Ok(());
        }
        Command::List => None,
        Command::Open { id } => Some((id, Action::Open)),
        Command::Copy { id } => Some((id, Action::CopyAddress)),
        Command::Invite { id } => Some((id, Action::Invite)),
        Command::Delete { id } => Some((id, Action::Delete)),
    };

    sync.poll()
        .await
        .with_context(|| format!("Failed to reach daemon at {}", config.daemon.url))?;

    let Some((id, action)) = action else {
        print_snapshot(&directory.snapshot());
        return Ok(());
    };

    let id = PortalId(id);
    let Some(record) = directory.get(&id) else {
        if action == Action::Delete {
            println!("{} already absent", id);
            return Ok(());
        }
        anyhow::bail!("No portal with id {}", id);
    };

    let dispatcher = Dispatcher::new(
        directory,
        channel,
        Arc::new(SystemUrlOpener),
        Arc::new(SystemClipboard),
    );

    let outcome = dispatcher.dispatch(&record, action).await;
    match outcome.result {
        Ok(ActionSuccess::Opened { url }) => println!("Opened {}", url),
        Ok(ActionSuccess::Copied { text }) => println!("Copied {}", text),
        Ok(ActionSuccess::Invited(invite)) => println!("{}", invite.token),
        Ok(ActionSuccess::Deleted { already_absent: true }) => {
            println!("{} already absent", record.name)
        }
        Ok(ActionSuccess::Deleted { already_absent: false }) => println!("Deleted {}", record.name),
        Err(e) => return Err(e).with_context(|| format!("{} failed for {}", action, record.name)),
    }

    Ok(())
}

async fn watch(
    directory: Directory,
    sync: Synchronizer<HttpControlChannel>,
    config: &Config,
) -> Result<()> {
    let cancel = CancellationToken::new();
    // HTTP has no push; the sender is dropped and only polling feeds the directory
    let (_, events) = mpsc::channel(1);
    let sync_task = tokio::spawn(sync.run(events, config.sync.poll_interval(), cancel.clone()));

    let mut subscription = directory.subscribe();
    loop {
        tokio::select! {
            next = subscription.next() => match next {
                Some(snapshot) => print_snapshot(&snapshot),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    cancel.cancel();
    sync_task.await.context("Directory sync task failed")?;
    Ok(())
}

fn print_snapshot(snapshot: &DirectorySnapshot) {
    if !snapshot.daemon_reachable {
        eprintln!("(daemon unreachable, showing last known portals)");
    }
    for record in &snapshot.records {
        println!("{}\t{}\t{}", record.name, record.display_address(), record.id);
    }
}
