use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, AuthTokens, CatalogClient, ClientConfig, SyncSnapshot, SyncState, TokenStore,
};
use shared::{error::ClientError, protocol::NewTheme};
use tokio_stream::StreamExt;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "catalog", about = "Browse and curate the content catalog")]
struct Args {
    /// TOML settings file (defaults to ./catalog.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the backend sync job and report its progress.
    Sync {
        /// Reload content and themes once the job succeeds.
        #[arg(long)]
        refresh: bool,
    },
    Content {
        #[command(subcommand)]
        action: ContentAction,
    },
    Themes {
        #[command(subcommand)]
        action: ThemeAction,
    },
    Login {
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
        /// Unix timestamp (seconds) at which the access token expires.
        #[arg(long)]
        expires_at: i64,
    },
    Logout,
}

#[derive(Subcommand, Debug)]
enum ContentAction {
    List,
    SetTheme { id: String, theme_id: String },
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum ThemeAction {
    List,
    Create {
        name: String,
        #[arg(long)]
        confidence: Option<f64>,
    },
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let config = load_settings(args.config.as_deref())?;
    let tokens = token_store(&config)?;

    match args.command {
        Command::Login {
            access_token,
            refresh_token,
            expires_at,
        } => {
            tokens
                .store(&AuthTokens {
                    access_token,
                    refresh_token,
                    expires_at,
                })
                .await?;
            println!("Stored credentials in {}", tokens.path().display());
        }
        Command::Logout => {
            if tokens.clear().await? {
                println!("Signed out");
            } else {
                println!("No stored credentials");
            }
        }
        command => {
            let auth = tokens.load().await?;
            if let Some(auth) = &auth {
                if auth.is_expired(chrono::Utc::now().timestamp()) {
                    warn!("auth: stored access token has expired; requests may be rejected");
                }
            }
            let catalog = CatalogClient::from_config(&config, auth.as_ref())?;
            run(&catalog, command).await?;
        }
    }

    Ok(())
}

fn token_store(config: &ClientConfig) -> Result<TokenStore> {
    match &config.token_path {
        Some(path) => Ok(TokenStore::new(path.clone())),
        None => TokenStore::default_location().context("failed to locate token file"),
    }
}

async fn run(catalog: &CatalogClient, command: Command) -> Result<()> {
    match command {
        Command::Sync { refresh } => run_sync(catalog, refresh).await,
        Command::Content { action } => run_content(catalog, action).await,
        Command::Themes { action } => run_themes(catalog, action).await,
        Command::Login { .. } | Command::Logout => Ok(()),
    }
}

async fn run_sync(catalog: &CatalogClient, refresh: bool) -> Result<()> {
    let mut updates = catalog.sync().updates();
    let printer = tokio::spawn(async move {
        while let Some(snapshot) = updates.next().await {
            report(&snapshot);
            if snapshot.state.is_terminal() {
                break;
            }
        }
    });

    let job = async {
        if refresh {
            catalog.sync_and_refresh().await
        } else {
            catalog.sync().start().await?;
            Ok::<_, ClientError>(catalog.sync().wait().await)
        }
    };

    let outcome = tokio::select! {
        outcome = job => outcome,
        _ = tokio::signal::ctrl_c() => {
            catalog.sync().cancel().await;
            Ok(catalog.sync().snapshot())
        }
    };
    let _ = printer.await;

    let done = outcome.context("sync failed")?;
    match done.state {
        SyncState::Succeeded => {
            if refresh {
                println!(
                    "Reloaded {} content items and {} themes",
                    catalog.content().items().len(),
                    catalog.themes().items().len()
                );
            }
            Ok(())
        }
        SyncState::Cancelled => bail!("sync cancelled"),
        state => match done.last_error {
            Some(err) => Err(err).context("sync did not complete"),
            None => bail!("sync ended in state {state:?}"),
        },
    }
}

fn report(snapshot: &SyncSnapshot) {
    match snapshot.status.progress {
        Some(progress) => println!(
            "[{:?}] polls={} retries={} progress={progress:.0}%",
            snapshot.state, snapshot.poll_count, snapshot.retry_count
        ),
        None => println!(
            "[{:?}] polls={} retries={}",
            snapshot.state, snapshot.poll_count, snapshot.retry_count
        ),
    }
}

async fn run_content(catalog: &CatalogClient, action: ContentAction) -> Result<()> {
    let store = catalog.content();
    store.fetch().await.context("failed to load content")?;

    match action {
        ContentAction::List => {
            for item in store.items() {
                let theme = item.theme_id.as_ref().map(|id| id.as_str()).unwrap_or("-");
                println!("{}\t{:?}\t{}\t{}", item.id, item.kind, theme, item.text);
            }
        }
        ContentAction::SetTheme { id, theme_id } => {
            let updated = store
                .assign_theme(&id, theme_id)
                .await
                .with_context(|| format!("failed to assign theme to content '{id}'"))?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        ContentAction::Delete { id } => {
            store
                .delete(&id)
                .await
                .with_context(|| format!("failed to delete content '{id}'"))?;
            println!("Deleted content {id}");
        }
    }
    Ok(())
}

async fn run_themes(catalog: &CatalogClient, action: ThemeAction) -> Result<()> {
    let store = catalog.themes();
    store.fetch().await.context("failed to load themes")?;

    match action {
        ThemeAction::List => {
            for theme in store.items() {
                let confidence = theme
                    .confidence
                    .map(|value| format!("{value:.2}"))
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{}\t{}\t{} items\tconfidence {}",
                    theme.id, theme.name, theme.content_count, confidence
                );
            }
        }
        ThemeAction::Create { name, confidence } => {
            let created = store
                .create(NewTheme {
                    name,
                    content_count: 0,
                    confidence,
                })
                .await
                .context("failed to create theme")?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        ThemeAction::Delete { id } => {
            store
                .delete(&id)
                .await
                .with_context(|| format!("failed to delete theme '{id}'"))?;
            println!("Deleted theme {id}");
        }
    }
    Ok(())
}
