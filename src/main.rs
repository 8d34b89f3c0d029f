use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tower_lsp::lsp_types::Url;

use mclsp_client::config::{self, ClientConfig};
use mclsp_client::extension::{ActiveDocument, Extension};
use mclsp_client::server::{ResolverInputs, ServerBootstrap, StateStore, StateStorer};
use mclsp_client::ui::{TerminalUi, UserInterface};

#[derive(Parser)]
#[command(name = "mclsp-client")]
#[command(version, about = "Client core for the McCode language server")]
struct Cli {
    /// JSON settings file (same shape as the editor settings)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Consent to installing the server without prompting
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the server command and print it
    Resolve,
    /// Start the server and print the virtual C document of a McCode file
    Show {
        /// An .instr or .comp file
        file: PathBuf,
    },
    /// Reinstall the server package
    Reinstall,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn open_state() -> anyhow::Result<Arc<dyn StateStorer>> {
    let path = config::state_db_path();
    let persistent = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .map_err(anyhow::Error::from)
        .and_then(|()| Ok(StateStore::new(&path)?));
    let store = match persistent {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!("State database unavailable ({}), keeping state in memory", e);
            StateStore::in_memory()?
        }
    };
    Ok(Arc::new(store))
}

fn file_url(path: &Path) -> anyhow::Result<Url> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("resolving {}", path.display()))?;
    Url::from_file_path(&absolute)
        .map_err(|_| anyhow::anyhow!("{} is not a valid file path", absolute.display()))
}

async fn run(cli: Cli, config: ClientConfig) -> anyhow::Result<()> {
    let ui: Arc<dyn UserInterface> = Arc::new(TerminalUi::new(cli.yes));
    let bootstrap = ServerBootstrap::with_process_runner(open_state()?, ui.clone());
    let env_override = config::server_env_override();

    match cli.command {
        Command::Resolve => {
            let inputs = ResolverInputs::from_config(&config.server, env_override);
            let server = bootstrap
                .resolve(&inputs)
                .await
                .context("no language server available")?;
            println!("{}", server.command_line());
            Ok(())
        }
        Command::Show { file } => {
            let uri = file_url(&file)?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let root_uri = std::env::current_dir()
                .ok()
                .and_then(|dir| Url::from_directory_path(dir).ok());

            let mut extension =
                Extension::new(config, env_override, bootstrap, ui).with_root_uri(root_uri);
            anyhow::ensure!(extension.activate().await, "language server did not start");

            extension.did_open(uri.clone(), text.clone());
            let result = extension
                .show_virtual_document(Some(&ActiveDocument {
                    uri: uri.clone(),
                    text: Some(text),
                }))
                .await;
            extension.did_close(uri);
            extension.deactivate().await;
            result?;
            Ok(())
        }
        Command::Reinstall => {
            let mut extension = Extension::new(config, env_override, bootstrap, ui);
            let outcome = extension.reinstall_server().await?;
            println!("{}", outcome.server.command_line());
            extension.deactivate().await;
            Ok(())
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let _guard = match mclsp_client::logging::init(config.log_level, &config::log_path()) {
        Ok(guard) => Some(guard),
        Err(_) => {
            mclsp_client::logging::init_stderr(config.log_level);
            None
        }
    };

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run(cli, config))
}
