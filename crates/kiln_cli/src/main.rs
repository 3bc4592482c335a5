//! Kiln CLI
//!
//! Local command-line interface over a kiln data directory.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use kiln_core::{ArtifactPatch, ArtifactSpec, ExecutionRequest, KilnConfig, StorageConfig};
use kiln_runtime::KilnService;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Build and run artifacts from source repositories", long_about = None)]
#[command(version)]
struct Cli {
    /// Data directory
    #[arg(long, global = true, env = "KILN_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Default execution timeout in seconds
    #[arg(long, global = true, env = "KILN_EXECUTOR_TIMEOUT")]
    default_timeout: Option<u64>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new artifact
    Register {
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Repository URL
        #[arg(short, long)]
        repo: String,
        /// Branch to build
        #[arg(short, long, default_value = "main")]
        branch: String,
        /// Path inside the repository to build
        #[arg(long, default_value = "")]
        build_path: String,
        /// Description
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List artifacts
    List,
    /// Show one artifact
    Show {
        /// Artifact id
        id: String,
    },
    /// Edit an artifact
    Update {
        /// Artifact id
        id: String,
        #[command(flatten)]
        patch: PatchArgs,
    },
    /// Delete an artifact and its binary
    Delete {
        /// Artifact id
        id: String,
    },
    /// Build an artifact and wait for the result
    Build {
        /// Artifact id
        id: String,
    },
    /// Run a built artifact
    Exec {
        /// Artifact id
        id: String,
        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Environment entry, KEY=VALUE
        #[arg(short, long = "env")]
        env: Vec<String>,
        /// Standard input content
        #[arg(long)]
        stdin: Option<String>,
        /// Arguments passed to the artifact
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Show a recorded execution
    Execution {
        /// Execution id
        id: String,
    },
}

#[derive(Args)]
struct PatchArgs {
    /// New display name
    #[arg(long)]
    name: Option<String>,
    /// New description
    #[arg(long)]
    description: Option<String>,
    /// New repository URL
    #[arg(long)]
    repo: Option<String>,
    /// New branch
    #[arg(long)]
    branch: Option<String>,
    /// New build path
    #[arg(long)]
    build_path: Option<String>,
}

impl From<PatchArgs> for ArtifactPatch {
    fn from(args: PatchArgs) -> Self {
        Self {
            name: args.name,
            description: args.description,
            repo_url: args.repo,
            branch: args.branch,
            build_path: args.build_path,
        }
    }
}

impl Cli {
    fn config(&self) -> KilnConfig {
        let mut config = KilnConfig {
            storage: StorageConfig::rooted_at(&self.data_dir),
            ..Default::default()
        };
        if let Some(secs) = self.default_timeout {
            config.executor.default_timeout_secs = secs;
        }
        config
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "kiln=info" } else { "kiln=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let service = KilnService::open(cli.config())
        .await
        .wrap_err_with(|| format!("failed to open {}", cli.data_dir.display()))?;

    match cli.command {
        Commands::Register {
            name,
            repo,
            branch,
            build_path,
            description,
        } => {
            let spec = ArtifactSpec::new(name, repo, branch)
                .with_build_path(build_path)
                .with_description(description);
            print_json(&service.register_artifact(spec).await?)
        }
        Commands::List => print_json(&service.list_artifacts().await),
        Commands::Show { id } => print_json(&service.get_artifact(&id).await?),
        Commands::Update { id, patch } => {
            let patch = ArtifactPatch::from(patch);
            if patch.is_empty() {
                color_eyre::eyre::bail!("nothing to update");
            }
            print_json(&service.update_artifact(&id, patch).await?)
        }
        Commands::Delete { id } => print_json(&service.delete_artifact(&id).await?),
        Commands::Build { id } => {
            let ticket = service.request_build(&id).await?;
            let built = ticket.wait().await.wrap_err("build failed")?;
            print_json(&built)
        }
        Commands::Exec {
            id,
            timeout,
            env,
            stdin,
            args,
        } => {
            let mut request = ExecutionRequest::new(id).with_args(args);
            request.env = env;
            request.stdin = stdin;
            request.timeout = timeout;

            // Ctrl-C stops the run; the record is still printed.
            let ctx = CancellationToken::new();
            let on_interrupt = ctx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let record = service.execute_with(&ctx, request, None).await?;
            print_json(&record)
        }
        Commands::Execution { id } => print_json(&service.get_execution(&id).await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_exec() {
        let cli = Cli::try_parse_from([
            "kiln",
            "--data-dir",
            "/tmp/kiln",
            "exec",
            "abc",
            "--timeout",
            "5",
            "--env",
            "A=1",
            "-e",
            "B=2",
            "--",
            "hello",
            "--flag",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, PathBuf::from("/tmp/kiln"));
        match cli.command {
            Commands::Exec { id, timeout, env, args, .. } => {
                assert_eq!(id, "abc");
                assert_eq!(timeout, Some(5));
                assert_eq!(env, vec!["A=1", "B=2"]);
                assert_eq!(args, vec!["hello", "--flag"]);
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_update_patch() {
        let cli = Cli::try_parse_from(["kiln", "update", "abc", "--branch", "dev"]).unwrap();
        match cli.command {
            Commands::Update { patch, .. } => {
                let patch = ArtifactPatch::from(patch);
                assert_eq!(patch.branch.as_deref(), Some("dev"));
                assert!(patch.name.is_none());
            }
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn test_config_from_flags() {
        let cli = Cli::try_parse_from([
            "kiln",
            "--data-dir",
            "/srv/kiln",
            "--default-timeout",
            "30",
            "list",
        ])
        .unwrap();
        let config = cli.config();
        assert_eq!(config.storage.binary_dir, PathBuf::from("/srv/kiln/binaries"));
        assert_eq!(config.executor.default_timeout_secs, 30);
    }
}
