use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use pkgsync::archive::{self, ArchiveFormat, ExtractOptions};
use pkgsync::config::SyncConfig;
use pkgsync::git::{GitBackend, GitCli};
use pkgsync::http::HttpClient;
use pkgsync::package::Scheme;
use pkgsync::source::RegistrySource;
use pkgsync::store::JsonFileStore;
use pkgsync::sync::Reconciler;
use std::path::PathBuf;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// pkgsync - synthetic git repositories for published packages
///
/// Keeps one git repository per package whose tags hold the published
/// sources of each desired version.
///
/// Examples:
///   pkgsync sync npm/left-pad --repo-dir /srv/repos/npm/left-pad
///   pkgsync sync go/golang.org/x/mod --repo-dir ./mod.git --revision v0.14.0^0
///   pkgsync extract package.tgz ./out --skip-invalid
#[derive(Parser, Debug)]
#[command(author, version = env!("PKGSYNC_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/pkgsync/config.json)
    #[arg(long, env = "PKGSYNC_CONFIG", value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Metadata store file (defaults to <data dir>/pkgsync/store.json)
    #[arg(long, env = "PKGSYNC_STORE", value_name = "PATH", global = true)]
    store: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Reconcile a package repository with its desired versions
    Sync(SyncArgs),

    /// Safely extract an archive into a directory
    Extract(ExtractArgs),
}

#[derive(clap::Args, Debug)]
struct SyncArgs {
    /// Repository name, e.g. "npm/left-pad" or "maven/org.slf4j/slf4j-api"
    #[arg(value_name = "REPO-NAME")]
    repo_name: String,

    /// Target repository; created as a bare repository if missing
    #[arg(long, value_name = "DIR")]
    repo_dir: PathBuf,

    /// Resolve only this revision, e.g. "v1.2.3^0"
    #[arg(long, value_name = "REV")]
    revision: Option<String>,
}

#[derive(clap::Args, Debug)]
struct ExtractArgs {
    archive: PathBuf,

    dest: PathBuf,

    /// zip, tar or tar.gz (guessed from the file name by default)
    #[arg(long)]
    format: Option<ArchiveFormat>,

    /// Skip unsafe entries instead of failing
    #[arg(long)]
    skip_invalid: bool,

    /// Skip entries that already exist instead of failing
    #[arg(long)]
    skip_duplicates: bool,

    /// Skip entries larger than this many bytes
    #[arg(long, value_name = "BYTES")]
    max_file_size: Option<u64>,

    /// Drop this many leading path segments from every entry
    #[arg(long, default_value_t = 0)]
    strip_components: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync(args) => sync(cli.config, cli.store, args).await?,
        Commands::Extract(args) => extract(args)?,
    }
    Ok(())
}

async fn sync(config: Option<PathBuf>, store: Option<PathBuf>, args: SyncArgs) -> Result<()> {
    let config_path = config
        .or_else(SyncConfig::default_path)
        .context("Could not determine a config path; pass --config")?;
    let store_path = store
        .or_else(SyncConfig::default_store_path)
        .context("Could not determine a store path; pass --store")?;
    let config = SyncConfig::load(&config_path)?;

    let scheme = Scheme::parse_repo_name(&args.repo_name)?.scheme;
    let http = HttpClient::with_timeout(HTTP_TIMEOUT)?;
    let source = RegistrySource::with_base_url(scheme, http, config.registry_url(scheme))
        .with_max_file_size(config.max_file_size);
    let git = GitCli::new(config.placeholder_signature(), config.command_timeout());

    if !args.repo_dir.join("HEAD").exists() {
        info!("Initializing bare repository at {:?}", args.repo_dir);
        git.init(&args.repo_dir, true).await?;
    }

    let reconciler = Reconciler::new(source, git, JsonFileStore::new(store_path), config.options());
    reconciler
        .fetch(&args.repo_dir, &args.repo_name, args.revision.as_deref())
        .await
}

fn extract(args: ExtractArgs) -> Result<()> {
    let format = match args.format {
        Some(format) => format,
        None => ArchiveFormat::from_path(&args.archive).with_context(|| {
            format!("Cannot tell the format of {:?}; pass --format", args.archive)
        })?,
    };
    let mut options = ExtractOptions {
        skip_invalid: args.skip_invalid,
        skip_duplicates: args.skip_duplicates,
        strip_components: args.strip_components,
        filter: None,
    };
    if let Some(max) = args.max_file_size {
        options = options.with_max_file_size(max);
    }
    archive::extract_file(&args.archive, format, &args.dest, &options)
}
