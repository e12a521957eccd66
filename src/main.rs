//! steplink CLI
//!
//! Entry point for the `steplink` command-line tool.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use steplink::metadata::Key;
use steplink::{
    record_start, record_stop, run_step, FsLinkStore, IdentityRequest, LinkBuilder,
    RecordResult, RecorderConfig, SettingsLoader, Step,
};

#[derive(Parser)]
#[command(name = "steplink")]
#[command(about = "Record and sign supply-chain step evidence", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record materials, run a command, record products and sign the link
    Run {
        #[arg(long, short = 'n')]
        step_name: String,

        /// Material files or directories
        #[arg(long, short = 'm', num_args = 1..)]
        materials: Vec<String>,

        /// Product files or directories
        #[arg(long, short = 'p', num_args = 1..)]
        products: Vec<String>,

        /// Capture stdout and stderr in the link
        #[arg(long, short = 's')]
        record_streams: bool,

        #[command(flatten)]
        identity: IdentityArgs,

        #[command(flatten)]
        recorder: RecorderArgs,

        /// Directory link files are written to
        #[arg(long, short = 'd', default_value = ".")]
        metadata_directory: PathBuf,

        /// The command to run (after --)
        #[arg(last = true)]
        cmd: Vec<String>,
    },

    /// Two-phase recording around work done outside steplink
    Record {
        #[command(subcommand)]
        action: RecordCommands,
    },

    /// Generate an Ed25519 key pair (PATH and PATH.pub)
    Keygen { path: PathBuf },
}

#[derive(Subcommand)]
enum RecordCommands {
    /// Record materials and store an unfinished link
    Start {
        #[arg(long, short = 'n')]
        step_name: String,

        #[arg(long, short = 'm', num_args = 1..)]
        materials: Vec<String>,

        #[command(flatten)]
        identity: IdentityArgs,

        #[command(flatten)]
        recorder: RecorderArgs,

        #[arg(long, short = 'd', default_value = ".")]
        metadata_directory: PathBuf,
    },

    /// Record products and turn the unfinished link into a finished one
    Stop {
        #[arg(long, short = 'n')]
        step_name: String,

        #[arg(long, short = 'p', num_args = 1..)]
        products: Vec<String>,

        #[command(flatten)]
        identity: IdentityArgs,

        #[command(flatten)]
        recorder: RecorderArgs,

        #[arg(long, short = 'd', default_value = ".")]
        metadata_directory: PathBuf,
    },
}

#[derive(Args)]
struct IdentityArgs {
    /// Ed25519 private key file
    #[arg(long, short = 'k')]
    key: Option<PathBuf>,

    /// Sign with gpg; without ID the default secret key is used
    #[arg(long, short = 'g', num_args = 0..=1)]
    gpg: Option<Option<String>>,

    /// gpg home directory
    #[arg(long)]
    gpg_home: Option<PathBuf>,
}

#[derive(Args)]
struct RecorderArgs {
    /// Directory artifact paths are relative to
    #[arg(long)]
    base_path: Option<String>,

    /// Exclude artifacts matching these patterns
    #[arg(long = "exclude", num_args = 1..)]
    exclude_patterns: Option<Vec<String>>,

    /// Strip these prefixes from recorded artifact paths
    #[arg(long, num_args = 1..)]
    lstrip_paths: Option<Vec<String>>,

    /// Digest algorithms (sha224, sha256, sha384, sha512)
    #[arg(long, num_args = 1..)]
    hash_algorithms: Option<Vec<String>>,

    /// Descend into symlinked directories
    #[arg(long)]
    follow_symlink_dirs: bool,
}

fn main() {
    init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            step_name,
            materials,
            products,
            record_streams,
            identity,
            recorder,
            metadata_directory,
            cmd,
        } => {
            let step = Step::new(step_name)
                .with_materials(materials)
                .with_products(products)
                .with_command(cmd);
            run_run(&step, record_streams, &identity, &recorder, &metadata_directory)
        }
        Commands::Record { action } => match action {
            RecordCommands::Start {
                step_name,
                materials,
                identity,
                recorder,
                metadata_directory,
            } => run_record_start(&step_name, &materials, &identity, &recorder, &metadata_directory),
            RecordCommands::Stop {
                step_name,
                products,
                identity,
                recorder,
                metadata_directory,
            } => run_record_stop(&step_name, &products, &identity, &recorder, &metadata_directory),
        },
        Commands::Keygen { path } => run_keygen(&path),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// STEPLINK_LOG sets the filter, STEPLINK_LOG_FORMAT=json switches to JSON
fn init_tracing() {
    let log_format = std::env::var("STEPLINK_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_env("STEPLINK_LOG").unwrap_or_else(|_| "steplink=warn".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn identity_request(args: &IdentityArgs) -> RecordResult<IdentityRequest> {
    let signing_key = match &args.key {
        Some(path) => Some(Key::from_file(path)?),
        None => None,
    };

    let mut request = IdentityRequest {
        signing_key,
        ..IdentityRequest::default()
    };
    match &args.gpg {
        Some(Some(keyid)) => request.gpg_keyid = Some(keyid.clone()),
        Some(None) => request.gpg_use_default = true,
        None => {}
    }
    request.gpg_home = args.gpg_home.clone();

    Ok(request)
}

/// Layered settings with command-line values as the top layer
fn recorder_config(args: &RecorderArgs) -> RecordResult<RecorderConfig> {
    let mut artifacts = Map::new();
    if let Some(base_path) = &args.base_path {
        artifacts.insert("base_path".to_string(), json!(base_path));
    }
    if let Some(patterns) = &args.exclude_patterns {
        artifacts.insert("exclude_patterns".to_string(), json!(patterns));
    }
    if let Some(prefixes) = &args.lstrip_paths {
        artifacts.insert("lstrip_paths".to_string(), json!(prefixes));
    }
    if let Some(algorithms) = &args.hash_algorithms {
        artifacts.insert("hash_algorithms".to_string(), json!(algorithms));
    }
    if args.follow_symlink_dirs {
        artifacts.insert("follow_symlink_dirs".to_string(), Value::Bool(true));
    }

    SettingsLoader::from_environment()
        .with_overrides(json!({ "artifacts": artifacts }))
        .load()?
        .recorder_config()
}

fn run_run(
    step: &Step,
    record_streams: bool,
    identity: &IdentityArgs,
    recorder: &RecorderArgs,
    metadata_directory: &Path,
) -> RecordResult<()> {
    let identity = identity_request(identity)?.resolve()?;
    let config = recorder_config(recorder)?;
    let builder = LinkBuilder::new(config).with_record_streams(record_streams);
    let store = FsLinkStore::new(metadata_directory);

    run_step(&builder, step, identity.as_ref(), &store)?;
    if identity.is_none() {
        tracing::warn!(step = %step.name, "no identity given, link not signed or stored");
    }
    Ok(())
}

fn run_record_start(
    step_name: &str,
    materials: &[String],
    identity: &IdentityArgs,
    recorder: &RecorderArgs,
    metadata_directory: &Path,
) -> RecordResult<()> {
    let request = identity_request(identity)?;
    let config = recorder_config(recorder)?;
    let store = FsLinkStore::new(metadata_directory);

    record_start(step_name, materials, &request, &config, &store)?;
    Ok(())
}

fn run_record_stop(
    step_name: &str,
    products: &[String],
    identity: &IdentityArgs,
    recorder: &RecorderArgs,
    metadata_directory: &Path,
) -> RecordResult<()> {
    let request = identity_request(identity)?;
    let config = recorder_config(recorder)?;
    let store = FsLinkStore::new(metadata_directory);

    record_stop(step_name, products, &request, &config, &store)?;
    Ok(())
}

fn run_keygen(path: &Path) -> RecordResult<()> {
    let key = Key::generate_ed25519()?;
    key.write_to_file(path)?;

    let mut public_path = path.as_os_str().to_owned();
    public_path.push(".pub");
    key.public_only().write_to_file(Path::new(&public_path))?;

    println!("{}", key.keyid);
    Ok(())
}
