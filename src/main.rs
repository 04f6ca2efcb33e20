use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use artship::cmd;
use artship::config::{AppConfig, RegistryOptions};

#[derive(Parser)]
#[command(name = "artship")]
#[command(about = "Extract and examine artifacts from OCI/Docker images")]
#[command(version)]
struct Cli {
    /// Output as JSON (optionally to a file)
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "-")]
    json: Option<String>,

    /// Verbose debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Allow plain HTTP and unverified TLS registries
    #[arg(short = 'k', long, global = true)]
    insecure: bool,

    /// Username for registry authentication
    #[arg(short, long, global = true, env = "ARTSHIP_USERNAME")]
    username: Option<String>,

    /// Password for registry authentication
    #[arg(short, long, global = true, env = "ARTSHIP_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Base64 encoded `username:password`; takes precedence over --username/--password
    #[arg(long, global = true)]
    auth: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show available artifacts in an image
    #[command(name = "ls")]
    List {
        /// Image reference or path to a saved image archive
        image: String,

        /// Filter by type: file, dir, symlink, hardlink, chardev, blockdev, fifo, all
        #[arg(short, long, default_value = "all")]
        filter: String,

        /// Show type, size and permissions
        #[arg(short, long)]
        detailed: bool,

        /// List a single layer (blob digest or diff id) instead of the merged filesystem
        #[arg(short, long)]
        layer: Option<String>,
    },

    /// Show information about one artifact
    Info {
        image: String,
        artifact: String,

        /// Look in a single layer
        #[arg(short, long)]
        layer: Option<String>,
    },

    /// Check whether an artifact exists in an image
    Has { image: String, artifact: String },

    /// Print the content of a file from an image
    Cat { image: String, artifact: String },

    /// Copy artifacts out of an image
    #[command(name = "cp")]
    Copy {
        image: String,

        /// Artifact to copy: path, base name or directory (repeatable)
        #[arg(short, long = "artifact", required = true, value_delimiter = ',')]
        artifacts: Vec<String>,

        /// Target path; an existing directory or one ending in `/` receives each artifact by name
        #[arg(short, long, default_value = ".")]
        output: String,
    },

    /// Extract the whole filesystem of an image
    Extract {
        image: String,

        /// Target directory
        #[arg(short, long)]
        output: String,
    },

    /// Save the flattened filesystem of an image as a tar archive
    Export {
        image: String,

        /// Target file
        #[arg(short, long)]
        output: String,
    },

    /// Compare the filesystems of two images
    Diff {
        source: String,
        target: String,

        /// Also list unchanged artifacts
        #[arg(long)]
        show_unchanged: bool,

        /// Only show one kind of change: added, removed, modified, all
        #[arg(short, long, default_value = "all")]
        filter: String,
    },

    /// List tags of a repository
    Tags { repository: String },

    /// Show manifest and config metadata of an image
    Meta { image: String },

    /// Copy an image from one registry to another
    Mirror {
        source: String,
        destination: String,

        /// Username for the destination registry
        #[arg(long)]
        dst_username: Option<String>,

        /// Password for the destination registry
        #[arg(long)]
        dst_password: Option<String>,
    },

    /// Pack local files into a single-layer image and push it
    #[command(alias = "package")]
    Pack {
        image: String,

        /// File or directory to pack
        source: String,
    },

    /// Print version information
    Version,
}

fn init_tracing(verbose: bool, color: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(color)
                .with_target(false),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let color = !cli.no_color && std::env::var_os("NO_COLOR").is_none();
    if !color {
        crossterm::style::force_color_output(false);
    }
    init_tracing(cli.verbose, color);

    let cfg = AppConfig {
        json: cli.json,
        registry: RegistryOptions::new(cli.insecure, cli.username, cli.password)
            .with_auth(cli.auth.as_deref())?,
    };

    match cli.command {
        Commands::List { image, filter, detailed, layer } => {
            cmd::list::run(&cfg, &image, &filter, detailed, layer.as_deref())
        }
        Commands::Info { image, artifact, layer } => {
            cmd::info::run(&cfg, &image, &artifact, layer.as_deref())
        }
        Commands::Has { image, artifact } => cmd::has::run(&cfg, &image, &artifact),
        Commands::Cat { image, artifact } => cmd::cat::run(&cfg, &image, &artifact),
        Commands::Copy { image, artifacts, output } => {
            cmd::copy::run(&cfg, &image, &artifacts, &output)
        }
        Commands::Extract { image, output } => cmd::extract::run(&cfg, &image, &output),
        Commands::Export { image, output } => cmd::export::run(&cfg, &image, &output),
        Commands::Diff { source, target, show_unchanged, filter } => {
            cmd::diff::run(&cfg, &source, &target, show_unchanged, &filter)
        }
        Commands::Tags { repository } => cmd::tags::run(&cfg, &repository),
        Commands::Meta { image } => cmd::meta::run(&cfg, &image),
        Commands::Mirror { source, destination, dst_username, dst_password } => {
            cmd::mirror::run(&cfg, &source, &destination, dst_username, dst_password)
        }
        Commands::Pack { image, source } => cmd::pack::run(&cfg, &image, &source),
        Commands::Version => cmd::version::run(&cfg),
    }
}
