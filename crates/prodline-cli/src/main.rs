mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "prodline",
    version,
    about = "Configuration-driven pipeline execution engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Path to the pipeline descriptor
        #[arg(short, long)]
        conf: PathBuf,
        /// Run a single node only
        #[arg(long, conflicts_with = "operator")]
        node: Option<String>,
        /// Run a single operator only
        #[arg(long)]
        operator: Option<String>,
        /// Write the integrated-spec audit artifact during resolution
        #[arg(long)]
        dump_integrated: bool,
    },
    /// Resolve and print the execution schedule without running anything
    Plan {
        /// Path to the pipeline descriptor
        #[arg(short, long)]
        conf: PathBuf,
    },
    /// Validate a pipeline configuration
    Validate {
        /// Path to the pipeline descriptor
        #[arg(short, long)]
        conf: PathBuf,
    },
    /// Base64-encode a sensitive value for spec documents
    Encode { plaintext: String },
    /// Decode a `base64://` value
    Decode { encoded: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level, cli.log_file.as_deref());

    match cli.command {
        Commands::Run {
            conf,
            node,
            operator,
            dump_integrated,
        } => commands::run::execute(&conf, node, operator, dump_integrated).await,
        Commands::Plan { conf } => commands::plan::execute(&conf).await,
        Commands::Validate { conf } => commands::validate::execute(&conf).await,
        Commands::Encode { plaintext } => {
            commands::codec::encode(&plaintext);
            Ok(())
        }
        Commands::Decode { encoded } => commands::codec::decode(&encoded),
    }
}
