//! CLI for rngaudit: statistical randomness validation from the shell.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rngaudit")]
#[command(about = "rngaudit — is this generator's output distinguishable from randomness?")]
#[command(version = rngaudit_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test battery over a sample file ("-" for stdin) and print the verdict.
    /// Exit code: 0 compliant, 1 non-compliant, 2 inconclusive, 3 configuration error.
    Validate {
        /// Sample file, or "-" to read stdin
        input: String,

        /// Battery name (see `rngaudit batteries`)
        #[arg(long)]
        battery: Option<String>,

        /// Significance level α in (0, 1)
        #[arg(long)]
        significance: Option<f64>,

        /// Number of sequences for the second-order analysis
        #[arg(long)]
        sequences: Option<usize>,

        /// Worker threads (default: available parallelism)
        #[arg(long)]
        workers: Option<usize>,

        /// Execution timeout in seconds
        #[arg(long)]
        timeout_sec: Option<f64>,

        /// Core tests allowed to lack a usable result
        #[arg(long)]
        tolerance: Option<usize>,

        /// Validation config JSON; flags override its values
        #[arg(long)]
        config: Option<String>,

        /// Register an extra battery from a JSON file (used when --battery is absent)
        #[arg(long)]
        battery_file: Option<String>,

        /// Read at most this many bits from the input
        #[arg(long)]
        max_bits: Option<usize>,

        /// Write the session as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// List registered batteries and their entries
    Batteries {
        /// Also load a battery from a JSON file
        #[arg(long)]
        battery_file: Option<String>,

        /// Print batteries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Entropy estimates only (Shannon, most-common-value, collision, Markov)
    Entropy {
        /// Sample file, or "-" to read stdin
        input: String,

        /// Read at most this many bits (required for stdin)
        #[arg(long)]
        max_bits: Option<usize>,

        /// Markov estimator order (1-8)
        #[arg(long, default_value = "1")]
        markov_order: usize,

        /// Write the report as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Validate a seeded StdRng generator: a known-good reference run
    Selftest {
        /// Battery name
        #[arg(long, default_value = rngaudit_core::NIST_SP800_22_BASIC)]
        battery: String,

        /// Generator seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Worker threads (default: available parallelism)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Start the HTTP validation server
    Server {
        /// Port to listen on
        #[arg(long, default_value = "8042")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Validation config JSON applied to every request
        #[arg(long)]
        config: Option<String>,

        /// Register an extra battery from a JSON file
        #[arg(long)]
        battery_file: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Validate {
            input,
            battery,
            significance,
            sequences,
            workers,
            timeout_sec,
            tolerance,
            config,
            battery_file,
            max_bits,
            output,
        } => commands::validate::run(commands::validate::ValidateCommandConfig {
            input: &input,
            battery: battery.as_deref(),
            significance,
            sequences,
            workers,
            timeout_sec,
            tolerance,
            config_path: config.as_deref(),
            battery_file: battery_file.as_deref(),
            max_bits,
            output_path: output.as_deref(),
        }),
        Commands::Batteries { battery_file, json } => {
            commands::batteries::run(battery_file.as_deref(), json)
        }
        Commands::Entropy {
            input,
            max_bits,
            markov_order,
            output,
        } => commands::entropy::run(&input, max_bits, markov_order, output.as_deref()),
        Commands::Selftest {
            battery,
            seed,
            workers,
        } => commands::selftest::run(&battery, seed, workers),
        Commands::Server {
            port,
            host,
            config,
            battery_file,
        } => commands::server::run(&host, port, config.as_deref(), battery_file.as_deref()),
    };
    std::process::exit(code);
}
