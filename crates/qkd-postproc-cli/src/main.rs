//! CLI for qkd-postproc: QKD classical post-processing, both parties in one process.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "qkd-postproc")]
#[command(about = "qkd-postproc — Cascade reconciliation, verification and privacy amplification for QKD")]
#[command(version = qkd_postproc_core::VERSION)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run consecutive post-processing sessions over a simulated binary symmetric channel.
    /// Auth buffers carry over between sessions and are replenished from each key.
    Simulate {
        /// Raw key length per session in bits
        #[arg(long, default_value = "100000")]
        bits: usize,

        /// Channel error rate of the simulated raw keys
        #[arg(long, default_value = "0.02")]
        qber: f64,

        /// A-priori QBER used for block sizing (defaults to --qber)
        #[arg(long)]
        prior_qber: Option<f64>,

        /// Number of consecutive sessions
        #[arg(long, default_value = "1")]
        sessions: usize,

        /// Reconciliation strategy
        #[arg(long, value_parser = ["cascade", "ldpc"])]
        strategy: Option<String>,

        /// Pre-shared authentication secret in bits
        #[arg(long, default_value = "262144")]
        auth_bits: usize,

        /// Session config JSON (see `init-config`)
        #[arg(long)]
        config: Option<String>,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Write both parties' session reports as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Success rate, key length and abort causes over a grid of error rates.
    Sweep {
        /// Raw key length per trial in bits
        #[arg(long, default_value = "10000")]
        bits: usize,

        /// Trials per error rate
        #[arg(long, default_value = "10")]
        trials: usize,

        /// Comma-separated error rates
        #[arg(long, default_value = "0.01,0.02,0.04,0.06,0.08,0.10,0.12")]
        qbers: String,

        /// Reconciliation strategy
        #[arg(long, value_parser = ["cascade", "ldpc"])]
        strategy: Option<String>,

        /// Pre-shared authentication secret in bits, per trial
        #[arg(long, default_value = "262144")]
        auth_bits: usize,

        /// Session config JSON (see `init-config`)
        #[arg(long)]
        config: Option<String>,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Write sweep results as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Evaluate the secret-length bound for given inputs, term by term
    KeyLength {
        /// Verified key length ℓ_ver
        #[arg(long)]
        verified_len: usize,

        /// Estimated QBER
        #[arg(long)]
        qber: f64,

        /// Finite-size margin ν added to the estimate
        #[arg(long, default_value = "0.0")]
        margin: f64,

        /// Bits disclosed during reconciliation
        #[arg(long, default_value = "0")]
        leak_ec: u64,

        /// Bits disclosed during verification
        #[arg(long, default_value = "64")]
        leak_ver: u64,

        /// Privacy amplification security parameter
        #[arg(long, default_value = "1e-12")]
        epsilon: f64,
    },

    /// Write the default session config as JSON
    InitConfig {
        /// Output path
        #[arg(long, default_value = "qkd-postproc.json")]
        output: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Simulate {
            bits,
            qber,
            prior_qber,
            sessions,
            strategy,
            auth_bits,
            config,
            seed,
            output,
        } => commands::simulate::run(commands::simulate::SimulateCommandConfig {
            bits,
            qber,
            prior_qber,
            sessions,
            strategy: strategy.as_deref(),
            auth_bits,
            config_path: config.as_deref(),
            seed,
            output_path: output.as_deref(),
        }),
        Commands::Sweep {
            bits,
            trials,
            qbers,
            strategy,
            auth_bits,
            config,
            seed,
            output,
        } => commands::sweep::run(commands::sweep::SweepCommandConfig {
            bits,
            trials,
            qbers: &qbers,
            strategy: strategy.as_deref(),
            auth_bits,
            config_path: config.as_deref(),
            seed,
            output_path: output.as_deref(),
        }),
        Commands::KeyLength {
            verified_len,
            qber,
            margin,
            leak_ec,
            leak_ver,
            epsilon,
        } => commands::key_length::run(verified_len, qber, margin, leak_ec, leak_ver, epsilon),
        Commands::InitConfig { output } => commands::init_config::run(&output),
    }
}
