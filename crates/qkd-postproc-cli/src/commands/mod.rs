pub mod init_config;
pub mod key_length;
pub mod simulate;
pub mod sweep;

use qkd_postproc_core::{SessionConfig, StrategyKind};

/// Load the config file if given, else defaults; apply CLI overrides and validate.
/// Exits on any error.
pub fn load_config(path: Option<&str>, strategy: Option<&str>, prior_qber: Option<f64>) -> SessionConfig {
    let mut config = match path {
        Some(p) => match SessionConfig::load(p) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config {p}: {e}");
                std::process::exit(1);
            }
        },
        None => SessionConfig::default(),
    };
    match strategy {
        Some("ldpc") => config.strategy = StrategyKind::Ldpc,
        Some("cascade") => config.strategy = StrategyKind::Cascade,
        _ => {}
    }
    if let Some(p0) = prior_qber {
        config.prior_qber = p0;
    }
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    config
}

/// Parse a comma-separated list of rates; exits on malformed entries.
pub fn parse_rates(list: &str) -> Vec<f64> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<f64>() {
            Ok(q) if (0.0..=0.5).contains(&q) => q,
            _ => {
                eprintln!("Invalid error rate: {s} (expected a number in [0, 0.5])");
                std::process::exit(1);
            }
        })
        .collect()
}

/// Write a serializable value as pretty JSON, reporting failures on stderr.
pub fn write_json<T: serde::Serialize>(value: &T, path: &str) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => match std::fs::write(path, json) {
            Ok(()) => println!("\nResults written to {path}"),
            Err(e) => eprintln!("Failed to write {path}: {e}"),
        },
        Err(e) => eprintln!("Failed to serialize results: {e}"),
    }
}

/// Prior QBER for block sizing; the zero-rate sizing rule is kept for q = 0.
pub fn prior_for(qber: f64) -> f64 {
    qber.clamp(0.0, 0.49)
}
