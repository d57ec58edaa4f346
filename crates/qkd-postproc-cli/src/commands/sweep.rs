//! `qkd-postproc sweep`: trials over a grid of channel error rates.

use std::collections::BTreeMap;

use qkd_postproc_core::{BitString, SimulatedLink, binary_entropy, binary_symmetric_pair};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

pub struct SweepCommandConfig<'a> {
    pub bits: usize,
    pub trials: usize,
    pub qbers: &'a str,
    pub strategy: Option<&'a str>,
    pub auth_bits: usize,
    pub config_path: Option<&'a str>,
    pub seed: Option<u64>,
    pub output_path: Option<&'a str>,
}

#[derive(Serialize)]
struct SweepPoint {
    qber: f64,
    trials: usize,
    successes: usize,
    mismatches: usize,
    mean_key_len: f64,
    /// `leak_EC / (n · h2(q))` over trials that reached verification.
    mean_efficiency: Option<f64>,
    aborts: BTreeMap<String, usize>,
}

pub fn run(cmd: SweepCommandConfig<'_>) {
    let rates = super::parse_rates(cmd.qbers);
    if rates.is_empty() || cmd.trials == 0 {
        eprintln!("Nothing to sweep: need at least one error rate and one trial");
        std::process::exit(1);
    }
    let base = super::load_config(cmd.config_path, cmd.strategy, None);
    let mut rng = match cmd.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    println!(
        "Sweep: {} trials × {} error rates, {} raw bits, {} reconciliation\n",
        cmd.trials,
        rates.len(),
        cmd.bits,
        base.strategy
    );
    println!(
        "  {:>6}  {:>8}  {:>10}  {:>10}  {}",
        "QBER", "success", "mean key", "f_EC", "aborts"
    );
    println!("  {}", "─".repeat(72));

    let mut points = Vec::with_capacity(rates.len());
    for &qber in &rates {
        let mut config = base.clone();
        config.prior_qber = super::prior_for(qber);
        let mut point = SweepPoint {
            qber,
            trials: cmd.trials,
            successes: 0,
            mismatches: 0,
            mean_key_len: 0.0,
            mean_efficiency: None,
            aborts: BTreeMap::new(),
        };
        let mut key_bits = 0usize;
        let mut efficiencies = Vec::new();

        for _ in 0..cmd.trials {
            config.rng_seed = Some(rng.random());
            let auth = BitString::random(cmd.auth_bits, &mut rng);
            let outcome = SimulatedLink::new(&config, &auth).and_then(|mut link| {
                let (alice, bob) = binary_symmetric_pair(cmd.bits, qber, &mut rng);
                link.run(&alice, &bob)
            });
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    eprintln!("Trial at QBER {qber} failed to run: {e}");
                    std::process::exit(1);
                }
            };

            let report = &outcome.bob.report;
            let h = binary_entropy(qber);
            if report.qber.is_some() && h > 0.0 {
                efficiencies.push(report.leakage.reconciliation() as f64 / (cmd.bits as f64 * h));
            }
            match outcome.bob.abort_reason() {
                Some(reason) => *point.aborts.entry(reason.to_string()).or_insert(0) += 1,
                None if outcome.keys_match() => {
                    point.successes += 1;
                    key_bits += report.key_len;
                }
                None => point.mismatches += 1,
            }
        }

        point.mean_key_len = key_bits as f64 / cmd.trials as f64;
        if !efficiencies.is_empty() {
            point.mean_efficiency = Some(efficiencies.iter().sum::<f64>() / efficiencies.len() as f64);
        }
        let aborts = if point.aborts.is_empty() {
            "-".to_string()
        } else {
            point
                .aborts
                .iter()
                .map(|(k, v)| format!("{k}×{v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!(
            "  {:>6.3}  {:>7.0}%  {:>10.1}  {:>10}  {}",
            qber,
            100.0 * point.successes as f64 / cmd.trials as f64,
            point.mean_key_len,
            point
                .mean_efficiency
                .map(|f| format!("{f:.3}"))
                .unwrap_or_else(|| "-".to_string()),
            aborts
        );
        if point.mismatches > 0 {
            eprintln!("  WARNING: {} trial(s) at QBER {qber} ended with differing keys", point.mismatches);
        }
        points.push(point);
    }

    if let Some(path) = cmd.output_path {
        super::write_json(&points, path);
    }
}
