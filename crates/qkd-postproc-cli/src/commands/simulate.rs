//! `qkd-postproc simulate`: consecutive sessions over one simulated link.

use qkd_postproc_core::{BitString, SessionReport, SimulatedLink, binary_symmetric_pair};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

pub struct SimulateCommandConfig<'a> {
    pub bits: usize,
    pub qber: f64,
    pub prior_qber: Option<f64>,
    pub sessions: usize,
    pub strategy: Option<&'a str>,
    pub auth_bits: usize,
    pub config_path: Option<&'a str>,
    pub seed: Option<u64>,
    pub output_path: Option<&'a str>,
}

#[derive(Serialize)]
struct SessionRecord {
    session: usize,
    channel_qber: f64,
    actual_errors: usize,
    keys_match: bool,
    alice: SessionReport,
    bob: SessionReport,
}

pub fn run(cmd: SimulateCommandConfig<'_>) {
    if !(0.0..=0.5).contains(&cmd.qber) {
        eprintln!("Invalid --qber {} (expected a number in [0, 0.5])", cmd.qber);
        std::process::exit(1);
    }
    let mut config = super::load_config(
        cmd.config_path,
        cmd.strategy,
        Some(cmd.prior_qber.unwrap_or_else(|| super::prior_for(cmd.qber))),
    );
    if let Some(seed) = cmd.seed {
        config.rng_seed = Some(seed);
    }
    let mut rng = match cmd.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let initial_auth = BitString::random(cmd.auth_bits, &mut rng);
    let mut link = match SimulatedLink::new(&config, &initial_auth) {
        Ok(link) => link,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!(
        "Simulating {} session(s): {} raw bits, channel QBER {:.3}, {} reconciliation, {} auth bits\n",
        cmd.sessions, cmd.bits, cmd.qber, config.strategy, cmd.auth_bits
    );
    println!(
        "  {:>3}  {:<22} {:>6} {:>8} {:>9} {:>17} {:>8} {:>8} {:>10}",
        "#", "outcome", "passes", "errors", "leak_EC", "QBER + ν", "ℓ_sec", "key", "auth left"
    );
    println!("  {}", "─".repeat(104));

    let mut records = Vec::with_capacity(cmd.sessions);
    let mut delivered = 0usize;
    for session in 1..=cmd.sessions {
        let (alice, bob) = binary_symmetric_pair(cmd.bits, cmd.qber, &mut rng);
        let actual_errors = alice.hamming_distance(&bob);
        let outcome = match link.run(&alice, &bob) {
            Ok(outcome) => outcome,
            Err(e) => {
                eprintln!("Session {session} failed to run: {e}");
                std::process::exit(1);
            }
        };

        let keys_match = outcome.keys_match();
        let report = &outcome.bob.report;
        let status = match (outcome.bob.abort_reason(), keys_match) {
            (Some(reason), _) => format!("aborted: {reason}"),
            (None, true) => "key".to_string(),
            (None, false) => "KEY MISMATCH".to_string(),
        };
        let qber = report
            .qber
            .map(|q| format!("{:.4} + {:.4}", q.estimate, q.margin))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>3}  {:<22} {:>6} {:>8} {:>9} {:>17} {:>8} {:>8} {:>10}",
            session,
            status,
            report.passes,
            report.corrections,
            report.leakage.reconciliation(),
            qber,
            report.secret_len,
            report.key_len,
            report.auth_bits_available
        );
        if keys_match {
            delivered += report.key_len;
        }

        records.push(SessionRecord {
            session,
            channel_qber: cmd.qber,
            actual_errors,
            keys_match,
            alice: outcome.alice.report,
            bob: outcome.bob.report,
        });

        if link.alice_auth().available() < qkd_postproc_core::MATRIX_SEED_BITS + config.auth.tag_bits {
            println!("\n  Auth buffer exhausted after session {session}.");
            break;
        }
    }

    println!(
        "\n  {} secret bits delivered from {} raw bits ({:.1}%)",
        delivered,
        records.len() * cmd.bits,
        100.0 * delivered as f64 / (records.len() * cmd.bits).max(1) as f64
    );

    if let Some(path) = cmd.output_path {
        super::write_json(&records, path);
    }
}
