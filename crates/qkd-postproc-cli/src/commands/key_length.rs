//! `qkd-postproc key-length`: the secret-length bound, term by term.

use qkd_postproc_core::KeyLengthBreakdown;

pub fn run(verified_len: usize, qber: f64, margin: f64, leak_ec: u64, leak_ver: u64, epsilon: f64) {
    if !(epsilon > 0.0 && epsilon < 1.0) {
        eprintln!("Invalid --epsilon {epsilon} (expected a number in (0, 1))");
        std::process::exit(1);
    }
    if !(0.0..=1.0).contains(&qber) || margin < 0.0 {
        eprintln!("Invalid --qber {qber} / --margin {margin}");
        std::process::exit(1);
    }

    let b = KeyLengthBreakdown::compute(verified_len, qber + margin, leak_ec, leak_ver, epsilon);
    println!("  ℓ_ver                    {:>14}", b.verified_len);
    println!("  q + ν                    {:>14.6}", b.qber_bound);
    println!("  ℓ_ver · (1 - h2(q + ν))  {:>14.1}", b.entropy_bits);
    println!("  - leak_EC                {:>14}", b.leak_ec);
    println!("  - leak_ver               {:>14}", b.leak_ver);
    println!("  - 2·log2(1/ε_pa)         {:>14.1}", b.pa_penalty);
    println!("  {}", "─".repeat(40));
    println!("  bound                    {:>14.1}", b.raw);
    if b.secret_len == 0 {
        println!("  ℓ_sec                    {:>14}  (security abort)", 0);
    } else {
        println!("  ℓ_sec                    {:>14}", b.secret_len);
    }
}
