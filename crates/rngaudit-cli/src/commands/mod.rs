pub mod batteries;
pub mod entropy;
pub mod selftest;
pub mod server;
pub mod validate;

use rngaudit_core::{
    BatteryRegistry, BitSource, FileSource, StreamSource, TestOutcome, ValidationConfig,
    ValidationError, ValidationSession, Verdict,
};

pub const EXIT_COMPLIANT: i32 = 0;
pub const EXIT_NON_COMPLIANT: i32 = 1;
pub const EXIT_INCONCLUSIVE: i32 = 2;
pub const EXIT_CONFIG_ERROR: i32 = 3;

pub fn verdict_exit_code(verdict: Verdict) -> i32 {
    match verdict {
        Verdict::Compliant => EXIT_COMPLIANT,
        Verdict::NonCompliant => EXIT_NON_COMPLIANT,
        Verdict::Inconclusive => EXIT_INCONCLUSIVE,
    }
}

/// Open `input` as a bit source: a file path, or "-" for stdin.
pub fn open_source(
    input: &str,
    max_bits: Option<usize>,
) -> Result<Box<dyn BitSource>, ValidationError> {
    if input == "-" {
        return Ok(Box::new(StreamSource::new("stdin", std::io::stdin())));
    }
    let source = FileSource::open(input)?;
    Ok(match max_bits {
        Some(limit) => Box::new(source.with_limit(limit)),
        None => Box::new(source),
    })
}

pub fn load_config(path: Option<&str>) -> Result<ValidationConfig, ValidationError> {
    match path {
        Some(p) => ValidationConfig::from_file(p),
        None => Ok(ValidationConfig::default()),
    }
}

/// Standard registry, plus the battery in `battery_file` when given.
/// Returns the loaded battery's name alongside.
pub fn build_registry(
    battery_file: Option<&str>,
) -> Result<(BatteryRegistry, Option<String>), ValidationError> {
    let mut registry = BatteryRegistry::standard();
    let loaded = match battery_file {
        Some(path) => Some(registry.load_file(path)?),
        None => None,
    };
    Ok((registry, loaded))
}

fn format_p(outcome: &TestOutcome) -> String {
    match outcome.min_p() {
        Some(p) if p < 1e-4 => format!("{p:.2e}"),
        Some(p) => format!("{p:.6}"),
        None => "—".to_string(),
    }
}

/// Per-test table, rationale and verdict line.
pub fn print_session(session: &ValidationSession) {
    println!(
        "\n{} over {} ({} bits, α = {})",
        session.battery_name(),
        session.source_id(),
        session.sample_bits(),
        session.significance_level()
    );
    println!("{}", "=".repeat(72));
    println!(
        "  {:<28} {:>4} {:>12} {:>8} {:>10}",
        "Test", "Seq", "min p", "Status", "Time (ms)"
    );
    println!("  {}", "-".repeat(68));
    for outcome in session.outcomes() {
        println!(
            "  {:<28} {:>4} {:>12} {:>8} {:>10.1}",
            outcome.entry,
            outcome.sequence,
            format_p(outcome),
            outcome.status.to_string(),
            outcome.duration_ms
        );
        if !outcome.message.is_empty() && !outcome.status.is_usable() {
            println!("      {}", outcome.message);
        }
    }

    if !session.second_order().is_empty() {
        println!("\n  Second-order uniformity:");
        for check in session.second_order() {
            let mark = if check.passed { "✓" } else { "✗" };
            println!(
                "    {mark} {:<26} p = {:.6} (threshold {})",
                check.entry, check.uniformity.p_value, check.threshold
            );
        }
    }

    if let Some(entropy) = session.entropy_report() {
        match (entropy.selected, entropy.min_entropy_per_bit) {
            (Some(estimator), Some(h)) => {
                println!("\n  Min-entropy: {h:.4} bits/bit ({estimator:?})");
            }
            _ => println!("\n  Min-entropy: no estimator applicable"),
        }
    }

    println!();
    for line in session.rationale() {
        println!("  {line}");
    }
    println!("{}", "=".repeat(72));
    println!("  Verdict: {}", session.verdict());
}
