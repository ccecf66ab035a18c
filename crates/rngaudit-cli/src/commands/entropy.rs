use rngaudit_core::{EntropyReport, SessionController, ValidationConfig};

use super::EXIT_CONFIG_ERROR;

fn print_report(report: &EntropyReport) {
    println!("Entropy over {} bits:\n", report.sample_bits);
    println!("  {:<20} {:>12}", "Estimator", "H (bits/bit)");
    println!("  {}", "-".repeat(34));
    for estimate in &report.estimates {
        let mark = if report.selected == Some(estimate.estimator) {
            " ←"
        } else {
            ""
        };
        println!(
            "  {:<20} {:>12.6}{mark}",
            format!("{:?}", estimate.estimator),
            estimate.entropy_per_bit
        );
    }
    for omitted in &report.omitted {
        println!("  {:<20} {:>12}  {}", format!("{:?}", omitted.estimator), "—", omitted.reason);
    }
    match report.min_entropy_per_bit {
        Some(h) => println!("\n  Min-entropy: {h:.6} bits/bit"),
        None => println!("\n  Min-entropy: sample too short for every estimator"),
    }
    println!("\nThe minimum across estimators is the conservative bound.");
}

pub fn run(input: &str, max_bits: Option<usize>, markov_order: usize, output: Option<&str>) -> i32 {
    let config = ValidationConfig {
        markov_order,
        ..Default::default()
    };
    let controller = match SessionController::new(Default::default(), config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    let mut source = match super::open_source(input, max_bits) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Cannot open {input}: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    let report = match controller.estimate_entropy(source.as_mut(), max_bits) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };

    print_report(&report);

    if let Some(path) = output {
        let written = serde_json::to_string_pretty(&report)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("Failed to write report to {path}: {e}");
            return EXIT_CONFIG_ERROR;
        }
        println!("\n📄 Report saved to: {path}");
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_entropy_writes_report() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 1_000]).unwrap();
        tmp.flush().unwrap();
        let out = tempfile::NamedTempFile::new().unwrap();
        let code = run(
            tmp.path().to_str().unwrap(),
            None,
            1,
            out.path().to_str(),
        );
        assert_eq!(code, 0);
        let json = std::fs::read_to_string(out.path()).unwrap();
        let report: EntropyReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report.sample_bits, 8_000);
        assert!(report.min_entropy_per_bit.unwrap() < 0.01);
    }

    #[test]
    fn test_bad_markov_order() {
        assert_eq!(run("-", Some(1_000), 0, None), EXIT_CONFIG_ERROR);
    }
}
