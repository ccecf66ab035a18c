use rand::rngs::StdRng;
use rngaudit_core::{GeneratorSource, SessionController, ValidationConfig};

use super::EXIT_CONFIG_ERROR;

/// Validate a seeded `StdRng` stream. A healthy install reports COMPLIANT for
/// nearly every seed.
pub fn run(battery: &str, seed: u64, workers: Option<usize>) -> i32 {
    let config = ValidationConfig {
        worker_count: workers,
        ..Default::default()
    };
    let controller = match SessionController::new(Default::default(), config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };

    println!("🔬 Self-test: {battery} over StdRng (seed {seed})");
    let mut source = GeneratorSource::<StdRng>::seeded(format!("stdrng-seed-{seed}"), seed);
    match controller.run(&mut source, battery) {
        Ok(session) => {
            super::print_session(&session);
            super::verdict_exit_code(session.verdict())
        }
        Err(e) => {
            eprintln!("Error: {e}");
            EXIT_CONFIG_ERROR
        }
    }
}
