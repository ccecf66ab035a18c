use rngaudit_core::{CancellationToken, SessionController, ValidationConfig};

use super::EXIT_CONFIG_ERROR;

pub struct ValidateCommandConfig<'a> {
    pub input: &'a str,
    pub battery: Option<&'a str>,
    pub significance: Option<f64>,
    pub sequences: Option<usize>,
    pub workers: Option<usize>,
    pub timeout_sec: Option<f64>,
    pub tolerance: Option<usize>,
    pub config_path: Option<&'a str>,
    pub battery_file: Option<&'a str>,
    pub max_bits: Option<usize>,
    pub output_path: Option<&'a str>,
}

/// Flags take precedence over the config file.
fn apply_flags(mut config: ValidationConfig, cmd: &ValidateCommandConfig<'_>) -> ValidationConfig {
    if cmd.significance.is_some() {
        config.significance_level = cmd.significance;
    }
    if cmd.sequences.is_some() {
        config.sequences_for_second_order = cmd.sequences;
    }
    if cmd.workers.is_some() {
        config.worker_count = cmd.workers;
    }
    if cmd.timeout_sec.is_some() {
        config.timeout_secs = cmd.timeout_sec;
    }
    if let Some(tolerance) = cmd.tolerance {
        config.error_tolerance = tolerance;
    }
    config
}

pub fn run(cmd: ValidateCommandConfig<'_>) -> i32 {
    let config = match super::load_config(cmd.config_path) {
        Ok(c) => apply_flags(c, &cmd),
        Err(e) => {
            eprintln!("Error loading config: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    let (registry, loaded) = match super::build_registry(cmd.battery_file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error loading battery: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    let battery = cmd
        .battery
        .map(str::to_string)
        .or(loaded)
        .unwrap_or_else(|| rngaudit_core::NIST_SP800_22_BASIC.to_string());

    let controller = match SessionController::new(registry, config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    let mut source = match super::open_source(cmd.input, cmd.max_bits) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Cannot open {}: {e}", cmd.input);
            return EXIT_CONFIG_ERROR;
        }
    };

    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        handler_token.cancel();
    }) {
        log::warn!("Ctrl+C handler not installed: {e}");
    }

    let session = match controller.run_with_token(source.as_mut(), &battery, &token) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };

    super::print_session(&session);

    if let Some(path) = cmd.output_path {
        let written = session
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
        match written {
            Ok(()) => println!("\n📄 Session saved to: {path}"),
            Err(e) => {
                eprintln!("Failed to write session to {path}: {e}");
                return EXIT_CONFIG_ERROR;
            }
        }
    }

    super::verdict_exit_code(session.verdict())
}
