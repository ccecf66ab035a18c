use super::EXIT_CONFIG_ERROR;

pub fn run(host: &str, port: u16, config_path: Option<&str>, battery_file: Option<&str>) -> i32 {
    let config = match super::load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    let (registry, _) = match super::build_registry(battery_file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error loading battery: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };

    let base = format!("http://{host}:{port}");
    let names: Vec<String> = registry.batteries().map(|b| b.name.clone()).collect();

    println!("🔬 rngaudit server v{}", rngaudit_core::VERSION);
    println!("   {base}");
    println!("   {} batteries: {}", names.len(), names.join(", "));
    println!();
    println!("   Endpoints:");
    println!("     GET  /                   API index (try: curl {base})");
    println!("     GET  /health             Health check");
    println!("     GET  /api/v1/batteries   Registered batteries");
    println!("     POST /api/v1/validate    Validate the raw request body");
    println!();
    println!("   Query params for /api/v1/validate:");
    println!("     battery=<name>        Battery (default: {})", rngaudit_core::NIST_SP800_22_BASIC);
    println!("     significance=α        Significance level in (0, 1)");
    println!("     sequences=N           Sequences for second-order analysis");
    println!("     timeout_sec=S         Execution timeout");
    println!();
    println!("   Example:");
    println!("     curl --data-binary @sample.bin {base}/api/v1/validate");
    println!();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    match rt.block_on(rngaudit_server::run_server(registry, config, host, port)) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Server error: {e}");
            EXIT_CONFIG_ERROR
        }
    }
}
