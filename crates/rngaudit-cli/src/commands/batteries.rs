use rngaudit_core::{BatteryDefinition, DependencyMode};

use super::EXIT_CONFIG_ERROR;

fn describe(battery: &BatteryDefinition) -> String {
    let mode = match battery.dependency_mode {
        DependencyMode::Blocking => "blocking",
        DependencyMode::Advisory => "advisory",
    };
    let mut out = format!(
        "{}\n  {}\n  {} x {} bits, α = {}, dependencies {mode}\n",
        battery.name,
        battery.description,
        battery.sequences,
        battery.bits_per_sequence,
        battery.significance_level
    );
    for entry in &battery.entries {
        let mut line = format!("    {:<28} {}", entry.label, entry.test);
        let params: Vec<String> = entry
            .params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        if !params.is_empty() {
            line.push_str(&format!(" [{}]", params.join(", ")));
        }
        if !entry.depends_on.is_empty() {
            line.push_str(&format!(" after {}", entry.depends_on.join(", ")));
        }
        if !entry.core {
            line.push_str(" (not core)");
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

pub fn run(battery_file: Option<&str>, json: bool) -> i32 {
    let (registry, _) = match super::build_registry(battery_file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error loading battery: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };

    if json {
        let batteries: Vec<&BatteryDefinition> = registry.batteries().collect();
        match serde_json::to_string_pretty(&batteries) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Error: {e}");
                return EXIT_CONFIG_ERROR;
            }
        }
        return 0;
    }

    for battery in registry.batteries() {
        println!("{}", describe(battery));
    }
    let tests: Vec<&str> = registry.tests().map(|t| t.id()).collect();
    println!("Available tests ({}): {}", tests.len(), tests.join(", "));
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rngaudit_core::{BatteryRegistry, NIST_SP800_22_BASIC};

    #[test]
    fn test_describe_basic_battery() {
        let registry = BatteryRegistry::standard();
        let battery = registry.resolve(NIST_SP800_22_BASIC).unwrap();
        let text = describe(&battery);
        assert!(text.starts_with(NIST_SP800_22_BASIC));
        assert!(text.contains("dependencies blocking"));
        assert!(text.contains("after monobit"));
        assert!(text.contains("block_frequency"));
    }
}
