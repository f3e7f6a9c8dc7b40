//! Startup banner

use super::config::AppConfig;
use super::constants::APP_NAME;

/// Whether `host` binds every interface
fn is_all_interfaces(host: &str) -> bool {
    host == "0.0.0.0" || host == "::" || host == "[::]"
}

/// Print the startup banner with the query URL and pipeline locations
pub fn print_banner(config: &AppConfig, object_target: &str, data_dir: &str) {
    let display_host = if is_all_interfaces(&config.server.host) {
        "localhost"
    } else {
        &config.server.host
    };

    // Label width: "Object store:" plus padding
    const W: usize = 14;

    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m \x1b[36mhttp://{}:{}/api/v1/rollups\x1b[0m",
        "Rollups:", display_host, config.server.port
    );
    println!(
        "  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {} \x1b[90m(active: {})\x1b[0m",
        "Buffer:",
        config.buffer.dir.display(),
        config.buffer.active_file
    );
    println!(
        "  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
        "Object store:", object_target
    );
    println!("  \x1b[90m➜  {:<W$} {}\x1b[0m", "Data:", data_dir);
    println!();
}
