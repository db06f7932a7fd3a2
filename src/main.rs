use mailsift::accounts::{AccountRegistry, SnapshotConnector};
use mailsift::batch::apply_filters;
use mailsift::config::Config;
use mailsift::log::{self, LogOptions};
use mailsift::rules;
use std::path::{Path, PathBuf};

const EXIT_STARTUP: i32 = 1;
const EXIT_FILTER_FAILED: i32 = 2;

fn default_config_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("mailsift").join("config.toml")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("mailsift")
            .join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<PathBuf> {
    let prefix = format!("{}=", flag);
    args.iter()
        .find(|a| a.starts_with(&prefix))
        .map(|a| PathBuf::from(&a[prefix.len()..]))
}

fn filters_path(args: &[String], config: &Config, config_path: &Path) -> PathBuf {
    flag_value(args, "--filters")
        .or_else(|| config.run.filters_file.clone())
        .unwrap_or_else(|| {
            config_path
                .parent()
                .map(|p| p.join("filters.toml"))
                .unwrap_or_else(|| PathBuf::from("filters.toml"))
        })
}

fn load_filters_or_exit(path: &Path) -> Vec<rules::CompiledFilter> {
    if !path.exists() {
        eprintln!("No filter file found at {}", path.display());
        std::process::exit(EXIT_STARTUP);
    }
    match rules::load_filters(path) {
        Ok(filters) => filters,
        Err(e) => {
            eprintln!("Failed to load filters from {}: {}", path.display(), e);
            std::process::exit(EXIT_STARTUP);
        }
    }
}

fn print_filters(path: &Path) {
    let compiled = load_filters_or_exit(path);
    println!("Filter file: {}", path.display());
    println!("Filters loaded: {}", compiled.len());
    println!();
    print!("{}", rules::format_filters_for_display(&compiled));
}

fn print_help_config() {
    let config_path = default_config_path();
    println!("Default config file: {}", config_path.display());
    println!();
    println!("Available options:");
    println!();
    println!("[run]");
    println!(
        "  dry_run = false              # Report matches without changing anything (default: false)"
    );
    println!("  page_size = 500              # Messages per listing page (default: 500)");
    println!(
        "  filters_file = \"filters.toml\" # Filter file (default: filters.toml next to the config)"
    );
    println!();
    println!("[log]");
    println!(
        "  level = \"info\"               # trace, debug, info, warn, error, off (default: info)"
    );
    println!("  stderr = true                # Log to stderr (default: true)");
    println!(
        "  file = \"mailsift.log\"        # Log file; \"\" disables it (default: {})",
        log::default_log_path().display()
    );
    println!();
    println!("[account.NAME]                   # At least one account required");
    println!("  kind = \"snapshot\"            # Mailbox backend (default: \"snapshot\")");
    println!(
        "  path = \"personal.json\"       # Snapshot file, relative to the config (required)"
    );
    println!("  address = \"me@example.com\"   # Your address (optional)");
    println!("  writable = true              # Write changes back on exit (default: true)");
    println!();
    println!("Set {} to override the log level with tracing directives.", log::LOG_ENV);
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage: mailsift [OPTIONS]");
        eprintln!();
        eprintln!("Options:");
        eprintln!("  --config=PATH    Use config file at PATH instead of default");
        eprintln!("  --filters=PATH   Use filter file at PATH instead of default");
        eprintln!("  --dry-run        Report what would change without changing it");
        eprintln!("  --print-filters  Parse and print the filter file");
        eprintln!("  --clear-log      Truncate the log file at startup");
        eprintln!("  --help-config    Print default config path and all options");
        eprintln!("  --help           Show this help");
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--help-config") {
        print_help_config();
        std::process::exit(0);
    }

    if let Some(unknown) = args.iter().find(|a| {
        !matches!(
            a.as_str(),
            "--dry-run" | "--print-filters" | "--clear-log"
        ) && !a.starts_with("--config=")
            && !a.starts_with("--filters=")
    }) {
        eprintln!("Unknown option '{}'. See --help.", unknown);
        std::process::exit(EXIT_STARTUP);
    }

    let config_path = flag_value(&args, "--config").unwrap_or_else(default_config_path);
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config from {}: {}", config_path.display(), e);
            eprintln!("Create a config file with:");
            eprintln!();
            eprintln!("  [account.personal]");
            eprintln!("  path = \"personal.json\"");
            std::process::exit(EXIT_STARTUP);
        }
    };
    let filters_file = filters_path(&args, &config, &config_path);

    if args.iter().any(|a| a == "--print-filters") {
        print_filters(&filters_file);
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--clear-log") {
        if let Some(path) = &config.log.file {
            if let Err(e) = log::clear(path) {
                eprintln!("{}", e);
                std::process::exit(EXIT_STARTUP);
            }
        }
    }

    let log_options = LogOptions {
        level: config.log.level.clone(),
        stderr: config.log.stderr,
        file: config.log.file.clone(),
    };
    if let Err(e) = log::init(&log_options) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(EXIT_STARTUP);
    }

    let compiled = load_filters_or_exit(&filters_file);
    let dry_run = config.run.dry_run || args.iter().any(|a| a == "--dry-run");

    let registry = match AccountRegistry::open(&config.accounts, &SnapshotConnector) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(EXIT_STARTUP);
        }
    };

    let run = match rules::bind_filters(&compiled, &registry, config.run.page_size) {
        Ok(filters) => Ok(apply_filters(&filters, dry_run)),
        Err(e) => Err(e),
    };

    let close_failures = registry.close_all();
    for (account, e) in &close_failures {
        eprintln!("Warning: failed to close account '{}': {}", account, e);
    }

    match run {
        Ok(report) => {
            print!("{}", report);
            if report.has_failures() || !close_failures.is_empty() {
                std::process::exit(EXIT_FILTER_FAILED);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(EXIT_STARTUP);
        }
    }
}
