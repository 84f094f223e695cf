// Logging tracing : console en développement, JSON sinon

use tracing_subscriber::EnvFilter;

pub fn is_development(environment: &str) -> bool {
    environment.eq_ignore_ascii_case("development")
}

/// `--debug` forces the debug level, otherwise `RUST_LOG` or `info`.
/// Development gets readable console output, everything else JSON lines.
pub fn init(debug: bool, environment: &str) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if is_development(environment) {
        builder.compact().init();
    } else {
        builder.json().init();
    }
}
