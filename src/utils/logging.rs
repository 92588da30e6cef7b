use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber for the broker and client.
///
/// `RUST_LOG` wins when it is set; otherwise `default_level` is applied to the
/// crate's own targets. Safe to call more than once.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tcp_broadcast={}", level_name(default_level))));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn level_name(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::level_name;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(level_name("WARNING"), "warn");
        assert_eq!(level_name("verbose"), "info");
    }
}
