fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "quorum_lock=warn",
        1 => "quorum_lock=info",
        2 => "quorum_lock=debug",
        _ => "quorum_lock=trace",
    }
}

/// Initialize the logger with the specified verbosity level
///
/// # Arguments
/// * `verbose` - Verbosity level (0=warn, 1=info, 2=debug, 3+=trace)
pub fn setup_logger(verbose: u8) {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter(verbose)),
    )
    .format_timestamp(None)
    .format_module_path(false)
    .format_target(false)
    .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_filter() {
        assert_eq!(default_filter(0), "quorum_lock=warn");
        assert_eq!(default_filter(2), "quorum_lock=debug");
        assert_eq!(default_filter(9), "quorum_lock=trace");
    }
}
