use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug to see every frame)
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .init();

    if let Err(e) = makeblock_bridge::runtime::run().await {
        eprintln!("Bridge error: {}", e);
        std::process::exit(1);
    }
}

/// RUST_LOG when set, info otherwise
fn log_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_is_not_overridden() {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy("debug");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

        let fallback = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy("");
        assert_eq!(fallback.max_level_hint(), Some(LevelFilter::INFO));
    }
}
