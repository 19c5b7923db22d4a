//! Pretty tracing output. Separate binary from `logging_tests` because the
//! subscriber is process-global.

use stream_processor::config::{LogFormat, LoggingConfig};
use stream_processor::init_tracing;

#[test]
fn test_init_tracing_pretty_format() {
    let config = LoggingConfig {
        level: "info".to_string(),
        format: LogFormat::Pretty,
    };

    assert!(init_tracing(&config).is_ok());
    tracing::info!(component = "pretty_logging_tests", "pretty subscriber installed");
}
