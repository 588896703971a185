//! Integration testing module
//!
//! End-to-end tests for the sample pipeline:
//! - Lossless write/read round trips through real containers
//! - Lossy round trips when the codecs are available
//! - Interleaved multi-stream containers read out of order
//! - Subtitle cue extraction
//! - Comparison against the `ffmpeg` command line tool


use std::sync::Once;

static LOGGING: Once = Once::new();

/// Route `tracing` output to the test harness, honouring `RUST_LOG`
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "sampleflow=debug".into()),
            )
            .with_test_writer()
            .try_init();
        crate::ffmpeg_utils::init().expect("FFmpeg failed to initialize");
        crate::ffmpeg_utils::install_log_filter();
    });
}
