mod mock;
pub use mock::*;

pub fn setup_tracing(directive: &str) {
    let _ = tracing_subscriber::fmt::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(directive).unwrap())
        .try_init();
}
