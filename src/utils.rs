use std::fmt::Display;
use std::sync::LazyLock;
use std::time::Duration;

use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

static RUN_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
});

static REQUEST_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
});

/// Style of the bar tracking the whole run.
pub(crate) fn run_style() -> ProgressStyle {
    RUN_STYLE.clone()
}

/// Style of the spinner shown while a single request runs.
pub(crate) fn request_style() -> ProgressStyle {
    REQUEST_STYLE.clone()
}

pub(crate) fn as_overhead(duration: Duration) -> impl Display {
    ANSI_BLUE.apply_to(format!("(+{}ms)", duration.as_millis()))
}

/// Installs a global `tracing` subscriber which prints log lines and renders
/// a progress bar for every running request.
///
/// The filter is read from `RUST_LOG` and defaults to `info`. Calling this
/// more than once is harmless; only the first call installs anything.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    static INIT: std::sync::Once = std::sync::Once::new();

    INIT.call_once(|| {
        let indicatif = IndicatifLayer::new();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
            .with(indicatif)
            .try_init();
    });
}

/// Without the `logging` feature the embedder installs its own subscriber.
#[cfg(not(feature = "logging"))]
pub fn init_logging() {}
