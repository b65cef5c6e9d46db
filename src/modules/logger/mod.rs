use chrono::Local;
use tracing::Level;
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Install a stdout subscriber. Embedding applications that bring their own
/// subscriber should skip this and the crate's spans will flow into theirs.
pub fn initialize_logging(level: Level) {
    let format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(true)
        .with_timer(LocalTimer);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stdout)
        .event_format(format)
        .finish();

    // Keep going if a host application installed a subscriber first.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
