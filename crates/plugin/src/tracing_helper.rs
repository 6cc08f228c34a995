use std::panic;
use std::path::Path;

use tracing::error;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};
use windows::Win32::System::Console::AllocConsole;

const CRATES: [&str; 3] = ["modhost", "modhost_core", "modhost_engine"];

fn make_filter(debug: bool) -> EnvFilter {
    let level = if debug || cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };
    let directives: Vec<String> = CRATES
        .iter()
        .map(|name| format!("{}={}", name, level))
        .collect();
    EnvFilter::new(directives.join(","))
}

/// Install the global subscriber
///
/// Logs go to `<dir>/<file_name>`. With `console` a console window is
/// attached to the host and receives the same output.
pub fn init_tracing(dir: &Path, file_name: &str, debug: bool, console: bool) {
    let default_layer = || {
        const WITH_FILE_PATH: bool = cfg!(debug_assertions);
        tracing_subscriber::fmt::layer()
            .compact()
            .with_file(WITH_FILE_PATH)
            .with_line_number(WITH_FILE_PATH)
            .with_target(!WITH_FILE_PATH)
            .with_thread_ids(true)
    };

    let file_writer = std::fs::create_dir_all(dir)
        .ok()
        .and_then(|()| {
            RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(file_name)
                .build(dir)
                .ok()
        });
    let file_layer = file_writer.map(|writer| {
        default_layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(make_filter(debug))
    });

    let console_layer = (console && unsafe { AllocConsole() }.is_ok()).then(|| {
        default_layer()
            .with_writer(std::io::stdout)
            .with_filter(make_filter(debug))
    });

    let subscriber = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return;
    }

    panic::set_hook(Box::new(|panic| error!("{}", panic)));
}
