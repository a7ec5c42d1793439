//
// logging.rs
// Dicom-Volume-Tools-rs
//
// Installs the global tracing subscriber according to the number of `-v` flags.
//
// Thales Matheus Mendonça Santos - November 2025

use tracing::Level;

/// Map the repeat count of `-v` to a maximum log level.
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install a fmt subscriber writing to stderr. Calling it twice keeps the first subscriber.
pub fn init(verbosity: u8) {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level_for(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Could not set up global logging subscriber: {e}");
    }
}
