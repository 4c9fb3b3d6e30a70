use std::io::Write;

/// Install the default logger: `RUST_LOG`-controlled, info by default,
/// compact single-line records. Embedding services call this once at
/// startup; repeated calls are ignored so tests can call it freely.
pub fn init() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "{} [{:<5}] [{}] - {}",
            chrono::Utc::now().format("%H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        )
    })
    .try_init();
}
