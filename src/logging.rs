// Logger setup for the binaries. `RUST_LOG` overrides the default level.

use env_logger::Env;

pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
