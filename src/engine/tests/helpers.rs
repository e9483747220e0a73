#![cfg(test)]

use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::options::Options;

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::DEBUG)
        .try_init();
}

/// Options for a fresh test database.
pub fn test_options() -> Options {
    let mut options = Options::default();
    options.create_if_missing = true;
    options
}

/// Options with a tiny write buffer to force memtable switches.
pub fn small_buffer_options() -> Options {
    let mut options = test_options();
    options.cf_options.write_buffer_size = 1024;
    options.cf_options.max_write_buffer_number = 4;
    options
}
