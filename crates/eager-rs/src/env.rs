use std::env;
use std::sync::OnceLock;

static EAGER_ASYNC_LEVEL: OnceLock<u8> = OnceLock::new();
static EAGER_BUFFER_LENGTH: OnceLock<usize> = OnceLock::new();
static EAGER_MAX_RECOMPUTE: OnceLock<usize> = OnceLock::new();

fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok()
}

pub(crate) fn default_async_level() -> u8 {
    *EAGER_ASYNC_LEVEL.get_or_init(|| {
        env::var("EAGER_ASYNC_LEVEL")
            .ok()
            .and_then(|v| parse_usize(&v))
            .filter(|level| *level <= 2)
            .map(|level| level as u8)
            .unwrap_or(2)
    })
}

pub(crate) fn default_buffer_length() -> usize {
    *EAGER_BUFFER_LENGTH.get_or_init(|| {
        env::var("EAGER_BUFFER_LENGTH")
            .ok()
            .and_then(|v| parse_usize(&v))
            .unwrap_or(3)
    })
}

pub(crate) fn max_recompute_limit() -> usize {
    *EAGER_MAX_RECOMPUTE.get_or_init(|| {
        env::var("EAGER_MAX_RECOMPUTE")
            .ok()
            .and_then(|v| parse_usize(&v))
            .unwrap_or(1)
    })
}
