use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use time::OffsetDateTime;

use crate::clock::Clock;

static ENV_VAR_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
static TEST_PATH_COUNTER: AtomicU64 = AtomicU64::new(0);

struct EnvVarRestore {
    key: String,
    original: Option<OsString>,
}

impl EnvVarRestore {
    fn new(key: &str, value: Option<&str>) -> Self {
        let original = std::env::var_os(key);
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }

        Self {
            key: key.to_owned(),
            original,
        }
    }
}

impl Drop for EnvVarRestore {
    fn drop(&mut self) {
        match self.original.take() {
            Some(original) => std::env::set_var(&self.key, original),
            None => std::env::remove_var(&self.key),
        }
    }
}

fn env_var_guard() -> MutexGuard<'static, ()> {
    let lock = ENV_VAR_LOCK.get_or_init(|| Mutex::new(()));
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs `run` with one env var overridden (or removed), restoring the
/// previous value afterwards. Serialized across threads so env-dependent
/// config tests do not interfere.
pub fn with_env_var<R>(key: &str, value: Option<&str>, run: impl FnOnce() -> R) -> R {
    with_env_vars(&[(key, value)], run)
}

pub fn with_env_vars<R>(vars: &[(&str, Option<&str>)], run: impl FnOnce() -> R) -> R {
    let _guard = env_var_guard();
    let _restores: Vec<_> = vars
        .iter()
        .map(|(key, value)| EnvVarRestore::new(key, *value))
        .collect();
    run()
}

pub fn unique_test_db_path(tag: &str) -> PathBuf {
    let safe_tag: String = tag
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect();
    let counter = TEST_PATH_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "curbsync-test-{}-{}-{}.db",
        safe_tag,
        std::process::id(),
        counter
    ))
}

/// Deterministic clock for time-dependent tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn at_unix(seconds: i64) -> Self {
        Self::new(OffsetDateTime::from_unix_timestamp(seconds).expect("valid unix timestamp"))
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().expect("manual clock lock poisoned") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock lock poisoned");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("manual clock lock poisoned")
    }
}
