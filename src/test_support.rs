//! Helpers shared by unit tests that touch process-wide state.

use std::env;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_mutex() -> &'static Mutex<()> {
    ENV_LOCK.get_or_init(|| Mutex::new(()))
}

/// One lock for every test that reads or writes `FLOWOUT_*` variables.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    env_mutex().lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `f` with `vars` set (`None` removes), then restore the previous values.
pub(crate) fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
    let _guard = env_lock();
    let previous: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(key, _)| ((*key).to_string(), env::var(key).ok()))
        .collect();

    for (key, value) in vars {
        match value {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    let output = f();

    for (key, value) in previous {
        match value {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    output
}

mod tests {
    use super::*;

    const SCRATCH: &str = "FLOWOUT_TEST_SUPPORT_SCRATCH";

    #[test]
    fn lock_is_held_while_the_closure_runs() {
        let held = with_env_vars(&[], || env_mutex().try_lock().is_err());
        assert!(held);
    }

    #[test]
    fn previous_values_are_restored() {
        let inside = with_env_vars(&[(SCRATCH, Some("outer"))], || env::var(SCRATCH).ok());
        assert_eq!(inside.as_deref(), Some("outer"));

        let _guard = env_lock();
        assert!(env::var(SCRATCH).is_err());
    }
}
