//! Panic handler that releases the instance lock.
//!
//! A panicking tracker would otherwise leave its lock file behind with a pid
//! that may be reused later. The hook writes a short report to stderr,
//! removes the registered lock file if it still records this process, and
//! then chains to the previous hook.
//!
//! Panic hooks must be `'static`, so the lock path lives in a global registry.
//! The pending batch is in memory only and is lost on panic.

use std::io::Write;
use std::panic::{self, PanicHookInfo};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::instance;

/// Lock file to clean up on panic.
static LOCK_REGISTRY: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

static HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the panic hook. Later calls are ignored.
pub fn init() {
    let _ = LOCK_REGISTRY.get_or_init(|| Mutex::new(None));

    HOOK_INSTALLED.get_or_init(|| {
        let original_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            handle_panic(info);
            original_hook(info);
        }));
    });
}

/// Register the lock file held by this process.
pub fn register_lock_file(path: &Path) {
    let registry = LOCK_REGISTRY.get_or_init(|| Mutex::new(None));
    if let Ok(mut guard) = registry.lock() {
        *guard = Some(path.to_path_buf());
    }
}

/// Forget the lock file after a normal release.
pub fn unregister_lock_file() {
    if let Some(registry) = LOCK_REGISTRY.get() {
        if let Ok(mut guard) = registry.lock() {
            *guard = None;
        }
    }
}

fn registered_lock_file() -> Option<PathBuf> {
    LOCK_REGISTRY
        .get()
        .and_then(|registry| registry.lock().ok())
        .and_then(|guard| guard.clone())
}

fn handle_panic(info: &PanicHookInfo<'_>) {
    // Logging may be broken at this point, write to stderr directly.
    let mut stderr = std::io::stderr().lock();

    let _ = writeln!(stderr);
    let _ = writeln!(stderr, "━━━ locotrack panic ━━━");
    if let Some(location) = info.location() {
        let _ = writeln!(
            stderr,
            "Location: {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        );
    }
    if let Some(message) = info.payload().downcast_ref::<&str>() {
        let _ = writeln!(stderr, "Message: {}", message);
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        let _ = writeln!(stderr, "Message: {}", message);
    }

    match registered_lock_file() {
        Some(path) => {
            if instance::remove_if_owned(&path) {
                let _ = writeln!(stderr, "Lock file {} removed.", path.display());
            } else {
                let _ = writeln!(stderr, "Lock file {} left in place.", path.display());
            }
        }
        None => {
            let _ = writeln!(stderr, "No lock file registered.");
        }
    }
    let _ = writeln!(stderr, "Unsent samples in memory are lost.");
    let _ = writeln!(stderr);

    let _ = stderr.flush();
}
