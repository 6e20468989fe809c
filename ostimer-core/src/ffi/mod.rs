//! FFI (Foreign Function Interface) for ostimer
//!
//! A C-compatible API over [`Timer`] so the primitive can be driven from any
//! language with C bindings.
//!
//! ## Thread Safety
//!
//! An `OsTimer` handle must be driven by one thread at a time. The callback
//! runs on a backend thread, never on the caller of `ostimer_start`, and
//! receives the `user_data` pointer given at creation; keeping that pointer
//! valid and thread-safe is the caller's job.
//!
//! ## Memory Management
//!
//! - Strings returned by this API are heap-allocated and must be freed
//!   with `ostimer_free_string`.
//! - Timers must be freed with `ostimer_free`, which also stops them.
//!
//! ## Error Handling
//!
//! - Functions return null or -1 on error.
//! - Use `ostimer_get_last_error` to retrieve the message.
//! - Error messages are thread-local.

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::TimerConfig;
use crate::timing::{Timer, TimerCallback};

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = RefCell::new(None);
}

fn set_error(msg: String) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(msg);
    });
}

fn clear_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Get the last error message.
///
/// Returns null if no error occurred.
/// The returned string must be freed with `ostimer_free_string`.
#[no_mangle]
pub extern "C" fn ostimer_get_last_error() -> *mut c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(msg) => CString::new(msg.as_str())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut()),
        None => ptr::null_mut(),
    })
}

/// Free a string returned by this API.
#[no_mangle]
pub extern "C" fn ostimer_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

/// C callback: receives the `user_data` given at creation
pub type OsTimerCallback = Option<extern "C" fn(user_data: *mut c_void)>;

/// Caller-owned context pointer handed back to the callback
struct UserData(*mut c_void);

// The C caller promises the pointer may be used from the timer thread.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

fn wrap_callback(callback: OsTimerCallback, user_data: *mut c_void) -> Option<TimerCallback> {
    let callback = callback?;
    let user_data = UserData(user_data);
    Some(Arc::new(move || callback(user_data.as_ptr())))
}

/// Opaque handle to a Timer
pub struct OsTimer {
    inner: Timer,
}

fn into_handle(timer: crate::Result<Timer>) -> *mut OsTimer {
    match timer {
        Ok(inner) => Box::into_raw(Box::new(OsTimer { inner })),
        Err(e) => {
            set_error(format!("Failed to create timer: {}", e));
            ptr::null_mut()
        }
    }
}

unsafe fn timer_mut<'a>(timer: *mut OsTimer) -> Option<&'a mut OsTimer> {
    let timer = timer.as_mut();
    if timer.is_none() {
        set_error("Null timer pointer".to_string());
    }
    timer
}

/// Create a timer on the platform backend.
///
/// `callback` may be null; expirations are then skipped until one is set.
/// Returns null on error. The timer must be freed with `ostimer_free`.
#[no_mangle]
pub extern "C" fn ostimer_new(
    period_ms: u64,
    periodic: bool,
    callback: OsTimerCallback,
    user_data: *mut c_void,
) -> *mut OsTimer {
    clear_error();
    let config = TimerConfig::new()
        .period(Duration::from_millis(period_ms))
        .periodic(periodic);
    into_handle(Timer::from_config(&config, wrap_callback(callback, user_data)))
}

/// Create a timer from a JSON `TimerConfig`.
///
/// Returns null on error. The timer must be freed with `ostimer_free`.
#[no_mangle]
pub extern "C" fn ostimer_new_from_json(
    config_json: *const c_char,
    callback: OsTimerCallback,
    user_data: *mut c_void,
) -> *mut OsTimer {
    clear_error();

    if config_json.is_null() {
        set_error("Null config string".to_string());
        return ptr::null_mut();
    }
    let json = match unsafe { CStr::from_ptr(config_json) }.to_str() {
        Ok(s) => s,
        Err(_) => {
            set_error("Config string is not valid UTF-8".to_string());
            return ptr::null_mut();
        }
    };

    match TimerConfig::from_json_str(json) {
        Ok(config) => into_handle(Timer::from_config(&config, wrap_callback(callback, user_data))),
        Err(e) => {
            set_error(format!("Invalid timer config: {}", e));
            ptr::null_mut()
        }
    }
}

/// Free a timer, stopping it first.
#[no_mangle]
pub extern "C" fn ostimer_free(timer: *mut OsTimer) {
    if !timer.is_null() {
        unsafe {
            drop(Box::from_raw(timer));
        }
    }
}

/// Start a timer.
///
/// Returns 0 on success, -1 on error.
#[no_mangle]
pub extern "C" fn ostimer_start(timer: *mut OsTimer) -> i32 {
    clear_error();

    let Some(timer) = (unsafe { timer_mut(timer) }) else {
        return -1;
    };

    match timer.inner.start() {
        Ok(()) => 0,
        Err(e) => {
            set_error(format!("Failed to start timer: {}", e));
            -1
        }
    }
}

/// Stop a timer. Stopping a stopped timer does nothing.
#[no_mangle]
pub extern "C" fn ostimer_stop(timer: *mut OsTimer) {
    clear_error();
    if let Some(timer) = unsafe { timer_mut(timer) } {
        timer.inner.stop();
    }
}

/// Returns false for a null timer.
#[no_mangle]
pub extern "C" fn ostimer_is_running(timer: *const OsTimer) -> bool {
    unsafe { timer.as_ref() }.is_some_and(|t| t.inner.is_running())
}

/// Returns 0 for a null timer.
#[no_mangle]
pub extern "C" fn ostimer_get_period(timer: *const OsTimer) -> u64 {
    unsafe { timer.as_ref() }
        .map(|t| u64::try_from(t.inner.period().as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Takes effect at the next `ostimer_start`.
#[no_mangle]
pub extern "C" fn ostimer_set_period(timer: *mut OsTimer, period_ms: u64) {
    clear_error();
    if let Some(timer) = unsafe { timer_mut(timer) } {
        timer.inner.set_period(Duration::from_millis(period_ms));
    }
}

#[no_mangle]
pub extern "C" fn ostimer_is_periodic(timer: *const OsTimer) -> bool {
    unsafe { timer.as_ref() }.is_some_and(|t| t.inner.is_periodic())
}

/// Takes effect at the next `ostimer_start`.
#[no_mangle]
pub extern "C" fn ostimer_set_periodic(timer: *mut OsTimer, periodic: bool) {
    clear_error();
    if let Some(timer) = unsafe { timer_mut(timer) } {
        timer.inner.set_periodic(periodic);
    }
}

/// Replace the callback; a null callback clears it.
#[no_mangle]
pub extern "C" fn ostimer_set_callback(
    timer: *mut OsTimer,
    callback: OsTimerCallback,
    user_data: *mut c_void,
) {
    clear_error();
    let Some(timer) = (unsafe { timer_mut(timer) }) else {
        return;
    };
    match wrap_callback(callback, user_data) {
        Some(callback) => timer.inner.set_callback(move || callback()),
        None => timer.inner.clear_callback(),
    }
}

/// Get the library version.
///
/// Returns a static string (do not free).
#[no_mangle]
pub extern "C" fn ostimer_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    extern "C" fn bump(user_data: *mut c_void) {
        let counter = unsafe { &*(user_data as *const AtomicU32) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_timer_lifecycle() {
        let counter = Box::new(AtomicU32::new(0));
        let user_data = &*counter as *const AtomicU32 as *mut c_void;

        let timer = ostimer_new(20, false, Some(bump), user_data);
        assert!(!timer.is_null());
        assert!(!ostimer_is_running(timer));
        assert_eq!(ostimer_get_period(timer), 20);

        assert_eq!(ostimer_start(timer), 0);
        assert!(ostimer_is_running(timer));

        thread::sleep(Duration::from_millis(150));
        ostimer_stop(timer);

        assert!(!ostimer_is_running(timer));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        ostimer_free(timer);
    }

    #[test]
    fn test_double_start_sets_error() {
        let timer = ostimer_new(10_000, true, None, ptr::null_mut());
        assert_eq!(ostimer_start(timer), 0);
        assert_eq!(ostimer_start(timer), -1);

        let error = ostimer_get_last_error();
        assert!(!error.is_null());
        let message = unsafe { CStr::from_ptr(error) }.to_str().unwrap().to_string();
        assert!(message.contains("already running"));

        ostimer_free_string(error);
        ostimer_free(timer);
    }

    #[test]
    fn test_null_timer_handling() {
        assert_eq!(ostimer_start(ptr::null_mut()), -1);
        let error = ostimer_get_last_error();
        assert!(!error.is_null());
        ostimer_free_string(error);

        ostimer_stop(ptr::null_mut());
        ostimer_free(ptr::null_mut());
        assert!(!ostimer_is_running(ptr::null()));
        assert_eq!(ostimer_get_period(ptr::null()), 0);
    }

    #[test]
    fn test_setters() {
        let timer = ostimer_new(10, false, None, ptr::null_mut());
        ostimer_set_period(timer, 75);
        ostimer_set_periodic(timer, true);

        assert_eq!(ostimer_get_period(timer), 75);
        assert!(ostimer_is_periodic(timer));

        ostimer_free(timer);
    }

    #[test]
    fn test_new_from_json() {
        let json =
            CString::new(r#"{ "period_ms": 40, "periodic": true, "backend": "thread" }"#).unwrap();
        let timer = ostimer_new_from_json(json.as_ptr(), None, ptr::null_mut());
        assert!(!timer.is_null());
        assert_eq!(ostimer_get_period(timer), 40);
        ostimer_free(timer);

        let bad = CString::new(r#"{ "poll_interval_ms": 0 }"#).unwrap();
        assert!(ostimer_new_from_json(bad.as_ptr(), None, ptr::null_mut()).is_null());
        let error = ostimer_get_last_error();
        assert!(!error.is_null());
        ostimer_free_string(error);
    }

    #[test]
    fn test_version() {
        let version = unsafe { CStr::from_ptr(ostimer_version()) }.to_str().unwrap();
        assert_eq!(version, env!("CARGO_PKG_VERSION"));
    }
}
