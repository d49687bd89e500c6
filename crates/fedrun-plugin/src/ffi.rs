//! C ABI of the plugin boundary and the callback trampolines behind it.
//!
//! A [`CallbackContext`] is created for exactly one `run_plan` call. Its
//! address is the opaque `context` pointer handed to the plugin, and every
//! example buffer lent to the plugin is owned by it until `free_example`
//! returns it. Buffers the plugin never returns are reclaimed when the context
//! is dropped.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::environment::TaskEnvironment;
use crate::types::{PlanResult, PlanStatus};

pub const RUN_PLAN_SYMBOL: &[u8] = b"run_plan\0";
pub const FREE_RUN_PLAN_RESULT_SYMBOL: &[u8] = b"free_run_plan_result\0";

/// Hand out the next example. Returns false on failure; sets `*end` once the
/// batch is exhausted.
pub type GetNextExampleFn = unsafe extern "C" fn(
    data: *mut *const c_char,
    size: *mut c_int,
    end: *mut bool,
    context: *mut c_void,
) -> bool;

/// Return a buffer obtained from `get_next_example`.
pub type FreeExampleFn = unsafe extern "C" fn(data: *const c_char, context: *mut c_void);

pub type TrainingConditionsSatisfiedFn = unsafe extern "C" fn(context: *mut c_void) -> bool;

pub type PublishEventFn =
    unsafe extern "C" fn(event: *const c_char, size: c_int, context: *mut c_void);

/// Callback table passed by value to `run_plan`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawTaskEnvironment {
    pub get_next_example: GetNextExampleFn,
    pub free_example: FreeExampleFn,
    pub training_conditions_satisfied: TrainingConditionsSatisfiedFn,
    pub publish_event: PublishEventFn,
    pub context: *mut c_void,
}

/// Result record allocated by the plugin; released by `free_run_plan_result`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawRunPlanResult {
    pub status: c_int,
    pub retry_token: *const c_char,
    pub retry_token_size: c_int,
    pub delay_usec: i64,
}

pub type RunPlanFn = unsafe extern "C" fn(
    env: RawTaskEnvironment,
    base_dir: *const c_char,
    service_uri: *const c_char,
    api_key: *const c_char,
    population_name: *const c_char,
    retry_token: *const c_char,
    retry_token_size: c_int,
) -> RawRunPlanResult;

pub type FreeRunPlanResultFn = unsafe extern "C" fn(result: RawRunPlanResult);

/// State behind the plugin's opaque context pointer.
pub struct CallbackContext<'e> {
    env: &'e mut dyn TaskEnvironment,
    /// Buffers currently lent to the plugin, keyed by address.
    lent: HashMap<usize, Box<[u8]>>,
    events: usize,
}

impl<'e> CallbackContext<'e> {
    pub fn new(env: &'e mut dyn TaskEnvironment) -> Self {
        Self {
            env,
            lent: HashMap::new(),
            events: 0,
        }
    }

    /// Callback table pointing back at this context.
    ///
    /// The table is only valid while `self` stays where it is and alive.
    pub fn raw_environment(&mut self) -> RawTaskEnvironment {
        RawTaskEnvironment {
            get_next_example,
            free_example,
            training_conditions_satisfied,
            publish_event,
            context: (self as *mut Self).cast(),
        }
    }

    /// Example buffers the plugin has not returned yet.
    pub fn outstanding(&self) -> usize {
        self.lent.len()
    }

    pub fn events_published(&self) -> usize {
        self.events
    }
}

impl Drop for CallbackContext<'_> {
    fn drop(&mut self) {
        if !self.lent.is_empty() {
            warn!(count = self.lent.len(), "plugin did not free all examples; reclaiming");
        }
    }
}

/// Recover the context from the opaque pointer.
///
/// # Safety
/// `context` must come from [`CallbackContext::raw_environment`] on a context
/// that is still alive and not otherwise borrowed.
unsafe fn context<'a>(context: *mut c_void) -> Option<&'a mut CallbackContext<'a>> {
    context.cast::<CallbackContext<'a>>().as_mut()
}

unsafe extern "C" fn get_next_example(
    data: *mut *const c_char,
    size: *mut c_int,
    end: *mut bool,
    ctx: *mut c_void,
) -> bool {
    if data.is_null() || size.is_null() || end.is_null() {
        return false;
    }
    let Some(ctx) = context(ctx) else {
        return false;
    };

    let next = panic::catch_unwind(AssertUnwindSafe(|| ctx.env.next_example()));
    match next {
        Ok(Ok(Some(bytes))) => {
            let Ok(len) = c_int::try_from(bytes.len()) else {
                warn!(bytes = bytes.len(), "example too large for the plugin ABI");
                return false;
            };
            let buffer = bytes.into_boxed_slice();
            let addr = buffer.as_ptr();
            ctx.lent.insert(addr as usize, buffer);
            *data = addr.cast();
            *size = len;
            *end = false;
            true
        }
        Ok(Ok(None)) => {
            *data = ptr::null();
            *size = 0;
            *end = true;
            true
        }
        Ok(Err(e)) => {
            warn!(error = %e, "example source failed during round");
            false
        }
        Err(_) => {
            warn!("example source panicked during round");
            false
        }
    }
}

unsafe extern "C" fn free_example(data: *const c_char, ctx: *mut c_void) {
    let Some(ctx) = context(ctx) else {
        return;
    };
    if ctx.lent.remove(&(data as usize)).is_none() {
        warn!("plugin freed an example buffer it does not own");
    }
}

unsafe extern "C" fn training_conditions_satisfied(ctx: *mut c_void) -> bool {
    let Some(ctx) = context(ctx) else {
        return false;
    };
    panic::catch_unwind(AssertUnwindSafe(|| ctx.env.conditions_satisfied())).unwrap_or(false)
}

unsafe extern "C" fn publish_event(event: *const c_char, size: c_int, ctx: *mut c_void) {
    let Some(ctx) = context(ctx) else {
        return;
    };
    let bytes: &[u8] = match usize::try_from(size) {
        Ok(len) if len > 0 && !event.is_null() => std::slice::from_raw_parts(event.cast(), len),
        _ => &[],
    };
    ctx.events += 1;
    let _ = panic::catch_unwind(AssertUnwindSafe(|| ctx.env.publish_event(bytes)));
}

/// Owns a plugin result record and releases it exactly once.
pub struct RunPlanResultGuard {
    raw: RawRunPlanResult,
    free: FreeRunPlanResultFn,
}

impl RunPlanResultGuard {
    /// # Safety
    /// `raw` must have been returned by the plugin whose `free` is given, and
    /// must not be released anywhere else.
    pub unsafe fn new(raw: RawRunPlanResult, free: FreeRunPlanResultFn) -> Self {
        Self { raw, free }
    }

    /// Copy the record into owned Rust values.
    pub fn to_plan_result(&self) -> PlanResult {
        let token = match usize::try_from(self.raw.retry_token_size) {
            Ok(len) if len > 0 && !self.raw.retry_token.is_null() => {
                // SAFETY: the plugin guarantees `retry_token` points at
                // `retry_token_size` bytes until the record is freed.
                let bytes =
                    unsafe { std::slice::from_raw_parts(self.raw.retry_token.cast::<u8>(), len) };
                String::from_utf8_lossy(bytes).into_owned()
            }
            _ => String::new(),
        };
        PlanResult {
            status: PlanStatus::from_code(self.raw.status),
            retry_token: token,
            delay: Duration::from_micros(self.raw.delay_usec.max(0) as u64),
        }
    }
}

impl Drop for RunPlanResultGuard {
    fn drop(&mut self) {
        // SAFETY: constructed from a live record of this plugin; dropped once.
        unsafe { (self.free)(self.raw) };
        debug!("plugin result released");
    }
}
