use std::ffi::{c_int, CString};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info, instrument};

use crate::environment::TaskEnvironment;
use crate::error::PluginError;
use crate::ffi::{
    CallbackContext, FreeRunPlanResultFn, RunPlanFn, RunPlanResultGuard,
    FREE_RUN_PLAN_RESULT_SYMBOL, RUN_PLAN_SYMBOL,
};
use crate::types::{PlanRequest, PlanResult};
use crate::ComputationPlugin;

/// A computation plugin loaded from a shared library.
///
/// Both entry points are resolved up front; the library stays mapped for as
/// long as the value lives.
pub struct DylibPlugin {
    path: PathBuf,
    run_plan: RunPlanFn,
    free_result: FreeRunPlanResultFn,
    // Must outlive the function pointers above.
    _library: Library,
}

impl std::fmt::Debug for DylibPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DylibPlugin").field("path", &self.path).finish()
    }
}

impl DylibPlugin {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref();
        let path_display = path.display().to_string();

        // SAFETY: loading runs the library's initialisers; the plugin is a
        // trusted component named by configuration.
        let library = unsafe { Library::new(path) }.map_err(|e| PluginError::Load {
            path: path_display.clone(),
            reason: e.to_string(),
        })?;

        // SAFETY: the symbol types match the plugin's exported C signatures.
        let run_plan = unsafe { library.get::<RunPlanFn>(RUN_PLAN_SYMBOL) }
            .map(|sym| *sym)
            .map_err(|e| PluginError::MissingSymbol {
                path: path_display.clone(),
                symbol: "run_plan",
                reason: e.to_string(),
            })?;
        let free_result = unsafe { library.get::<FreeRunPlanResultFn>(FREE_RUN_PLAN_RESULT_SYMBOL) }
            .map(|sym| *sym)
            .map_err(|e| PluginError::MissingSymbol {
                path: path_display.clone(),
                symbol: "free_run_plan_result",
                reason: e.to_string(),
            })?;

        info!(path = %path_display, "computation plugin loaded");
        Ok(Self {
            path: path.to_path_buf(),
            run_plan,
            free_result,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn c_string(name: &'static str, value: &str) -> Result<CString, PluginError> {
    CString::new(value).map_err(|e| PluginError::InvalidArgument {
        name,
        reason: e.to_string(),
    })
}

impl ComputationPlugin for DylibPlugin {
    #[instrument(skip_all, fields(population = request.population_name))]
    fn run_plan(
        &self,
        env: &mut dyn TaskEnvironment,
        request: &PlanRequest<'_>,
    ) -> Result<PlanResult, PluginError> {
        let base_dir = request
            .base_dir
            .to_str()
            .ok_or_else(|| PluginError::InvalidArgument {
                name: "base_dir",
                reason: "path is not valid UTF-8".into(),
            })?;
        let base_dir = c_string("base_dir", base_dir)?;
        let service_uri = c_string("service_uri", request.service_uri)?;
        let api_key = c_string("api_key", request.api_key)?;
        let population = c_string("population_name", request.population_name)?;
        let token_size =
            c_int::try_from(request.retry_token.len()).map_err(|_| PluginError::InvalidArgument {
                name: "retry_token",
                reason: "token too long".into(),
            })?;

        let mut ctx = CallbackContext::new(env);
        let raw_env = ctx.raw_environment();

        // SAFETY: every pointer argument stays alive until the call returns,
        // and `ctx` is neither moved nor dropped before then.
        let raw = unsafe {
            (self.run_plan)(
                raw_env,
                base_dir.as_ptr(),
                service_uri.as_ptr(),
                api_key.as_ptr(),
                population.as_ptr(),
                request.retry_token.as_ptr().cast(),
                token_size,
            )
        };
        // SAFETY: `raw` was just returned by this library's `run_plan`.
        let guard = unsafe { RunPlanResultGuard::new(raw, self.free_result) };
        let result = guard.to_plan_result();
        drop(guard);

        debug!(
            status = %result.status,
            delay_secs = result.delay.as_secs(),
            events = ctx.events_published(),
            "plugin round returned"
        );
        Ok(result)
    }
}
