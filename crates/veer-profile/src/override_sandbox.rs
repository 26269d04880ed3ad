//! Isolated evaluation of override units.
//!
//! Script overrides are WebAssembly text modules executed in a fuel- and
//! memory-bounded wasmtime store under a wall-clock timeout. The linker defines exactly one capability,
//! the `console` logging facade; there is no WASI, filesystem, network,
//! environment, or process access. Script ABI:
//!
//! - exports `memory`, `alloc(len: i32) -> i32` and `main(ptr: i32, len: i32) -> i64`
//! - `main` receives the profile as JSON and returns `(ptr << 32) | len` of the
//!   JSON document that replaces it
//! - imports may only be `console.log`, `console.info`, `console.error` and
//!   `console.debug`, each taking `(ptr: i32, len: i32)` of a UTF-8 argument
//!
//! Any failure leaves the profile untouched and is recorded in the override's
//! log artifact.

use std::{
    fmt,
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wasmparser::{Parser, Payload};
use wasmtime::{Caller, Config, Engine, Linker, Module, Store, StoreLimits, StoreLimitsBuilder};

use crate::error::PatchParseError;
use crate::override_log::{serialize_console_argument, OverrideLog};
use crate::profile_merge::merge_profile;
use crate::profile_types::{OverrideItem, OverrideKind, Profile};

const WASM_PAGE_SIZE_BYTES: u64 = 65_536;
const SCRIPT_MEMORY_EXPORT_NAME: &str = "memory";
const SCRIPT_ALLOC_EXPORT_NAME: &str = "alloc";
const SCRIPT_ENTRY_EXPORT_NAME: &str = "main";
const SCRIPT_CONSOLE_MODULE_NAME: &str = "console";
const SCRIPT_CONSOLE_MAX_ARGUMENT_BYTES: usize = 64 * 1024;

/// Default fuel budget for one script run.
pub const SCRIPT_SANDBOX_FUEL_LIMIT_DEFAULT: u64 = 50_000_000;
/// Default memory ceiling for one script run.
pub const SCRIPT_SANDBOX_MEMORY_LIMIT_BYTES_DEFAULT: u64 = 64 * 1024 * 1024;
/// Default wall-clock budget for one script run.
pub const SCRIPT_SANDBOX_TIMEOUT_MS_DEFAULT: u64 = 10_000;
/// Default ceiling for the JSON document a script may return.
pub const SCRIPT_SANDBOX_MAX_RESPONSE_BYTES_DEFAULT: usize = 16 * 1024 * 1024;

const SCRIPT_LOG_STARTED: &str = "script execution started";
const SCRIPT_LOG_SUCCEEDED: &str = "script execution succeeded";
const PATCH_LOG_STARTED: &str = "patch apply started";
const PATCH_LOG_SUCCEEDED: &str = "patch applied";

/// Severity channels exposed to scripts through the `console` import module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleChannel {
    Log,
    Info,
    Error,
    Debug,
}

impl ConsoleChannel {
    pub const ALL: [ConsoleChannel; 4] = [Self::Log, Self::Info, Self::Error, Self::Debug];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Runtime limits applied to a single script run.
pub struct ScriptSandboxLimits {
    pub fuel_limit: u64,
    pub memory_limit_bytes: u64,
    pub timeout_ms: u64,
    pub max_response_bytes: usize,
}

impl Default for ScriptSandboxLimits {
    fn default() -> Self {
        Self {
            fuel_limit: SCRIPT_SANDBOX_FUEL_LIMIT_DEFAULT,
            memory_limit_bytes: SCRIPT_SANDBOX_MEMORY_LIMIT_BYTES_DEFAULT,
            timeout_ms: SCRIPT_SANDBOX_TIMEOUT_MS_DEFAULT,
            max_response_bytes: SCRIPT_SANDBOX_MAX_RESPONSE_BYTES_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Structured failure of a script run.
pub struct ScriptSandboxError {
    pub reason_code: String,
    pub message: String,
    pub diagnostics: Vec<String>,
}

impl ScriptSandboxError {
    fn new(reason_code: &str, message: impl Into<String>) -> Self {
        Self {
            reason_code: reason_code.to_string(),
            message: message.into(),
            diagnostics: Vec::new(),
        }
    }

    fn with_diagnostics(
        reason_code: &str,
        message: impl Into<String>,
        diagnostics: Vec<String>,
    ) -> Self {
        Self {
            reason_code: reason_code.to_string(),
            message: message.into(),
            diagnostics,
        }
    }
}

impl fmt::Display for ScriptSandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.diagnostics.is_empty() {
            write!(f, "{} ({})", self.message, self.reason_code)
        } else {
            write!(
                f,
                "{} ({}) diagnostics={}",
                self.message,
                self.reason_code,
                self.diagnostics.join("; ")
            )
        }
    }
}

impl std::error::Error for ScriptSandboxError {}

struct ScriptStoreState {
    limits: StoreLimits,
    console: ConsoleGate,
}

/// Console sink shared by a script worker and the caller waiting on it.
///
/// Once closed, console calls still arriving from the worker are dropped.
#[derive(Debug, Clone)]
struct ConsoleGate {
    log: OverrideLog,
    closed: Arc<Mutex<bool>>,
}

impl ConsoleGate {
    fn new(log: OverrideLog) -> Self {
        Self {
            log,
            closed: Arc::new(Mutex::new(false)),
        }
    }

    fn write(&self, tag: &str, text: &str) {
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if !*closed {
            self.log.append(tag, text);
        }
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }
}

/// Applies override units to profiles under a fixed script budget.
#[derive(Debug, Clone, Default)]
pub struct OverrideSandbox {
    limits: ScriptSandboxLimits,
}

impl OverrideSandbox {
    pub fn new(limits: ScriptSandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ScriptSandboxLimits {
        &self.limits
    }

    /// Applies one override and returns the resulting profile.
    ///
    /// Never fails: on any error the input profile is returned unchanged and
    /// the failure is recorded in `log`.
    pub async fn apply(
        &self,
        profile: &Profile,
        item: &OverrideItem,
        content: &str,
        log: &OverrideLog,
    ) -> Profile {
        match item.kind {
            OverrideKind::Script => run_override_script(profile, content, &self.limits, log).await,
            OverrideKind::Patch => apply_patch_override(profile, content, log),
        }
    }
}

/// Parses a declarative patch document, applying YAML `<<` merge keys.
pub fn parse_patch_document(content: &str) -> Result<Value, PatchParseError> {
    let mut document: serde_yaml::Value = serde_yaml::from_str(content)?;
    document.apply_merge()?;
    Ok(serde_json::to_value(document)?)
}

/// Merges a YAML patch into `profile`; a non-mapping document is an empty patch.
pub fn apply_patch_override(profile: &Profile, content: &str, log: &OverrideLog) -> Profile {
    log.begin(PATCH_LOG_STARTED);
    match parse_patch_document(content) {
        Ok(patch) => {
            let merged = merge_profile(profile, &patch);
            log.info(PATCH_LOG_SUCCEEDED);
            merged
        }
        Err(error) => {
            log.exception(&format!("patch apply failed: {error}"));
            tracing::warn!(log = %log.path().display(), %error, "override patch skipped");
            profile.clone()
        }
    }
}

/// Runs a script override against a serialized copy of `profile`.
pub async fn run_override_script(
    profile: &Profile,
    source: &str,
    limits: &ScriptSandboxLimits,
    log: &OverrideLog,
) -> Profile {
    log.begin(SCRIPT_LOG_STARTED);
    let request_json = Value::Object(profile.clone()).to_string();
    let source = source.to_string();
    let limits = limits.clone();
    let worker_log = log.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        execute_override_script_sync(&source, request_json, &limits, worker_log)
    })
    .await
    .unwrap_or_else(|error| {
        Err(ScriptSandboxError::new(
            "script_execution_join_error",
            format!("failed to join script sandbox task: {error}"),
        ))
    });

    match outcome {
        Ok(Value::Object(next)) => {
            log.info(SCRIPT_LOG_SUCCEEDED);
            next
        }
        Ok(other) => {
            log.exception(&format!(
                "script execution failed: script must return an object, got {}",
                json_type_name(&other)
            ));
            profile.clone()
        }
        Err(error) => {
            log.exception(&format!("script execution failed: {error}"));
            tracing::warn!(
                log = %log.path().display(),
                reason_code = error.reason_code.as_str(),
                "override script failed; profile left unchanged"
            );
            profile.clone()
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Executes a script on a dedicated worker thread with timeout enforcement.
pub fn execute_override_script_sync(
    source: &str,
    request_json: String,
    limits: &ScriptSandboxLimits,
    log: OverrideLog,
) -> Result<Value, ScriptSandboxError> {
    validate_limits(limits)?;

    let timeout_ms = limits.timeout_ms.max(1);
    let engine = script_engine()?;
    let console = ConsoleGate::new(log);
    let source = source.to_string();
    let worker_limits = limits.clone();
    let worker_engine = engine.clone();
    let worker_console = console.clone();
    let (sender, receiver) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name("veer-script-sandbox".to_string())
        .spawn(move || {
            let _ = sender.send(execute_override_script_blocking(
                &worker_engine,
                &source,
                &request_json,
                &worker_limits,
                worker_console,
            ));
        })
        .map_err(|error| {
            ScriptSandboxError::new(
                "script_execution_spawn_failed",
                format!("failed to spawn script sandbox worker: {error}"),
            )
        })?;

    match receiver.recv_timeout(Duration::from_millis(timeout_ms)) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            // Silence the worker first, then trap it at its next epoch check.
            console.close();
            engine.increment_epoch();
            Err(ScriptSandboxError::new(
                "script_execution_timeout",
                format!("script execution timed out after {timeout_ms} ms"),
            ))
        }
        Err(RecvTimeoutError::Disconnected) => Err(ScriptSandboxError::new(
            "script_execution_join_error",
            "script sandbox worker terminated before returning a result",
        )),
    }
}

fn script_engine() -> Result<Engine, ScriptSandboxError> {
    let mut config = Config::new();
    config.consume_fuel(true);
    config.epoch_interruption(true);
    Engine::new(&config).map_err(|error| {
        ScriptSandboxError::new(
            "script_engine_init_failed",
            format!("failed to initialize wasm engine: {error}"),
        )
    })
}

fn validate_limits(limits: &ScriptSandboxLimits) -> Result<(), ScriptSandboxError> {
    if limits.fuel_limit == 0 {
        return Err(ScriptSandboxError::new(
            "script_limit_invalid_fuel",
            "script fuel limit must be greater than 0",
        ));
    }
    if limits.memory_limit_bytes == 0 {
        return Err(ScriptSandboxError::new(
            "script_limit_invalid_memory",
            "script memory limit must be greater than 0",
        ));
    }
    if limits.timeout_ms == 0 {
        return Err(ScriptSandboxError::new(
            "script_limit_invalid_timeout",
            "script timeout must be greater than 0",
        ));
    }
    if limits.max_response_bytes == 0 {
        return Err(ScriptSandboxError::new(
            "script_limit_invalid_response_size",
            "script max response bytes must be greater than 0",
        ));
    }
    Ok(())
}

fn define_console_facade(linker: &mut Linker<ScriptStoreState>) -> Result<(), ScriptSandboxError> {
    for channel in ConsoleChannel::ALL {
        linker
            .func_wrap(
                SCRIPT_CONSOLE_MODULE_NAME,
                channel.as_str(),
                move |mut caller: Caller<'_, ScriptStoreState>, ptr: i32, len: i32| {
                    let text = match read_guest_text(&mut caller, ptr, len) {
                        Some(text) => serialize_console_argument(&text),
                        None => "\"<unreadable console argument>\"".to_string(),
                    };
                    caller.data().console.write(channel.as_str(), &text);
                },
            )
            .map_err(|error| {
                ScriptSandboxError::new(
                    "script_linker_init_failed",
                    format!("failed to define console.{}: {error}", channel.as_str()),
                )
            })?;
    }
    Ok(())
}

fn read_guest_text(
    caller: &mut Caller<'_, ScriptStoreState>,
    ptr: i32,
    len: i32,
) -> Option<String> {
    let memory = caller
        .get_export(SCRIPT_MEMORY_EXPORT_NAME)?
        .into_memory()?;
    let offset = usize::try_from(ptr).ok()?;
    let len = usize::try_from(len)
        .ok()?
        .min(SCRIPT_CONSOLE_MAX_ARGUMENT_BYTES);
    let mut bytes = vec![0u8; len];
    memory.read(&*caller, offset, &mut bytes).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn execute_override_script_blocking(
    engine: &Engine,
    source: &str,
    request_json: &str,
    limits: &ScriptSandboxLimits,
    console: ConsoleGate,
) -> Result<Value, ScriptSandboxError> {
    let module_bytes = wat::parse_str(source).map_err(|error| {
        ScriptSandboxError::new(
            "script_parse_failed",
            format!("failed to parse script module: {error}"),
        )
    })?;
    validate_module_for_limits(&module_bytes, limits.memory_limit_bytes)?;

    let module = Module::new(engine, &module_bytes).map_err(|error| {
        ScriptSandboxError::new(
            "script_module_compile_failed",
            format!("failed to compile script module: {error}"),
        )
    })?;

    let mut store = Store::new(
        engine,
        ScriptStoreState {
            limits: StoreLimitsBuilder::new()
                .memory_size(usize::try_from(limits.memory_limit_bytes).unwrap_or(usize::MAX))
                .build(),
            console,
        },
    );
    store.limiter(|state| &mut state.limits);
    store.set_epoch_deadline(1);
    store.epoch_deadline_trap();
    store.set_fuel(limits.fuel_limit).map_err(|error| {
        ScriptSandboxError::new(
            "script_fuel_config_failed",
            format!("failed to configure script fuel limit: {error}"),
        )
    })?;

    let mut linker = Linker::<ScriptStoreState>::new(engine);
    define_console_facade(&mut linker)?;
    let instance = linker.instantiate(&mut store, &module).map_err(|error| {
        ScriptSandboxError::new(
            "script_instance_init_failed",
            format!("failed to instantiate script module: {error}"),
        )
    })?;

    let memory = instance
        .get_memory(&mut store, SCRIPT_MEMORY_EXPORT_NAME)
        .ok_or_else(|| {
            ScriptSandboxError::new(
                "script_export_missing_memory",
                format!("script module missing required memory export '{SCRIPT_MEMORY_EXPORT_NAME}'"),
            )
        })?;
    let alloc = instance
        .get_typed_func::<i32, i32>(&mut store, SCRIPT_ALLOC_EXPORT_NAME)
        .map_err(|error| {
            ScriptSandboxError::new(
                "script_export_missing_alloc",
                format!("script module missing required export '{SCRIPT_ALLOC_EXPORT_NAME}': {error}"),
            )
        })?;
    let entry = instance
        .get_typed_func::<(i32, i32), i64>(&mut store, SCRIPT_ENTRY_EXPORT_NAME)
        .map_err(|error| {
            ScriptSandboxError::new(
                "script_export_missing_main",
                format!("script module missing required export '{SCRIPT_ENTRY_EXPORT_NAME}': {error}"),
            )
        })?;

    let request_bytes = request_json.as_bytes();
    let request_len: i32 = request_bytes.len().try_into().map_err(|_| {
        ScriptSandboxError::new(
            "script_request_too_large",
            "profile payload exceeds wasm i32 length boundary",
        )
    })?;
    let request_ptr = alloc.call(&mut store, request_len).map_err(|error| {
        ScriptSandboxError::new(
            "script_alloc_failed",
            format!("script alloc export failed while reserving profile buffer: {error}"),
        )
    })?;
    let request_ptr = usize::try_from(request_ptr).map_err(|_| {
        ScriptSandboxError::new(
            "script_alloc_invalid_pointer",
            "script alloc export returned a negative pointer",
        )
    })?;
    validate_memory_range(&memory, &store, request_ptr, request_bytes.len()).map_err(|error| {
        ScriptSandboxError::new(
            "script_request_range_invalid",
            format!("profile buffer outside script memory bounds: {error}"),
        )
    })?;
    memory
        .write(&mut store, request_ptr, request_bytes)
        .map_err(|error| {
            ScriptSandboxError::new(
                "script_request_write_failed",
                format!("failed to write profile into script memory: {error}"),
            )
        })?;

    let packed = entry
        .call(&mut store, (request_ptr as i32, request_len))
        .map_err(|error| {
            let remaining_fuel = store.get_fuel().unwrap_or_default();
            ScriptSandboxError::with_diagnostics(
                "script_execution_trap",
                format!("script main trapped: {error}"),
                vec![format!(
                    "fuel_consumed={}",
                    limits.fuel_limit.saturating_sub(remaining_fuel)
                )],
            )
        })?;
    let packed = packed as u64;
    let response_ptr = (packed >> 32) as usize;
    let response_len = (packed & 0xFFFF_FFFF) as usize;
    if response_len > limits.max_response_bytes {
        return Err(ScriptSandboxError::new(
            "script_response_too_large",
            format!(
                "script response length {} exceeds limit {}",
                response_len, limits.max_response_bytes
            ),
        ));
    }
    validate_memory_range(&memory, &store, response_ptr, response_len).map_err(|error| {
        ScriptSandboxError::new(
            "script_response_range_invalid",
            format!("script response outside memory bounds: {error}"),
        )
    })?;
    let mut response_bytes = vec![0u8; response_len];
    memory
        .read(&store, response_ptr, &mut response_bytes)
        .map_err(|error| {
            ScriptSandboxError::new(
                "script_response_read_failed",
                format!("failed to read script response: {error}"),
            )
        })?;
    let response_json = String::from_utf8(response_bytes).map_err(|error| {
        ScriptSandboxError::new(
            "script_response_not_utf8",
            format!("script response is not valid UTF-8: {error}"),
        )
    })?;
    serde_json::from_str(&response_json).map_err(|error| {
        ScriptSandboxError::new(
            "script_response_invalid_json",
            format!("script response is not valid JSON: {error}"),
        )
    })
}

fn validate_module_for_limits(
    module_bytes: &[u8],
    memory_limit_bytes: u64,
) -> Result<(), ScriptSandboxError> {
    let mut diagnostics = Vec::new();
    for payload in Parser::new(0).parse_all(module_bytes) {
        let payload = payload.map_err(|error| {
            ScriptSandboxError::new(
                "script_module_parse_failed",
                format!("failed to parse script module bytes: {error}"),
            )
        })?;
        if let Payload::MemorySection(section) = payload {
            for memory in section {
                let memory = memory.map_err(|error| {
                    ScriptSandboxError::new(
                        "script_module_parse_failed",
                        format!("failed to parse script memory section: {error}"),
                    )
                })?;
                let min_bytes = memory.initial.saturating_mul(WASM_PAGE_SIZE_BYTES);
                diagnostics.push(format!(
                    "memory.initial_pages={} memory.initial_bytes={}",
                    memory.initial, min_bytes
                ));
                if min_bytes > memory_limit_bytes {
                    return Err(ScriptSandboxError::with_diagnostics(
                        "script_module_memory_declared_exceeds_limit",
                        format!(
                            "script declares minimum memory {min_bytes} bytes above limit {memory_limit_bytes} bytes"
                        ),
                        diagnostics,
                    ));
                }
            }
        }
    }
    Ok(())
}

fn validate_memory_range(
    memory: &wasmtime::Memory,
    store: &Store<ScriptStoreState>,
    offset: usize,
    len: usize,
) -> Result<(), String> {
    let memory_size = memory.data_size(store);
    let end = offset
        .checked_add(len)
        .ok_or_else(|| "memory range overflow".to_string())?;
    if end > memory_size {
        return Err(format!(
            "offset={offset} len={len} end={end} exceeds memory_size={memory_size}"
        ));
    }
    Ok(())
}
