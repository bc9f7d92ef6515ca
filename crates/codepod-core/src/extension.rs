//! Host-provided extensions and the callback registry that serves them.
//!
//! An extension with a command shows up inside the sandbox as an executable.
//! When the sandbox runs it, the runtime sends an `extension.invoke` callback
//! mid-call; [`ExtensionRegistry::dispatch`] turns that into a handler call and
//! the handler's outcome into exactly one [`CallbackResponse`].

use crate::protocol::{error_codes, CallbackRequest, CallbackResponse, EXTENSION_INVOKE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Arguments of one extension invocation, as sent by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtensionCall {
    /// Registered extension name.
    #[serde(default)]
    pub name: String,
    /// Command-line arguments (without the command name).
    #[serde(default)]
    pub args: Vec<String>,
    /// Everything piped into the command.
    #[serde(default)]
    pub stdin: String,
    /// Environment visible to the command.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory inside the sandbox.
    #[serde(default = "default_cwd")]
    pub cwd: String,
}

fn default_cwd() -> String {
    "/".to_string()
}

/// What an extension command produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionOutput {
    /// Text written to the command's stdout.
    pub stdout: String,
    /// Exit status of the command.
    pub exit_code: i32,
}

impl ExtensionOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: 0,
        }
    }
}

/// A host function invocable as a command inside the sandbox.
///
/// Handlers run on the task that is blocked in the outer call, so they must
/// not issue sandbox calls themselves.
pub trait ExtensionHandler: Send + Sync {
    /// Run the command.
    fn invoke(&self, call: &ExtensionCall) -> anyhow::Result<ExtensionOutput>;
}

impl<F> ExtensionHandler for F
where
    F: Fn(&ExtensionCall) -> anyhow::Result<ExtensionOutput> + Send + Sync,
{
    fn invoke(&self, call: &ExtensionCall) -> anyhow::Result<ExtensionOutput> {
        self(call)
    }
}

/// Python package installed into the sandbox alongside an extension.
///
/// The runtime interprets this; the host only forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PythonPackage {
    /// Package version reported by `pip`.
    pub version: String,
    /// One-line summary reported by `pip show`.
    pub summary: String,
    /// Package files, relative path to source text.
    pub files: BTreeMap<String, String>,
}

impl Default for PythonPackage {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            summary: String::new(),
            files: BTreeMap::new(),
        }
    }
}

/// An extension registered with a sandbox at creation time.
#[derive(Clone)]
pub struct Extension {
    /// Command and/or package name.
    pub name: String,
    /// Help text shown by `<name> --help`.
    pub description: String,
    /// Command handler, if the extension is runnable.
    pub command: Option<Arc<dyn ExtensionHandler>>,
    /// Package to install, if any.
    pub python_package: Option<PythonPackage>,
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("has_command", &self.command.is_some())
            .field("python_package", &self.python_package)
            .finish()
    }
}

impl Extension {
    /// Create an extension with no command and no package.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            command: None,
            python_package: None,
        }
    }

    /// Set the help text.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Make the extension runnable with the given handler.
    pub fn command(mut self, handler: impl ExtensionHandler + 'static) -> Self {
        self.command = Some(Arc::new(handler));
        self
    }

    /// Attach a Python package.
    pub fn python_package(mut self, package: PythonPackage) -> Self {
        self.python_package = Some(package);
        self
    }

    /// Wire form used in the `create` parameters.
    pub(crate) fn to_spec(&self) -> Value {
        let mut spec = json!({
            "name": self.name,
            "description": self.description,
            "hasCommand": self.command.is_some(),
        });
        if let Some(package) = &self.python_package {
            spec["pythonPackage"] = json!(package);
        }
        spec
    }
}

/// Name → handler mapping consulted for every callback.
///
/// Populated before the session starts and read-only afterwards.
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    handlers: HashMap<String, Arc<dyn ExtensionHandler>>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ExtensionRegistry")
            .field("handlers", &names)
            .finish()
    }
}

impl ExtensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the runnable extensions in `extensions`.
    pub fn from_extensions(extensions: &[Extension]) -> Self {
        let mut registry = Self::new();
        for ext in extensions {
            if let Some(handler) = &ext.command {
                registry.register_arc(ext.name.clone(), Arc::clone(handler));
            }
        }
        registry
    }

    /// Bind `name` to `handler`, replacing any previous binding.
    pub fn register(&mut self, name: impl Into<String>, handler: impl ExtensionHandler + 'static) {
        self.register_arc(name.into(), Arc::new(handler));
    }

    fn register_arc(&mut self, name: String, handler: Arc<dyn ExtensionHandler>) {
        tracing::debug!(extension = %name, "Registering extension handler");
        self.handlers.insert(name, handler);
    }

    /// True if a handler is bound to `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Serve one callback. Never fails: every fault becomes an error response.
    pub fn dispatch(&self, request: &CallbackRequest) -> CallbackResponse {
        tracing::debug!(id = %request.id, method = %request.method, "Dispatching callback");

        if request.method != EXTENSION_INVOKE {
            tracing::warn!(id = %request.id, method = %request.method, "Unknown callback method");
            return CallbackResponse::error(
                &request.id,
                error_codes::METHOD_NOT_FOUND,
                format!("Unknown callback method: {}", request.method),
            );
        }

        let params = if request.params.is_null() {
            json!({})
        } else {
            request.params.clone()
        };
        let call: ExtensionCall = match serde_json::from_value(params) {
            Ok(call) => call,
            Err(e) => {
                tracing::warn!(id = %request.id, error = %e, "Invalid extension.invoke params");
                return CallbackResponse::error(
                    &request.id,
                    error_codes::INVALID_PARAMS,
                    format!("invalid params: {e}"),
                );
            }
        };

        let Some(handler) = self.handlers.get(&call.name) else {
            tracing::warn!(id = %request.id, extension = %call.name, "No handler for extension");
            return CallbackResponse::error(
                &request.id,
                error_codes::INTERNAL_ERROR,
                format!("No handler for extension: {}", call.name),
            );
        };

        tracing::debug!(
            id = %request.id,
            extension = %call.name,
            argc = call.args.len(),
            stdin_len = call.stdin.len(),
            "Invoking extension handler"
        );

        match catch_unwind(AssertUnwindSafe(|| handler.invoke(&call))) {
            Ok(Ok(output)) => {
                tracing::debug!(
                    id = %request.id,
                    extension = %call.name,
                    exit_code = output.exit_code,
                    "Extension handler completed"
                );
                match serde_json::to_value(&output) {
                    Ok(result) => CallbackResponse::success(&request.id, result),
                    Err(e) => CallbackResponse::error(
                        &request.id,
                        error_codes::INTERNAL_ERROR,
                        e.to_string(),
                    ),
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(id = %request.id, extension = %call.name, error = %e, "Extension handler failed");
                CallbackResponse::error(&request.id, error_codes::INTERNAL_ERROR, format!("{e:#}"))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(id = %request.id, extension = %call.name, panic = %message, "Extension handler panicked");
                CallbackResponse::error(
                    &request.id,
                    error_codes::INTERNAL_ERROR,
                    format!("extension {} panicked: {message}", call.name),
                )
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
