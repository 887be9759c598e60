use crate::error::{Result, SweepCtlError};
use crate::orchestrator::UserHooks;
use crate::subsystem::SweepData;
use crate::types::AbortReason;
use rhai::{Array, CallFnOptions, Dynamic, Engine, FuncArgs, Scope, AST};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Run bookkeeping visible to scripts through accessor functions
#[derive(Debug, Default, Clone)]
pub struct HookContext {
    /// Ordinal of the sweep in progress (0 outside sweeps)
    pub sweep_ordinal: u32,
    /// Sweeps completed in the current run
    pub sweeps_completed: u32,
    /// Chunks delivered in the current sweep
    pub chunks_in_sweep: u64,
    /// Everything the script passed to `log`
    pub messages: Vec<String>,
}

/// Thread-safe shared hook context
pub type SharedHookContext = Arc<RwLock<HookContext>>;

/// [`UserHooks`] backed by a Rhai script
pub struct ScriptHooks {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    defined: HashSet<(String, usize)>,
    context: SharedHookContext,
}

impl ScriptHooks {
    /// Compile `source` and run its top level once
    pub fn from_source(source: &str) -> Result<Self> {
        let context: SharedHookContext = Arc::new(RwLock::new(HookContext::default()));
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine, context.clone());

        let ast = engine
            .compile(source)
            .map_err(|e| SweepCtlError::Script(format!("Compile error: {}", e)))?;
        let defined = ast
            .iter_functions()
            .map(|f| (f.name.to_string(), f.params.len()))
            .collect();

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(SweepCtlError::from_rhai_error)?;

        Ok(Self {
            engine,
            ast,
            scope,
            defined,
            context,
        })
    }

    /// Load a hook script from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            SweepCtlError::Script(format!("Failed to read hook script {:?}: {}", path, e))
        })?;
        let hooks = Self::from_source(&source)?;
        tracing::info!(
            "Loaded hook script {:?} defining {:?}",
            path,
            hooks.hook_names()
        );
        Ok(hooks)
    }

    fn configure_engine(engine: &mut Engine, context: SharedHookContext) {
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(1_000);

        engine.on_print(|text| tracing::info!(target: "sweepctl::script", "{}", text));
        engine.on_debug(|text, _, pos| {
            tracing::debug!(target: "sweepctl::script", "{} ({})", text, pos)
        });

        {
            let ctx = context.clone();
            engine.register_fn("log", move |message: &str| {
                tracing::info!(target: "sweepctl::script", "{}", message);
                if let Ok(mut c) = ctx.write() {
                    c.messages.push(message.to_string());
                }
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("sweep_ordinal", move || -> i64 {
                ctx.read().map(|c| c.sweep_ordinal as i64).unwrap_or(0)
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("sweeps_completed", move || -> i64 {
                ctx.read().map(|c| c.sweeps_completed as i64).unwrap_or(0)
            });
        }
        {
            let ctx = context;
            engine.register_fn("chunks_in_sweep", move || -> i64 {
                ctx.read().map(|c| c.chunks_in_sweep as i64).unwrap_or(0)
            });
        }
    }

    /// Hook functions the script defines, as `name/arity`
    pub fn hook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .defined
            .iter()
            .map(|(name, arity)| format!("{}/{}", name, arity))
            .collect();
        names.sort();
        names
    }

    /// Whether the script defines `name` taking `arity` arguments
    pub fn defines(&self, name: &str, arity: usize) -> bool {
        self.defined.contains(&(name.to_string(), arity))
    }

    /// Messages the script logged so far
    pub fn messages(&self) -> Vec<String> {
        self.context
            .read()
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// Shared context, for inspection
    pub fn context(&self) -> &SharedHookContext {
        &self.context
    }

    fn update_context(&self, f: impl FnOnce(&mut HookContext)) {
        if let Ok(mut c) = self.context.write() {
            f(&mut c);
        }
    }

    /// Call `name` if the script defines it with matching arity.
    ///
    /// Errors are logged and swallowed.
    fn call_hook(&mut self, name: &str, arity: usize, args: impl FuncArgs) {
        if !self.defines(name, arity) {
            return;
        }
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        if let Err(e) = self.engine.call_fn_with_options::<Dynamic>(
            options,
            &mut self.scope,
            &self.ast,
            name,
            args,
        ) {
            tracing::warn!("Hook '{}' failed: {}", name, e);
        }
    }
}

impl UserHooks for ScriptHooks {
    fn run_will_start(&mut self) {
        self.update_context(|c| {
            c.sweep_ordinal = 0;
            c.sweeps_completed = 0;
        });
        self.call_hook("run_will_start", 0, ());
    }

    fn sweep_will_start(&mut self, ordinal: u32) {
        self.update_context(|c| {
            c.sweep_ordinal = ordinal;
            c.chunks_in_sweep = 0;
        });
        self.call_hook("sweep_will_start", 1, (ordinal as i64,));
    }

    fn data_available(&mut self, data: &SweepData) {
        self.update_context(|c| c.chunks_in_sweep += 1);
        if !self.defines("data_available", 2) {
            return;
        }
        let scaled = data.scaled_analog;
        let rows = scaled.rows().max(1) as f64;
        let means: Array = (0..scaled.cols())
            .map(|col| Dynamic::from_float(scaled.column(col).sum::<f64>() / rows))
            .collect();
        self.call_hook("data_available", 2, (means, data.time_since_run_start));
    }

    fn sweep_did_complete(&mut self, ordinal: u32) {
        self.update_context(|c| c.sweeps_completed += 1);
        self.call_hook("sweep_did_complete", 1, (ordinal as i64,));
    }

    fn sweep_did_abort(&mut self, ordinal: u32, reason: AbortReason) {
        self.call_hook("sweep_did_abort", 2, (ordinal as i64, reason.to_string()));
    }

    fn run_did_complete(&mut self, sweeps_completed: u32) {
        self.call_hook("run_did_complete", 1, (sweeps_completed as i64,));
    }

    fn run_did_abort(&mut self, reason: AbortReason) {
        self.call_hook("run_did_abort", 1, (reason.to_string(),));
    }
}
