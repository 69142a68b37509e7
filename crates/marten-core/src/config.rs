//! Interpreter configuration
//!
//! One immutable configuration is shared by all roots of a translation
//! unit. The builder-style setters consume and return the config so
//! embedders can chain them before freezing it behind an `Arc`.

use std::sync::Arc;

use crate::exception::{ExceptionInterceptor, TagProbe};
use crate::osr::OsrCompiler;
use crate::value::Value;

/// What a read of an illegal (cleared or never-written) local produces
#[derive(Debug, Clone)]
pub enum IllegalLocalSemantics {
    /// Produce this value
    DefaultValue(Value),
    /// Raise [`crate::VmError::IllegalLocal`]
    Error,
}

/// Shared interpreter configuration
#[derive(Clone)]
pub struct InterpreterConfig {
    /// Start roots in the profile-free uncached tier
    pub enable_uncached: bool,
    /// Activations before an uncached root promotes itself to cached
    pub uncached_threshold: u32,
    /// Back-edge count that triggers an OSR compilation attempt
    pub osr_threshold: u32,
    /// Rewrite instructions toward specialized forms as types are observed
    pub enable_quickening: bool,
    /// Record the executing bci in the frame's reserved slot at
    /// location-sensitive instructions (returns, yields, throws, probes)
    pub track_location: bool,
    /// Behavior of illegal local reads
    pub illegal_local: IllegalLocalSemantics,
    /// Enforce local live ranges on materialized and reflective access
    pub block_scoping: bool,
    /// Probe notified at tagged sites
    pub probe: Option<Arc<dyn TagProbe>>,
    /// Exception interceptor
    pub interceptor: Option<Arc<dyn ExceptionInterceptor>>,
    /// Loop compiler consulted for on-stack replacement
    pub osr_compiler: Option<Arc<dyn OsrCompiler>>,
}

impl std::fmt::Debug for InterpreterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterConfig")
            .field("enable_uncached", &self.enable_uncached)
            .field("uncached_threshold", &self.uncached_threshold)
            .field("osr_threshold", &self.osr_threshold)
            .field("enable_quickening", &self.enable_quickening)
            .field("track_location", &self.track_location)
            .field("illegal_local", &self.illegal_local)
            .field("block_scoping", &self.block_scoping)
            .field("probe", &self.probe.is_some())
            .field("interceptor", &self.interceptor.is_some())
            .field("osr_compiler", &self.osr_compiler.is_some())
            .finish()
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            enable_uncached: true,
            uncached_threshold: 16,
            osr_threshold: 1024,
            enable_quickening: true,
            track_location: true,
            illegal_local: IllegalLocalSemantics::DefaultValue(Value::Null),
            block_scoping: true,
            probe: None,
            interceptor: None,
            osr_compiler: None,
        }
    }
}

impl InterpreterConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable the uncached tier; roots start cached
    pub fn without_uncached(mut self) -> Self {
        self.enable_uncached = false;
        self
    }

    /// Set the uncached-to-cached promotion threshold
    pub fn with_uncached_threshold(mut self, activations: u32) -> Self {
        self.uncached_threshold = activations;
        self
    }

    /// Set the OSR back-edge threshold
    pub fn with_osr_threshold(mut self, back_edges: u32) -> Self {
        self.osr_threshold = back_edges;
        self
    }

    /// Disable in-place instruction quickening
    pub fn without_quickening(mut self) -> Self {
        self.enable_quickening = false;
        self
    }

    /// Disable bci recording at location-sensitive instructions
    pub fn without_location_tracking(mut self) -> Self {
        self.track_location = false;
        self
    }

    /// Set the illegal local read behavior
    pub fn with_illegal_local(mut self, semantics: IllegalLocalSemantics) -> Self {
        self.illegal_local = semantics;
        self
    }

    /// Disable live-range enforcement for local access
    pub fn without_block_scoping(mut self) -> Self {
        self.block_scoping = false;
        self
    }

    /// Attach an instrumentation probe
    pub fn with_probe(mut self, probe: Arc<dyn TagProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Attach an exception interceptor
    pub fn with_interceptor(mut self, interceptor: Arc<dyn ExceptionInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Attach a loop compiler for on-stack replacement
    pub fn with_osr_compiler(mut self, compiler: Arc<dyn OsrCompiler>) -> Self {
        self.osr_compiler = Some(compiler);
        self
    }
}
