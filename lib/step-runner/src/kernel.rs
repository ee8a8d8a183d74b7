//! The boundary a runner crosses into an actual computation.
//!
//! Concrete compute kernels are out of scope here: a
//! [`ComputeAsset`](workflow::ComputeAsset) only names a kernel by a
//! deployment-defined string, and a runner resolves that name against its own
//! [`KernelRegistry`] to find something implementing [`Kernel`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RunnerError;

/// A named computation a runner can invoke against a bundle of named inputs,
/// producing a bundle of named outputs.
#[async_trait]
pub trait Kernel: Send + Sync {
    async fn run(&self, inputs: BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>, RunnerError>;
}

/// Maps a [`workflow::ComputeAsset::kernel`] name to the implementation a
/// local runner invokes for it.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: BTreeMap<String, Arc<dyn Kernel>>,
}

impl KernelRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, name: impl Into<String>, kernel: Arc<dyn Kernel>) { self.kernels.insert(name.into(), kernel); }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Kernel>, RunnerError> { self.kernels.get(name).cloned().ok_or_else(|| RunnerError::UnknownKernel(name.to_string())) }
}
