//! The compiler front door: network + request in, computation out.

use log::{debug, info};

use nnet_core::Nnet;

use crate::builder::ComputationGraphBuilder;
use crate::computation::NnetComputation;
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::lowering::lower;
use crate::request::ComputationRequest;
use crate::steps::plan_steps;

/// Compiles requests against one network.
///
/// The network is validated on every call, so a `Compiler` can be kept
/// around while the network it borrows stays unchanged.
#[derive(Debug, Clone)]
pub struct Compiler<'a> {
    nnet: &'a Nnet,
    config: CompilerConfig,
}

impl<'a> Compiler<'a> {
    pub fn new(nnet: &'a Nnet, config: CompilerConfig) -> Self {
        Self { nnet, config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Validate, build the graph, plan steps and lower.
    pub fn compile(&self, request: &ComputationRequest) -> Result<NnetComputation, CompileError> {
        self.config.validate()?;
        self.nnet.validate()?;
        request.validate(self.nnet)?;

        let graph = ComputationGraphBuilder::new(self.nnet, request, &self.config).build()?;
        let steps = plan_steps(self.nnet, request, &graph)?;
        let computation = lower(self.nnet, request, &graph, &steps, &self.config)?;
        if self.config.check_computation {
            computation.check()?;
            debug!("computation passed check");
        }
        info!(
            "compiled request ({} inputs, {} outputs) into {} commands over {} matrices",
            request.inputs.len(),
            request.outputs.len(),
            computation.commands.len(),
            computation.matrices.len()
        );
        Ok(computation)
    }
}
