//! System operation kind
//!
//! The generic `operation` kind records an arbitrary payload on the chain
//! with no side effect beyond bookkeeping.

use log::debug;

use crate::config::ChainConfig;
use crate::error::Result;
use crate::model::Operation;
use super::{ExecutionContext, ExecutionOutcome, OpCategory, OpKind, PreparedAction, PreparedOp};

/// The generic `operation` kind
pub struct SysOperationKind;

impl OpKind for SysOperationKind {
    fn type_name(&self) -> &'static str {
        "operation"
    }

    fn category(&self) -> OpCategory {
        OpCategory::Sys
    }

    fn describe(&self) -> &'static str {
        "Records a generic operation on the chain with no external side effect"
    }

    fn prepare(&self, operation: &Operation, _config: &ChainConfig) -> Result<PreparedOp> {
        Ok(PreparedOp {
            operation: operation.clone(),
            action: PreparedAction::Bookkeeping,
        })
    }

    fn execute(
        &self,
        prepared: &PreparedOp,
        _context: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome> {
        debug!(
            "Recorded system operation {}",
            hex::encode(&prepared.operation.hash()[0..4])
        );
        Ok(ExecutionOutcome::Recorded)
    }
}
