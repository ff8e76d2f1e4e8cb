//! Per-user Docker sandboxes for running generated code.
//!
//! The registry creates and removes sandboxes and hands out the transfer,
//! installer and executor components, all sharing one runtime handle.

mod docker;
mod error;
mod executor;
mod installer;
mod outcome;
mod registry;
mod runtime;
mod transfer;

#[cfg(test)]
pub(crate) mod fake;

pub(crate) use docker::DockerRuntime;
pub(crate) use error::SandboxError;
pub(crate) use installer::InstallReport;
pub(crate) use outcome::{ExecutionOutcome, OutcomeCategory};
pub(crate) use registry::{
    Provision, Provisioned, RemoveStatus, SandboxRef, SandboxRegistry, SandboxStatus,
};

#[cfg(test)]
pub(crate) use runtime::ContainerRuntime;
