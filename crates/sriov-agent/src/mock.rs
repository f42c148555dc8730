//! In-memory mocks for unit testing
//!
//! These stand in for sysfs, the host boot tooling and device programming so
//! reconcilers can be tested without hardware. Each mock records what it was
//! asked to do and can be told to fail.

use crate::agent_trait::{HardwareConfigurator, InventoryReader};
use crate::command::{CommandOutput, CommandRunner};
use crate::error::AgentError;
use crds::{InventorySnapshot, SriovFecNodeConfigSpec};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn mock_failure(what: &str, message: &str) -> AgentError {
    AgentError::Command {
        command: format!("mock {}", what),
        message: message.to_string(),
    }
}

/// Mock inventory reader
///
/// Returns the configured snapshot. Failures queued with
/// [`MockInventoryReader::fail_next`] are consumed one read at a time;
/// [`MockInventoryReader::fail_always`] makes every read fail until cleared.
#[derive(Debug, Clone, Default)]
pub struct MockInventoryReader {
    inventory: Arc<Mutex<InventorySnapshot>>,
    queued_failures: Arc<Mutex<VecDeque<String>>>,
    permanent_failure: Arc<Mutex<Option<String>>>,
    reads: Arc<AtomicUsize>,
}

impl MockInventoryReader {
    pub fn new(inventory: InventorySnapshot) -> Self {
        Self {
            inventory: Arc::new(Mutex::new(inventory)),
            ..Default::default()
        }
    }

    /// Replaces the snapshot returned by subsequent reads.
    pub fn set_inventory(&self, inventory: InventorySnapshot) {
        *self.inventory.lock().unwrap() = inventory;
    }

    /// Makes the next read fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.queued_failures.lock().unwrap().push_back(message.into());
    }

    /// Makes every read fail with `message` (`None` clears it).
    pub fn fail_always(&self, message: Option<String>) {
        *self.permanent_failure.lock().unwrap() = message;
    }

    /// Number of reads so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl InventoryReader for MockInventoryReader {
    async fn read_inventory(&self) -> Result<InventorySnapshot, AgentError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.queued_failures.lock().unwrap().pop_front() {
            return Err(mock_failure("read_inventory", &message));
        }
        if let Some(message) = self.permanent_failure.lock().unwrap().as_ref() {
            return Err(mock_failure("read_inventory", message));
        }
        Ok(self.inventory.lock().unwrap().clone())
    }
}

/// One call made against [`MockHardwareConfigurator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareCall {
    CheckKernelParams,
    InstallKernelParams,
    RequestReboot,
    ApplyConfig(SriovFecNodeConfigSpec),
}

/// Mock hardware configurator
#[derive(Debug, Clone, Default)]
pub struct MockHardwareConfigurator {
    missing_params: Arc<AtomicBool>,
    check_error: Arc<Mutex<Option<String>>>,
    install_error: Arc<Mutex<Option<String>>>,
    reboot_error: Arc<Mutex<Option<String>>>,
    apply_error: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<Vec<HardwareCall>>>,
}

impl MockHardwareConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `missing_kernel_params` reports missing parameters.
    pub fn set_missing_kernel_params(&self, missing: bool) {
        self.missing_params.store(missing, Ordering::SeqCst);
    }

    pub fn fail_check(&self, message: impl Into<String>) {
        *self.check_error.lock().unwrap() = Some(message.into());
    }

    pub fn fail_install(&self, message: impl Into<String>) {
        *self.install_error.lock().unwrap() = Some(message.into());
    }

    pub fn fail_reboot(&self, message: impl Into<String>) {
        *self.reboot_error.lock().unwrap() = Some(message.into());
    }

    pub fn fail_apply(&self, message: impl Into<String>) {
        *self.apply_error.lock().unwrap() = Some(message.into());
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Specs passed to `apply_config`, in order.
    pub fn applied(&self) -> Vec<SriovFecNodeConfigSpec> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                HardwareCall::ApplyConfig(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reboots_requested(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, HardwareCall::RequestReboot))
            .count()
    }

    fn record(&self, call: HardwareCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn result(slot: &Mutex<Option<String>>, what: &str) -> Result<(), AgentError> {
        match slot.lock().unwrap().as_ref() {
            Some(message) => Err(mock_failure(what, message)),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl HardwareConfigurator for MockHardwareConfigurator {
    async fn missing_kernel_params(&self) -> Result<bool, AgentError> {
        self.record(HardwareCall::CheckKernelParams);
        Self::result(&self.check_error, "missing_kernel_params")?;
        Ok(self.missing_params.load(Ordering::SeqCst))
    }

    async fn install_kernel_params(&self) -> Result<(), AgentError> {
        self.record(HardwareCall::InstallKernelParams);
        Self::result(&self.install_error, "install_kernel_params")
    }

    async fn request_reboot(&self) -> Result<(), AgentError> {
        self.record(HardwareCall::RequestReboot);
        Self::result(&self.reboot_error, "request_reboot")
    }

    async fn apply_config(&self, spec: &SriovFecNodeConfigSpec) -> Result<(), AgentError> {
        self.record(HardwareCall::ApplyConfig(spec.clone()));
        Self::result(&self.apply_error, "apply_config")
    }
}

/// Mock command runner
///
/// Records every invocation as `program` followed by its arguments and
/// answers with queued outputs, or a successful empty output once the
/// queue is drained.
#[derive(Debug, Clone, Default)]
pub struct MockCommandRunner {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    outputs: Arc<Mutex<VecDeque<CommandOutput>>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the output returned by the next command.
    pub fn push_output(&self, output: CommandOutput) {
        self.outputs.lock().unwrap().push_back(output);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, AgentError> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        self.calls.lock().unwrap().push(call);
        Ok(self.outputs.lock().unwrap().pop_front().unwrap_or_default())
    }
}
