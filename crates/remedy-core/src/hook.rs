//! Global fault hook
//!
//! Routes otherwise-unhandled panics into the healing pipeline. Only one
//! hook is active at a time: installing a second replaces the first, and
//! uninstalling restores whatever hook was in place before installation.
//!
//! The panic hook itself cannot await, so it forwards a [`TaskFault`]
//! over a channel drained by a background task that runs the pipeline.
//! Install must therefore be called from within a runtime.

use crate::orchestrator::Orchestrator;
use crate::types::{FaultKind, TaskFault};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::panic::PanicHookInfo;
use std::sync::Arc;
use tokio::sync::mpsc;

type PanicHookFn = dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static;

struct HookState {
    prior: Arc<PanicHookFn>,
    _tx: mpsc::UnboundedSender<TaskFault>,
}

static STATE: Lazy<Mutex<Option<HookState>>> = Lazy::new(|| Mutex::new(None));

/// Install the process-wide fault hook. Replaces any hook installed by a
/// previous call, keeping the pre-installation hook for restore.
pub fn install_fault_hook(orchestrator: Arc<Orchestrator>) {
    uninstall_fault_hook();

    let (tx, mut rx) = mpsc::unbounded_channel::<TaskFault>();
    tokio::spawn(async move {
        while let Some(fault) = rx.recv().await {
            if let Err(e) = orchestrator.heal_fault(&fault, None).await {
                tracing::error!(error = %e, "fault hook healing aborted");
            }
        }
    });

    let prior: Arc<PanicHookFn> = Arc::from(std::panic::take_hook());
    let prior_in_hook = prior.clone();
    let tx_in_hook = tx.clone();
    std::panic::set_hook(Box::new(move |info| {
        let _ = tx_in_hook.send(fault_from_panic(info));
        prior_in_hook(info);
    }));

    *STATE.lock() = Some(HookState { prior, _tx: tx });
    tracing::info!("global fault hook installed");
}

/// Remove the fault hook and restore the hook that preceded it.
/// A no-op when no hook is installed.
pub fn uninstall_fault_hook() {
    if let Some(state) = STATE.lock().take() {
        let _ = std::panic::take_hook();
        let prior = state.prior;
        std::panic::set_hook(Box::new(move |info| prior(info)));
        tracing::info!("global fault hook removed");
    }
}

/// Whether the fault hook is currently installed.
#[must_use]
pub fn fault_hook_installed() -> bool {
    STATE.lock().is_some()
}

fn fault_from_panic(info: &PanicHookInfo<'_>) -> TaskFault {
    let payload = info.payload();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".to_string());
    let located = match info.location() {
        Some(loc) => format!("{message} (at {}:{})", loc.file(), loc.line()),
        None => message,
    };
    TaskFault::new(FaultKind::Other, located)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealingConfig;

    #[tokio::test]
    async fn install_is_replace_and_uninstall_restores() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HealingConfig::default();
        config.logging.directory = dir.path().to_path_buf();
        config.logging.to_console = false;
        let orchestrator = Arc::new(Orchestrator::new(config).await.unwrap());

        assert!(!fault_hook_installed());
        install_fault_hook(orchestrator.clone());
        assert!(fault_hook_installed());

        // Second install replaces, never stacks.
        install_fault_hook(orchestrator);
        assert!(fault_hook_installed());

        uninstall_fault_hook();
        assert!(!fault_hook_installed());
        // Second uninstall is a no-op.
        uninstall_fault_hook();
        assert!(!fault_hook_installed());
    }
}
