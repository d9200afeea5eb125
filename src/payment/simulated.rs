use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::provider::{
    Authorization, AuthorizeRequest, Capture, CaptureRequest, PaymentProvider, ProviderFailure,
    ProviderKind, ProviderResult, Refund, RefundRequest,
};

/// Provider operation, for scripting and call inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderCall {
    Authorize,
    Capture,
    Refund,
}

#[derive(Default)]
struct Script {
    failures: VecDeque<(ProviderCall, ProviderFailure)>,
    calls: Vec<ProviderCall>,
    delay: Option<Duration>,
}

/// Deterministic in-process provider.
///
/// Succeeds with sequential ids (`sim_txn_1`, `sim_re_1`, ...) unless a
/// failure was scripted for the operation. Clones share the script.
#[derive(Clone, Default)]
pub struct SimulatedProvider {
    script: Arc<Mutex<Script>>,
    sequence: Arc<AtomicU64>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `call` fails with `failure`.
    pub fn fail_next(&self, call: ProviderCall, failure: ProviderFailure) {
        self.script().failures.push_back((call, failure));
    }

    /// Every call sleeps for `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.script().delay = delay;
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.script().calls.clone()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn call(&self, call: ProviderCall) -> ProviderResult<u64> {
        let delay = {
            let mut script = self.script();
            script.calls.push(call);
            if let Some(index) = script.failures.iter().position(|(c, _)| *c == call) {
                if let Some((_, failure)) = script.failures.remove(index) {
                    return Err(failure);
                }
            }
            script.delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl PaymentProvider for SimulatedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Simulated
    }

    fn authorize(&self, request: &AuthorizeRequest) -> ProviderResult<Authorization> {
        if request.amount == 0 {
            return Err(ProviderFailure::declined("amount must be positive"));
        }
        let n = self.call(ProviderCall::Authorize)?;
        Ok(Authorization {
            transaction_id: format!("sim_txn_{n}"),
            metadata: request.metadata.clone(),
        })
    }

    fn capture(&self, request: &CaptureRequest) -> ProviderResult<Capture> {
        self.call(ProviderCall::Capture)?;
        Ok(Capture {
            transaction_id: request.transaction_id.clone(),
        })
    }

    fn refund(&self, _request: &RefundRequest) -> ProviderResult<Refund> {
        let n = self.call(ProviderCall::Refund)?;
        Ok(Refund {
            refund_id: format!("sim_re_{n}"),
        })
    }
}
