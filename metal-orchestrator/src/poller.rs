use std::future::Future;
use std::time::Duration;

use metal_common::ProviderInstance;
use metal_providers::device::{Device, DeviceState};
use metal_providers::ComputeClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, Result};
use crate::tags;

/// Roughly 20 minutes. Might be longer if API calls take longer.
pub const DEFAULT_ATTEMPTS: u32 = 240;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

/// The provider may hold a device in `provisioning` until user-data finishes
/// running, so a nearly complete device is accepted as usable.
pub const EARLY_READY_PERCENTAGE: f32 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

/// Outcome of one polling attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Ready(T),
    Retry(String),
    Fatal(ReconcileError),
}

/// Run `f` until it is ready, fatal, or the attempt budget is spent. Sleeps
/// between attempts race `cancel`.
pub async fn retry_bounded<T, F, Fut>(
    policy: PollPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        match f(attempt).await {
            Attempt::Ready(v) => return Ok(v),
            Attempt::Fatal(e) => {
                warn!(attempt, error = %e, "{} aborted", label);
                return Err(e);
            }
            Attempt::Retry(msg) => {
                debug!(attempt, max_attempts = attempts, reason = %msg, "{} not ready", label);
                last_error = msg;
            }
        }
        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ReconcileError::Cancelled),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }

    Err(ReconcileError::PollExhausted {
        attempts,
        last_error,
    })
}

/// Decide what one observation of a device being awaited means.
pub fn classify_device(device: &Device) -> Attempt<ProviderInstance> {
    let fatal = |msg: &str| Attempt::Fatal(ReconcileError::PollFatal(msg.to_string()));
    let convert = || match tags::to_provider_instance(device) {
        Ok(inst) => Attempt::Ready(inst),
        Err(e) => Attempt::Fatal(e.context("failed to convert device")),
    };

    match device.state {
        Some(DeviceState::Failed) => return fatal("device failed"),
        Some(DeviceState::Deleted) => return fatal("device deleted"),
        Some(DeviceState::PoweringOff) | Some(DeviceState::Inactive) => {
            return fatal("invalid state change")
        }
        Some(DeviceState::Active) => return convert(),
        _ => {}
    }

    if device.provisioning_percentage.unwrap_or(0.0) >= EARLY_READY_PERCENTAGE {
        return convert();
    }
    Attempt::Retry("instance not active yet".to_string())
}

/// Block until `device_id` becomes usable.
pub async fn wait_device_active(
    client: &dyn ComputeClient,
    device_id: &str,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<ProviderInstance> {
    info!(device_id, "waiting for device to become active");
    let res = retry_bounded(policy, cancel, "device activation", |_| async move {
        match client.find_device_by_id(device_id).await {
            Err(e) => Attempt::Retry(format!("failed to find device: {}", e)),
            Ok(None) => Attempt::Retry("device not found".to_string()),
            Ok(Some(device)) => classify_device(&device),
        }
    })
    .await;

    match res {
        Ok(inst) => {
            info!(device_id, status = %inst.status, "device is usable");
            Ok(inst)
        }
        Err(e) => Err(e.context("failed to wait for instance to become active")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> PollPolicy {
        PollPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    fn device(state: Option<DeviceState>, pct: Option<f32>) -> Device {
        Device {
            id: "dev-1".to_string(),
            tags: vec!["Name=runner".to_string()],
            state,
            provisioning_percentage: pct,
            ..Default::default()
        }
    }

    #[test]
    fn terminal_states_are_fatal_with_distinct_messages() {
        let cases = [
            (DeviceState::Failed, "device failed"),
            (DeviceState::Deleted, "device deleted"),
            (DeviceState::PoweringOff, "invalid state change"),
            (DeviceState::Inactive, "invalid state change"),
        ];
        for (state, msg) in cases {
            match classify_device(&device(Some(state), Some(100.0))) {
                Attempt::Fatal(e) => assert_eq!(e.to_string(), msg),
                other => panic!("{:?} gave {:?}", state, other),
            }
        }
    }

    #[test]
    fn early_exit_on_provisioning_percentage() {
        assert!(matches!(
            classify_device(&device(Some(DeviceState::Provisioning), Some(90.0))),
            Attempt::Ready(_)
        ));
        assert!(matches!(
            classify_device(&device(Some(DeviceState::Provisioning), Some(89.9))),
            Attempt::Retry(_)
        ));
        assert!(matches!(
            classify_device(&device(Some(DeviceState::Queued), None)),
            Attempt::Retry(_)
        ));
    }

    #[test]
    fn active_device_without_name_is_fatal() {
        let mut dev = device(Some(DeviceState::Active), None);
        dev.tags.clear();
        match classify_device(&dev) {
            Attempt::Fatal(e) => {
                assert!(e.is_validation());
                assert!(e.to_string().contains("missing Name property"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn retry_stops_at_attempt_budget() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let res: Result<()> = retry_bounded(fast(7), &cancel, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Retry("not yet".to_string()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 7);
        match res.unwrap_err() {
            ReconcileError::PollExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 7);
                assert_eq!(last_error, "not yet");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn fatal_stops_immediately() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let res: Result<()> = retry_bounded(fast(240), &cancel, "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 3 {
                    Attempt::Fatal(ReconcileError::PollFatal("boom".to_string()))
                } else {
                    Attempt::Retry("not yet".to_string())
                }
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(res.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let cancel = CancellationToken::new();
        let policy = PollPolicy {
            attempts: 240,
            delay: Duration::from_secs(3600),
        };
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let res: Result<()> =
            retry_bounded(policy, &cancel, "test", |_| async {
                Attempt::Retry("not yet".to_string())
            })
            .await;
        assert!(res.unwrap_err().is_cancelled());
    }

    #[test]
    fn default_policy_is_twenty_minutes() {
        let p = PollPolicy::default();
        assert_eq!(p.attempts, 240);
        assert_eq!(p.delay * p.attempts, Duration::from_secs(1200));
    }
}
