//! Background task draining the provider's push stream into the dispatcher.

use crate::dispatcher::Dispatcher;
use geofence_model::PermissionState;
use geofence_provider::ProviderEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Controls a running pump.
///
/// Stopping hands the stream receiver back so a later pump can resume
/// from where this one left off.
pub struct PumpHandle {
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<mpsc::Receiver<ProviderEvent>>>,
}

impl PumpHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Cancel the pump and wait for it to finish its current event.
    ///
    /// Returns the receiver unless the task panicked.
    pub async fn stop(mut self) -> Option<mpsc::Receiver<ProviderEvent>> {
        self.cancel.cancel();
        let task = self.task.take()?;
        match task.await {
            Ok(rx) => Some(rx),
            Err(err) => {
                tracing::warn!(error = %err, "Dispatcher pump ended abnormally");
                None
            }
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn the pump on the current tokio runtime.
///
/// Transitions go to `dispatcher`; permission changes are published on
/// `permission`.
pub fn spawn_pump(
    dispatcher: Dispatcher,
    mut events: mpsc::Receiver<ProviderEvent>,
    permission: Arc<watch::Sender<PermissionState>>,
) -> PumpHandle {
    let cancel = CancellationToken::new();
    let running = Arc::new(AtomicBool::new(true));

    let task = {
        let cancel = cancel.child_token();
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            tracing::info!("Dispatcher pump started");

            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!("Dispatcher pump cancelled");
                        break;
                    }
                    event = events.recv() => event,
                };

                let Some(event) = event else {
                    tracing::info!("Provider event stream closed, stopping pump");
                    break;
                };

                match event {
                    ProviderEvent::Transition(raw) => {
                        dispatcher.dispatch_raw(raw);
                    }
                    ProviderEvent::PermissionChanged(state) => {
                        tracing::info!(permission = %state, "Permission changed by host");
                        permission.send_replace(state);
                    }
                }
            }

            running.store(false, Ordering::Release);
            events
        })
    };

    PumpHandle {
        cancel,
        running,
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::new_callback;
    use chrono::Utc;
    use geofence_model::{RawTransition, TransitionType};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_pump_delivers_and_returns_receiver() {
        let dispatcher = Dispatcher::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let delivered = Arc::clone(&delivered);
            dispatcher
                .subscribe(new_callback(move |_| {
                    delivered.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap()
        };

        let (tx, rx) = mpsc::channel(8);
        let (perm_tx, perm_rx) = watch::channel(PermissionState::Undetermined);
        let pump = spawn_pump(dispatcher.clone(), rx, Arc::new(perm_tx));

        tx.send(ProviderEvent::Transition(RawTransition::new(
            TransitionType::Enter,
            vec!["a".into()],
            Utc::now(),
        )))
        .await
        .unwrap();
        tx.send(ProviderEvent::PermissionChanged(PermissionState::Denied))
            .await
            .unwrap();

        wait_until(|| *perm_rx.borrow() == PermissionState::Denied).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert!(pump.is_running());

        let rx = pump.stop().await;
        assert!(rx.is_some());
    }

    #[tokio::test]
    async fn test_pump_stops_when_stream_closes() {
        let (tx, rx) = mpsc::channel(1);
        let (perm_tx, _perm_rx) = watch::channel(PermissionState::Undetermined);
        let pump = spawn_pump(Dispatcher::new(), rx, Arc::new(perm_tx));

        drop(tx);
        wait_until(|| !pump.is_running()).await;
    }
}
