use crate::error::Error;
use flume::{Receiver, Sender};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracker::ControlEvent;

/// Indefinitely listens to signals and sends signal events to the provided channel.
pub async fn wait_for_signal(signal_event: &Sender<SignalEvent>) -> Result<(), Error> {
    let mut sigusr1 = signal(SignalKind::user_defined1()).map_err(Error::SignalHandler)?;
    let mut sigusr2 = signal(SignalKind::user_defined2()).map_err(Error::SignalHandler)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(Error::SignalHandler)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(Error::SignalHandler)?;

    loop {
        tokio::select! {
            _ = sigusr1.recv() => {
                signal_event.send_async(SignalEvent::SigUSR1).await?;
            }
            _ = sigusr2.recv() => {
                signal_event.send_async(SignalEvent::SigUSR2).await?;
            }
            _ = sigint.recv() => {
                signal_event.send_async(SignalEvent::Shutdown).await?;
            }
            _ = sigterm.recv() => {
                signal_event.send_async(SignalEvent::Shutdown).await?;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    SigUSR1,
    SigUSR2,
    /// SIGINT or SIGTERM.
    Shutdown,
}

impl SignalEvent {
    fn control(self) -> Option<ControlEvent> {
        match self {
            Self::SigUSR1 => Some(ControlEvent::DumpState),
            Self::SigUSR2 => Some(ControlEvent::Rerank),
            Self::Shutdown => None,
        }
    }
}

/// Turn signal events into tracker control events until shutdown.
pub async fn forward(
    signal_events: Receiver<SignalEvent>,
    control: UnboundedSender<ControlEvent>,
    cancel: CancellationToken,
) {
    while let Ok(event) = signal_events.recv_async().await {
        debug!(?event, "Received signal event");
        match event.control() {
            Some(event) => {
                if control.send(event).is_err() {
                    break;
                }
            }
            None => {
                info!("shutdown signal received");
                cancel.cancel();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn forwards_until_shutdown() {
        let (signal_tx, signal_rx) = flume::bounded(8);
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        for event in [SignalEvent::SigUSR2, SignalEvent::SigUSR1, SignalEvent::Shutdown] {
            signal_tx.send_async(event).await.unwrap();
        }
        forward(signal_rx, control_tx, cancel.clone()).await;

        assert!(cancel.is_cancelled());
        assert_eq!(control_rx.recv().await, Some(ControlEvent::Rerank));
        assert_eq!(control_rx.recv().await, Some(ControlEvent::DumpState));
        assert_eq!(control_rx.recv().await, None);
    }
}
