use super::controller::{TurnController, TurnStatus};
use crate::session::SessionSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn the turn countdown.
///
/// Recomputes the [`TurnStatus`] on every tick and whenever the mirror
/// changes. Runs until aborted or the session store goes away.
pub fn spawn_countdown(
    controller: Arc<TurnController>,
    mut session_rx: watch::Receiver<Arc<SessionSnapshot>>,
) -> (watch::Receiver<TurnStatus>, JoinHandle<()>) {
    let initial = controller.status_of(&session_rx.borrow());
    let (tx, rx) = watch::channel(initial);
    let period = Duration::from_millis(controller.settings().tick_interval_ms.max(1));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let status = controller.status_of(&session_rx.borrow_and_update());
            tx.send_if_modified(|current| {
                if *current == status {
                    return false;
                }
                *current = status;
                true
            });
        }

        debug!("Turn countdown stopped");
    });

    (rx, handle)
}
