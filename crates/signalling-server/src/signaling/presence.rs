//! Presence session: a pull-on switch for the caller's online state.
//!
//! Opening the session marks the caller online and publishes the status
//! change; every exit path marks them offline and publishes the inverse.
//! A session walks `Arming → Active → Draining → Closed`:
//!
//! - Arming → Active once the initial online publish completes
//! - Active → Draining on context cancellation, watchdog expiry or a
//!   failed send to the caller
//! - Draining → Closed once the offline flag and publish complete
//!
//! While draining, no further status changes of other users are forwarded.
//! The heartbeat watchdog runs on a dedicated task for the session's
//! lifetime; each received heartbeat re-arms it, and expiry tears the
//! session down as if the context were cancelled.

use crate::errors::ApiError;
use crate::events::OnlineStatus;
use crate::signaling::SignalingApi;
use proto_gen::signalling as proto;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle states of one presence session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Arming,
    Active,
    Draining,
    Closed,
}

/// One live presence session for one caller.
pub struct PresenceSession<'a> {
    api: &'a SignalingApi,
    user_id: String,
    heartbeat_ttl: Duration,
    state: PresenceState,
}

impl<'a> PresenceSession<'a> {
    pub(crate) fn new(api: &'a SignalingApi, user_id: String, heartbeat_ttl: Duration) -> Self {
        Self {
            api,
            user_id,
            heartbeat_ttl,
            state: PresenceState::Arming,
        }
    }

    fn transition(&mut self, next: PresenceState) {
        tracing::debug!(
            target: "signalling.presence",
            user_id = %self.user_id,
            from = ?self.state,
            to = ?next,
            "Presence state transition"
        );
        self.state = next;
    }

    /// Drive the session to completion.
    ///
    /// The offline flag update and publish are guaranteed on every exit
    /// path after arming succeeded, including watchdog expiry, client
    /// disconnect and send failure.
    pub async fn run(
        mut self,
        heartbeats: mpsc::Receiver<proto::Heartbeat>,
        mut statuses: mpsc::Receiver<OnlineStatus>,
        out: mpsc::Sender<proto::OnlineStatus>,
        cancel: CancellationToken,
    ) -> Result<(), ApiError> {
        // Arming: flag on, status published
        self.api.set_user_online(&self.user_id, true).await?;
        self.transition(PresenceState::Active);

        // Watchdog on its own task; expiry or inbound stream end fires
        // `stalled`, which the forward loop treats like cancellation
        let stalled = CancellationToken::new();
        let watchdog = tokio::spawn(heartbeat_watchdog(
            heartbeats,
            self.heartbeat_ttl,
            stalled.clone(),
        ));

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = stalled.cancelled() => break,
                () = out.closed() => break,
                status = statuses.recv() => {
                    let Some(status) = status else { break };
                    if status.id == self.user_id {
                        continue;
                    }
                    let wire = proto::OnlineStatus {
                        id: status.id,
                        online: status.online,
                    };
                    if out.send(wire).await.is_err() {
                        break;
                    }
                }
            }
        }

        // Draining: stop forwarding, pull the flag back off
        self.transition(PresenceState::Draining);
        watchdog.abort();
        let result = self.api.set_user_online(&self.user_id, false).await;
        self.transition(PresenceState::Closed);
        result
    }
}

/// Watch the heartbeat stream; fire `stalled` when the window elapses
/// without a beat or the inbound stream ends.
async fn heartbeat_watchdog(
    mut heartbeats: mpsc::Receiver<proto::Heartbeat>,
    ttl: Duration,
    stalled: CancellationToken,
) {
    loop {
        match tokio::time::timeout(ttl, heartbeats.recv()).await {
            // Beat received: the window re-arms on the next iteration
            Ok(Some(_)) => {}
            // Inbound stream closed (client disconnect) or window elapsed
            Ok(None) | Err(_) => {
                stalled.cancel();
                return;
            }
        }
    }
}
