use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::middleware::{authenticate, AuthUser};
use crate::error::AppError;
use crate::events::{ChangeAction, RealtimeEvent};
use crate::models::lead::LeadKind;
use crate::services::subscription::{GateMonitor, GateUpdate, SubscriptionGate};
use crate::AppState;

/// Delay between a subscription change event and the re-check, so the
/// billing provider has settled.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminFrame {
    Gate(GateUpdate),
    LeadsChanged {
        kind: Option<LeadKind>,
        action: ChangeAction,
    },
}

pub async fn admin_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let auth_user = match authenticate_ws(&state, query.token.as_deref()) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(error = %e, "Admin WebSocket auth failed");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_admin_socket(socket, state, auth_user))
}

fn authenticate_ws(state: &AppState, token: Option<&str>) -> Result<AuthUser, AppError> {
    let token = token.ok_or(AppError::Unauthorized)?;
    authenticate(token, &state.config)
}

async fn handle_admin_socket(socket: WebSocket, state: AppState, auth_user: AuthUser) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<AdminFrame>(32);
    let cancel = CancellationToken::new();

    tracing::debug!(email = %auth_user.email, "Admin WebSocket connection established");

    let watch = AdminWatch {
        gate: state.gate.clone(),
        email: auth_user.email.clone(),
        company_id: state.leads.company_id(),
        recheck: Duration::from_secs(state.config.subscription_recheck_secs),
    };
    let events = state.events.subscribe();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    let mut watch_task = tokio::spawn(watch.run(events, out_tx, cancel.clone()));

    tokio::select! {
        _ = &mut send_task => {},
        _ = &mut recv_task => {},
        _ = &mut watch_task => {},
    }

    cancel.cancel();
    send_task.abort();
    recv_task.abort();
    watch_task.abort();

    tracing::debug!(email = %auth_user.email, "Admin WebSocket connection closed");
}

/// Keeps one admin's view current: gate re-checks on connect, on a timer and
/// after subscription changes; lead changes for the company are forwarded.
pub(crate) struct AdminWatch {
    pub gate: SubscriptionGate,
    pub email: String,
    pub company_id: Uuid,
    pub recheck: Duration,
}

impl AdminWatch {
    pub(crate) async fn run(
        self,
        mut events: broadcast::Receiver<RealtimeEvent>,
        out: mpsc::Sender<AdminFrame>,
        cancel: CancellationToken,
    ) {
        let mut monitor = GateMonitor::new();
        let mut last_sent: Option<GateUpdate> = None;
        let mut recheck = tokio::time::interval(self.recheck);
        recheck.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let settle = tokio::time::sleep(SETTLE_DELAY);
        tokio::pin!(settle);
        let mut settling = false;

        loop {
            let refresh = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = recheck.tick() => true,
                _ = &mut settle, if settling => {
                    settling = false;
                    true
                }
                event = events.recv() => match event {
                    Ok(RealtimeEvent::LeadsChanged { company_id, kind, action }) => {
                        if company_id == self.company_id
                            && out.send(AdminFrame::LeadsChanged { kind, action }).await.is_err()
                        {
                            break;
                        }
                        false
                    }
                    Ok(RealtimeEvent::SubscriptionChanged { email }) => {
                        if email == self.email {
                            settle.as_mut().reset(tokio::time::Instant::now() + SETTLE_DELAY);
                            settling = true;
                        }
                        false
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Admin WebSocket lagged behind realtime events");
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            if !refresh {
                continue;
            }

            let result = self.gate.refresh(&self.email).await.map(|check| check.view);
            if let Err(e) = &result {
                tracing::error!(email = %self.email, error = %e, "Subscription re-check failed");
            }
            let update = monitor.apply(result);
            if last_sent.as_ref() != Some(&update) {
                if out.send(AdminFrame::Gate(update.clone())).await.is_err() {
                    break;
                }
                last_sent = Some(update);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::events::EventBus;
    use crate::models::subscriber::BillingStatus;
    use crate::services::billing::tests::{status, ScriptedBilling};
    use crate::services::subscription::tests::gate_with;
    use crate::services::subscription::GateView;

    struct Harness {
        billing: Arc<ScriptedBilling>,
        bus: EventBus,
        frames: mpsc::Receiver<AdminFrame>,
        cancel: CancellationToken,
    }

    fn start(results: Vec<Result<crate::models::subscriber::SubscriptionStatus, String>>) -> Harness {
        let billing = Arc::new(ScriptedBilling::new(results));
        let bus = EventBus::new(16);
        let watch = AdminWatch {
            gate: gate_with(billing.clone(), bus.clone()),
            email: "admin@example.com".into(),
            company_id: Uuid::nil(),
            recheck: Duration::from_secs(30),
        };
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        tokio::spawn(watch.run(bus.subscribe(), tx, cancel.clone()));
        Harness {
            billing,
            bus,
            frames: rx,
            cancel,
        }
    }

    fn gate_view(frame: Option<AdminFrame>) -> GateView {
        match frame {
            Some(AdminFrame::Gate(update)) => update.view,
            other => panic!("expected gate frame, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_checked_on_connect() {
        let mut h = start(vec![Ok(status(BillingStatus::Active, None))]);
        assert_eq!(gate_view(h.frames.recv().await), GateView::Entitled);
        assert_eq!(h.billing.calls(), 1);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_recheck_reports_changes_only() {
        let mut h = start(vec![
            Ok(status(BillingStatus::Active, None)),
            Ok(status(BillingStatus::Active, None)),
            Ok(status(BillingStatus::PastDue, Some("https://pay/in_1"))),
        ]);
        assert_eq!(gate_view(h.frames.recv().await), GateView::Entitled);

        // Second check is unchanged and stays silent; the third restricts.
        let view = gate_view(h.frames.recv().await);
        assert!(matches!(view, GateView::Restricted { .. }));
        assert!(h.billing.calls() >= 3);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_check_keeps_last_view() {
        let mut h = start(vec![
            Ok(status(BillingStatus::Active, None)),
            Err("stripe down".into()),
        ]);
        assert_eq!(gate_view(h.frames.recv().await), GateView::Entitled);

        match h.frames.recv().await {
            Some(AdminFrame::Gate(update)) => {
                assert_eq!(update.view, GateView::Entitled);
                assert!(update.error.is_some());
            }
            other => panic!("expected gate frame, got {:?}", other),
        }
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lead_events_forwarded_for_company_only() {
        let mut h = start(vec![Ok(status(BillingStatus::Active, None))]);
        h.frames.recv().await;

        h.bus.publish(RealtimeEvent::LeadsChanged {
            company_id: Uuid::new_v4(),
            kind: Some(LeadKind::Contact),
            action: ChangeAction::Insert,
        });
        h.bus.publish(RealtimeEvent::LeadsChanged {
            company_id: Uuid::nil(),
            kind: Some(LeadKind::Chatbot),
            action: ChangeAction::Insert,
        });

        assert_eq!(
            h.frames.recv().await,
            Some(AdminFrame::LeadsChanged {
                kind: Some(LeadKind::Chatbot),
                action: ChangeAction::Insert,
            })
        );
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_event_triggers_settled_recheck() {
        let mut h = start(vec![
            Ok(status(BillingStatus::Canceled, None)),
            Ok(status(BillingStatus::Active, None)),
        ]);
        assert!(matches!(gate_view(h.frames.recv().await), GateView::Restricted { .. }));

        let before = tokio::time::Instant::now();
        h.bus.publish(RealtimeEvent::SubscriptionChanged {
            email: "admin@example.com".into(),
        });

        assert_eq!(gate_view(h.frames.recv().await), GateView::Entitled);
        let waited = before.elapsed();
        assert!(waited >= SETTLE_DELAY && waited < Duration::from_secs(30));
        h.cancel.cancel();
    }
}
