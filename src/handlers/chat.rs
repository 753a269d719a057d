//! `/ws/chat`: one socket per chatbot widget.
//!
//! The socket task owns the conversation. Bot output is played from timed
//! scripts on a child of the connection's cancellation token, so closing the
//! widget or dropping the socket stops anything still scheduled.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::rate_limit::Purpose;
use crate::error::AppError;
use crate::models::company::CompanyContact;
use crate::models::plan::PlanSummary;
use crate::services::chat::format::format_input;
use crate::services::chat::pacing::{
    completion_script, greeting_script, next_question_script, whatsapp_link, ClosingLines,
    Playback, Script,
};
use crate::services::chat::protocol::{ClientFrame, ServerFrame};
use crate::services::chat::{
    recommend_plan, Advance, CompletedConversation, ConversationSession, SessionError,
};
use crate::services::leads::LeadPipeline;
use crate::AppState;

const FRAME_BUFFER: usize = 32;

pub async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let client = addr.ip().to_string();
    ws.on_upgrade(move |socket| handle_chat_socket(socket, state, client))
}

async fn handle_chat_socket(socket: WebSocket, state: AppState, client: String) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(FRAME_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<Input>(FRAME_BUFFER);
    let connection = CancellationToken::new();

    tracing::debug!(client = %client, "Chat connection established");

    let driver = ChatDriver::new(
        state.leads.clone(),
        state.config.whatsapp_number.clone(),
        client.clone(),
        connection.clone(),
        out_tx,
        in_tx.clone(),
    );
    let idle = Duration::from_secs(state.config.chat_session_idle_secs);

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode chat frame");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        if in_tx.send(Input::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "Unreadable chat frame ignored"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let mut driver_task = tokio::spawn(driver.run(in_rx, idle));

    tokio::select! {
        _ = &mut send_task => {},
        _ = &mut recv_task => {},
        _ = &mut driver_task => {},
    }

    connection.cancel();
    send_task.abort();
    recv_task.abort();
    driver_task.abort();

    tracing::debug!(client = %client, "Chat connection closed");
}

#[derive(Debug)]
pub(crate) enum Input {
    Frame(ClientFrame),
    /// The greeting opened by `open` number `generation` played to the end.
    GreetingPlayed { generation: u64 },
}

pub(crate) struct ChatDriver {
    pipeline: LeadPipeline,
    whatsapp_number: String,
    client: String,
    session: ConversationSession,
    trainer_name: String,
    generation: u64,
    connection: CancellationToken,
    script: CancellationToken,
    out: mpsc::Sender<ServerFrame>,
    inputs: mpsc::Sender<Input>,
}

impl ChatDriver {
    pub(crate) fn new(
        pipeline: LeadPipeline,
        whatsapp_number: String,
        client: String,
        connection: CancellationToken,
        out: mpsc::Sender<ServerFrame>,
        inputs: mpsc::Sender<Input>,
    ) -> Self {
        let script = connection.child_token();
        Self {
            pipeline,
            whatsapp_number,
            client,
            session: ConversationSession::new(),
            trainer_name: CompanyContact::default().trainer_name().to_string(),
            generation: 0,
            connection,
            script,
            out,
            inputs,
        }
    }

    /// Process input until the connection is cancelled or stays idle for `idle`.
    pub(crate) async fn run(mut self, mut inputs: mpsc::Receiver<Input>, idle: Duration) {
        loop {
            let input = tokio::select! {
                _ = self.connection.cancelled() => break,
                _ = tokio::time::sleep(idle) => {
                    tracing::debug!(client = %self.client, "Chat session idle, closing");
                    break;
                }
                input = inputs.recv() => input,
            };

            match input {
                Some(Input::Frame(frame)) => self.handle(frame).await,
                Some(Input::GreetingPlayed { generation }) => {
                    if generation == self.generation {
                        self.session.greeting_finished();
                    }
                }
                None => break,
            }
        }
        self.connection.cancel();
    }

    async fn send(&self, frame: ServerFrame) {
        if self.out.send(frame).await.is_err() {
            tracing::debug!(client = %self.client, "Chat frame dropped, socket gone");
        }
    }

    fn stop_script(&mut self) {
        self.script.cancel();
        self.script = self.connection.child_token();
    }

    /// Replace whatever is playing with `script`. `then` is fed back as input
    /// when the script plays to the end.
    fn play(&mut self, script: Script, then: Option<Input>) {
        self.stop_script();
        tracing::trace!(
            client = %self.client,
            events = script.events().len(),
            duration_ms = script.total_duration().as_millis() as u64,
            "Playing chat script"
        );
        let token = self.script.clone();
        let out = self.out.clone();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            if script.play(&token, &out).await == Playback::Finished {
                if let Some(input) = then {
                    let _ = inputs.send(input).await;
                }
            }
        });
    }

    async fn handle(&mut self, frame: ClientFrame) {
        match frame {
            ClientFrame::Open { plan_id } => self.open(plan_id).await,
            ClientFrame::Answer { value } => self.answer(&value).await,
            ClientFrame::Close => {
                self.stop_script();
                self.generation += 1;
                tracing::debug!(
                    client = %self.client,
                    answered = self.session.answers().answered(),
                    "Chat session closed by widget"
                );
                self.session.close();
            }
        }
    }

    async fn open(&mut self, plan_id: Option<Uuid>) {
        if let Err(AppError::RateLimited { retry_after_secs }) = self
            .pipeline
            .ensure_cooldown_elapsed(Purpose::Chatbot, &self.client)
            .await
        {
            self.stop_script();
            self.generation += 1;
            self.session.close();
            self.send(ServerFrame::RateLimited {
                remaining_secs: retry_after_secs,
            })
            .await;
            return;
        }

        let store = self.pipeline.store();
        let company_id = self.pipeline.company_id();

        let plan = match plan_id {
            Some(id) => match store.plan(company_id, id).await {
                Ok(plan) => plan.filter(|p| p.active).map(|p| PlanSummary::from(&p)),
                Err(e) => {
                    tracing::error!(error = %e, plan_id = %id, "Failed to load selected plan");
                    None
                }
            },
            None => None,
        };

        match store.company_contact(company_id).await {
            Ok(contact) => self.trainer_name = contact.trainer_name().to_string(),
            Err(e) => tracing::error!(error = %e, "Failed to load trainer name"),
        }

        self.generation += 1;
        self.session.open(plan.clone());
        tracing::debug!(
            client = %self.client,
            plan = ?self.session.selected_plan().map(|p| p.id),
            "Chat session opened"
        );

        let greeting = greeting_script(plan.as_ref(), &self.trainer_name);
        let generation = self.generation;
        self.play(greeting, Some(Input::GreetingPlayed { generation }));
    }

    async fn answer(&mut self, raw: &str) {
        let Some(step) = self.session.current_step() else {
            self.send(ServerFrame::Error {
                message: "Abra o chat para começar.".into(),
            })
            .await;
            return;
        };
        let field = step.field;

        match self.session.submit(raw) {
            Err(SessionError::Invalid(invalid)) => {
                tracing::debug!(field = invalid.field.as_str(), "Chat answer rejected");
                self.send(ServerFrame::Invalid {
                    field: invalid.field,
                    message: invalid.message.to_string(),
                })
                .await;
            }
            Err(SessionError::NotAccepting) => {
                tracing::debug!(state = ?self.session.state(), "Chat answer outside a conversation");
                self.send(ServerFrame::Error {
                    message: "Abra o chat para começar.".into(),
                })
                .await;
            }
            Ok(advance) => {
                self.send(ServerFrame::Accepted {
                    field,
                    value: format_input(field, raw),
                })
                .await;

                match advance {
                    Advance::Next(next) => {
                        let index = self.session.current_step_index();
                        self.play(next_question_script(index, next), None);
                    }
                    Advance::Complete(done) => self.finish(done).await,
                }
            }
        }
    }

    async fn recommend(&self, done: &CompletedConversation) -> Option<PlanSummary> {
        if done.selected_plan.is_some() {
            return None;
        }
        match self
            .pipeline
            .store()
            .active_plans(self.pipeline.company_id())
            .await
        {
            Ok(plans) => recommend_plan(done.answers.budget, &plans).map(PlanSummary::from),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load plans for recommendation");
                None
            }
        }
    }

    async fn finish(&mut self, done: CompletedConversation) {
        self.stop_script();
        self.send(ServerFrame::Saving).await;

        let recommended = self.recommend(&done).await;

        match self
            .pipeline
            .submit_chatbot(&self.client, &done, recommended.as_ref())
            .await
        {
            Ok(receipt) => {
                tracing::info!(lead_id = %receipt.lead_id, email_sent = receipt.email_sent, "Chatbot conversation saved");
            }
            Err(AppError::RateLimited { retry_after_secs }) => {
                self.send(ServerFrame::RateLimited {
                    remaining_secs: retry_after_secs,
                })
                .await;
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, client = %self.client, "Failed to save chatbot lead");
                self.send(ServerFrame::Error {
                    message: "Não foi possível salvar suas respostas. Tente novamente em instantes."
                        .into(),
                })
                .await;
                return;
            }
        }

        let plan = done.selected_plan.as_ref().or(recommended.as_ref());
        let whatsapp_url = whatsapp_link(
            &self.whatsapp_number,
            &self.trainer_name,
            &done.answers.name,
            plan.map(|p| p.name.as_str()),
        );
        let closing = completion_script(ClosingLines {
            plan,
            plan_was_selected: done.selected_plan.is_some(),
            trainer_name: &self.trainer_name,
            whatsapp_url,
        });
        self.play(closing, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;

    use crate::auth::rate_limit::RateLimitState;
    use crate::config::test_config;
    use crate::events::EventBus;
    use crate::models::plan::ServicePlan;
    use crate::services::chat::session::tests::SCRIPTED_ANSWERS;
    use crate::services::leads::store::tests::MemoryLeadStore;
    use crate::services::leads::PipelineSettings;
    use crate::services::mailer::tests::RecordingMailer;

    const IDLE: Duration = Duration::from_secs(600);

    struct Harness {
        store: Arc<MemoryLeadStore>,
        inputs: mpsc::Sender<Input>,
        frames: mpsc::Receiver<ServerFrame>,
        connection: CancellationToken,
    }

    fn plan(name: &str, price: f64, highlight: bool) -> ServicePlan {
        ServicePlan {
            id: Uuid::new_v4(),
            company_id: test_config().company_id,
            name: name.into(),
            description: None,
            price,
            features: serde_json::json!([]),
            highlight,
            active: true,
            order_index: 0,
            created_at: Utc::now(),
        }
    }

    fn start(store: MemoryLeadStore, limiter: RateLimitState) -> Harness {
        let store = Arc::new(store);
        let pipeline = LeadPipeline::new(
            store.clone(),
            Arc::new(RecordingMailer::default()),
            limiter,
            EventBus::new(16),
            PipelineSettings::from_config(&test_config()),
        );
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        let connection = CancellationToken::new();
        let driver = ChatDriver::new(
            pipeline,
            "5511999990000".into(),
            "10.0.0.9".into(),
            connection.clone(),
            out_tx,
            in_tx.clone(),
        );
        tokio::spawn(driver.run(in_rx, IDLE));
        Harness {
            store,
            inputs: in_tx,
            frames: out_rx,
            connection,
        }
    }

    impl Harness {
        async fn send(&self, frame: ClientFrame) {
            self.inputs.send(Input::Frame(frame)).await.unwrap();
        }

        async fn answer(&self, value: &str) {
            self.send(ClientFrame::Answer {
                value: value.into(),
            })
            .await;
        }

        /// Frames up to and including the first one matching `done`.
        async fn until(&mut self, done: impl Fn(&ServerFrame) -> bool) -> Vec<ServerFrame> {
            let mut seen = Vec::new();
            while let Some(frame) = self.frames.recv().await {
                let stop = done(&frame);
                seen.push(frame);
                if stop {
                    return seen;
                }
            }
            panic!("frame stream ended early: {:?}", seen);
        }

        async fn open(&mut self) {
            self.send(ClientFrame::Open { plan_id: None }).await;
            self.until(|f| matches!(f, ServerFrame::Question { index: 0, .. }))
                .await;
        }

        async fn run_conversation(&mut self) -> Vec<ServerFrame> {
            self.open().await;
            self.answer_all().await
        }

        async fn answer_all(&mut self) -> Vec<ServerFrame> {
            let last = SCRIPTED_ANSWERS.len() - 1;
            for (i, value) in SCRIPTED_ANSWERS.iter().enumerate() {
                self.answer(value).await;
                if i < last {
                    let next = i + 1;
                    self.until(move |f| matches!(f, ServerFrame::Question { index, .. } if *index == next))
                        .await;
                }
            }
            self.until(|f| {
                matches!(
                    f,
                    ServerFrame::Completed { .. } | ServerFrame::RateLimited { .. } | ServerFrame::Error { .. }
                )
            })
            .await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_conversation_saves_lead_and_links_whatsapp() {
        let mut store = MemoryLeadStore::with_contact_email("trainer@example.com");
        store.plans = vec![plan("Básico", 150.0, false), plan("Prata", 299.9, true)];
        let mut h = start(store, RateLimitState::new());

        let frames = h.run_conversation().await;

        assert!(frames.contains(&ServerFrame::Saving));
        match frames.last() {
            Some(ServerFrame::Completed { plan, whatsapp_url }) => {
                assert_eq!(plan.as_ref().map(|p| p.name.as_str()), Some("Prata"));
                assert!(whatsapp_url.starts_with("https://wa.me/5511999990000?text="));
                assert!(whatsapp_url.contains("Marina"));
            }
            other => panic!("expected completion, got {:?}", other),
        }

        let rows = h.store.chatbot_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name.as_deref(), Some("Carlos Lima"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_answer_keeps_step() {
        let mut h = start(MemoryLeadStore::default(), RateLimitState::new());
        h.send(ClientFrame::Open { plan_id: None }).await;
        h.until(|f| matches!(f, ServerFrame::Question { index: 0, .. }))
            .await;

        h.answer("Carlos Lima").await;
        h.until(|f| matches!(f, ServerFrame::Question { index: 1, .. }))
            .await;

        h.answer("abc").await;
        let frames = h.until(|f| matches!(f, ServerFrame::Invalid { .. })).await;
        assert!(!frames.iter().any(|f| matches!(f, ServerFrame::Accepted { .. })));

        h.answer("32").await;
        let frames = h.until(|f| matches!(f, ServerFrame::Question { .. })).await;
        assert!(matches!(frames.last(), Some(ServerFrame::Question { index: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_within_cooldown_shows_countdown() {
        let mut h = start(MemoryLeadStore::default(), RateLimitState::new());

        let first = h.run_conversation().await;
        assert!(matches!(first.last(), Some(ServerFrame::Completed { .. })));
        tokio::time::sleep(Duration::from_secs(10)).await;
        while h.frames.try_recv().is_ok() {}

        h.send(ClientFrame::Open { plan_id: None }).await;
        let frames = h
            .until(|f| matches!(f, ServerFrame::RateLimited { .. }))
            .await;
        assert_eq!(frames.len(), 1);
        match frames[0] {
            ServerFrame::RateLimited { remaining_secs } => {
                assert!(remaining_secs > 0 && remaining_secs <= 300);
            }
            ref other => panic!("expected rate limit, got {:?}", other),
        }

        // No greeting or question follows, and answers are refused.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let mut seen = Vec::new();
        while let Ok(frame) = h.frames.try_recv() {
            seen.push(frame);
        }
        assert!(seen.is_empty(), "unexpected frames: {:?}", seen);

        h.answer("Carlos Lima").await;
        let frames = h.until(|f| matches!(f, ServerFrame::Error { .. })).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(h.store.chatbot_rows().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_rechecks_cooldown_shared_across_sockets() {
        let limiter = RateLimitState::new();
        let mut first = start(MemoryLeadStore::default(), limiter.clone());
        let mut second = start(MemoryLeadStore::default(), limiter);

        // Both open before either finishes.
        second.open().await;
        let done = first.run_conversation().await;
        assert!(matches!(done.last(), Some(ServerFrame::Completed { .. })));

        let late = second.answer_all().await;
        assert!(matches!(late.last(), Some(ServerFrame::RateLimited { .. })));
        assert!(second.store.chatbot_rows().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_pending_greeting() {
        let mut h = start(MemoryLeadStore::default(), RateLimitState::new());
        h.send(ClientFrame::Open { plan_id: None }).await;
        h.send(ClientFrame::Close).await;

        tokio::time::sleep(Duration::from_secs(10)).await;

        let mut seen = Vec::new();
        while let Ok(frame) = h.frames.try_recv() {
            seen.push(frame);
        }
        assert!(!seen.iter().any(|f| matches!(f, ServerFrame::Question { .. })));

        h.answer("Carlos Lima").await;
        let frames = h.until(|f| matches!(f, ServerFrame::Error { .. })).await;
        assert_eq!(frames.len(), 1);
        h.connection.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_selected_plan_is_announced() {
        let chosen = plan("Ouro", 450.0, false);
        let chosen_id = chosen.id;
        let mut store = MemoryLeadStore::default();
        store.plans = vec![chosen];
        let mut h = start(store, RateLimitState::new());

        h.send(ClientFrame::Open {
            plan_id: Some(chosen_id),
        })
        .await;
        let frames = h
            .until(|f| matches!(f, ServerFrame::Question { index: 0, .. }))
            .await;

        let greeting = frames.iter().find_map(|f| match f {
            ServerFrame::Bot { content } => Some(content.clone()),
            _ => None,
        });
        assert!(greeting.unwrap().contains("Ouro"));
    }
}
