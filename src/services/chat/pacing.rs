//! Timed bot output.
//!
//! The widget's pacing (greeting, typing indicator, closing messages) is a
//! list of frames with offsets from the start of the script. Playback stops as
//! soon as the session's cancellation token fires.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::plan::PlanSummary;

use super::protocol::ServerFrame;
use super::steps::{StepDefinition, STEPS};

pub const GREETING_OFFSETS_MS: [u64; 3] = [500, 2000, 3500];
pub const NEXT_QUESTION_DELAY_MS: u64 = 1500;

#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub at: Duration,
    pub frame: ServerFrame,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    events: Vec<TimedEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Finished,
    Cancelled,
    /// The receiving side went away.
    Disconnected,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, offset_ms: u64, frame: ServerFrame) -> Self {
        self.events.push(TimedEvent {
            at: Duration::from_millis(offset_ms),
            frame,
        });
        self
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn total_duration(&self) -> Duration {
        self.events.iter().map(|e| e.at).max().unwrap_or_default()
    }

    pub async fn play(
        self,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<ServerFrame>,
    ) -> Playback {
        let start = Instant::now();
        for event in self.events {
            tokio::select! {
                _ = cancel.cancelled() => return Playback::Cancelled,
                _ = tokio::time::sleep_until(start + event.at) => {}
            }
            if tx.send(event.frame).await.is_err() {
                return Playback::Disconnected;
            }
        }
        Playback::Finished
    }
}

pub fn greeting_script(selected_plan: Option<&PlanSummary>, trainer_name: &str) -> Script {
    let (first, second) = match selected_plan {
        Some(plan) => (
            format!(
                "Olá! 👋 Vi que você se interessou pelo {}! Que ótima escolha! Vamos personalizar esse plano para você?",
                plan.name
            ),
            "Para criar um plano personalizado, preciso conhecer um pouco sobre você. Vamos começar? 😊"
                .to_string(),
        ),
        None => (
            format!(
                "Olá! 👋 Sou o assistente virtual do {} e estou aqui para te ajudar a encontrar o plano perfeito para seus objetivos!",
                trainer_name
            ),
            "Vou fazer algumas perguntas para entender melhor seus objetivos e recomendar o melhor plano. Vamos começar? 😊"
                .to_string(),
        ),
    };

    Script::new()
        .at(0, ServerFrame::Typing { active: true })
        .at(GREETING_OFFSETS_MS[0], ServerFrame::bot(first))
        .at(GREETING_OFFSETS_MS[1], ServerFrame::bot(second))
        .at(GREETING_OFFSETS_MS[2], ServerFrame::question(0, &STEPS[0]))
        .at(GREETING_OFFSETS_MS[2], ServerFrame::Typing { active: false })
}

pub fn next_question_script(index: usize, step: &StepDefinition) -> Script {
    Script::new()
        .at(0, ServerFrame::Typing { active: true })
        .at(NEXT_QUESTION_DELAY_MS, ServerFrame::question(index, step))
        .at(NEXT_QUESTION_DELAY_MS, ServerFrame::Typing { active: false })
}

pub fn whatsapp_link(number: &str, trainer_name: &str, lead_name: &str, plan: Option<&str>) -> String {
    let text = format!(
        "Olá {}! Acabei de preencher o formulário no seu site. Meu nome é {} e gostaria de saber mais sobre {}.",
        trainer_name,
        lead_name,
        plan.unwrap_or("nossos planos de treino")
    );
    format!("https://wa.me/{}?text={}", number, urlencoding::encode(&text))
}

pub struct ClosingLines<'a> {
    pub plan: Option<&'a PlanSummary>,
    pub plan_was_selected: bool,
    pub trainer_name: &'a str,
    pub whatsapp_url: String,
}

pub fn completion_script(lines: ClosingLines<'_>) -> Script {
    let lead_in = if lines.plan_was_selected {
        "Ótimo! Você escolheu o"
    } else {
        "Baseado no seu perfil, recomendo o"
    };
    let plan_name = lines
        .plan
        .map(|p| p.name.as_str())
        .unwrap_or("nosso melhor plano");

    Script::new()
        .at(
            1000,
            ServerFrame::bot(format!(
                "{} {}! 🎯\n\nEm breve o {} entrará em contato via WhatsApp para conversarmos sobre seu plano personalizado.",
                lead_in, plan_name, lines.trainer_name
            )),
        )
        .at(
            3000,
            ServerFrame::bot("Obrigado por usar nosso assistente! Sua transformação começa agora! 💪"),
        )
        .at(
            6000,
            ServerFrame::Completed {
                plan: lines.plan.cloned(),
                whatsapp_url: lines.whatsapp_url,
            },
        )
}
