//! One chatbot conversation, from greeting to completion.
//!
//! A session lives only as long as the widget that opened it. Nothing here is
//! persisted; re-opening always starts a fresh session at step 0.

use serde::Serialize;

use crate::models::plan::PlanSummary;

use super::format::{parse_answer, Answer, InvalidAnswer};
use super::steps::{BudgetBracket, StepDefinition, STEPS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Greeting,
    AwaitingAnswer(usize),
    Completed,
}

/// Answers collected so far, one slot per step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadAnswers {
    pub name: Option<String>,
    pub age: Option<u8>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub goal: Option<String>,
    pub experience: Option<String>,
    pub preference: Option<String>,
    pub time: Option<String>,
    pub budget: Option<BudgetBracket>,
    pub whatsapp: Option<String>,
    pub email: Option<String>,
}

impl LeadAnswers {
    fn record(&mut self, answer: Answer) {
        match answer {
            Answer::Name(v) => self.name = Some(v),
            Answer::Age(v) => self.age = Some(v),
            Answer::Height(v) => self.height = Some(v),
            Answer::Weight(v) => self.weight = Some(v),
            Answer::Goal(v) => self.goal = Some(v),
            Answer::Experience(v) => self.experience = Some(v),
            Answer::Preference(v) => self.preference = Some(v),
            Answer::Time(v) => self.time = Some(v),
            Answer::Budget(v) => self.budget = Some(v),
            Answer::Whatsapp(v) => self.whatsapp = Some(v),
            Answer::Email(v) => self.email = Some(v),
        }
    }

    pub fn answered(&self) -> usize {
        [
            self.name.is_some(),
            self.age.is_some(),
            self.height.is_some(),
            self.weight.is_some(),
            self.goal.is_some(),
            self.experience.is_some(),
            self.preference.is_some(),
            self.time.is_some(),
            self.budget.is_some(),
            self.whatsapp.is_some(),
            self.email.is_some(),
        ]
        .iter()
        .filter(|a| **a)
        .count()
    }

    fn finish(&self) -> Option<CompletedAnswers> {
        Some(CompletedAnswers {
            name: self.name.clone()?,
            age: self.age?,
            height: self.height?,
            weight: self.weight?,
            goal: self.goal.clone()?,
            experience: self.experience.clone()?,
            preference: self.preference.clone()?,
            time: self.time.clone()?,
            budget: self.budget?,
            whatsapp: self.whatsapp.clone()?,
            email: self.email.clone()?,
        })
    }
}

/// Every step answered.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedAnswers {
    pub name: String,
    pub age: u8,
    pub height: f64,
    pub weight: f64,
    pub goal: String,
    pub experience: String,
    pub preference: String,
    pub time: String,
    pub budget: BudgetBracket,
    pub whatsapp: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedConversation {
    pub answers: CompletedAnswers,
    pub selected_plan: Option<PlanSummary>,
    pub total_steps: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Next(&'static StepDefinition),
    Complete(CompletedConversation),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Invalid(#[from] InvalidAnswer),
    #[error("conversation is not accepting answers")]
    NotAccepting,
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    state: SessionState,
    answers: LeadAnswers,
    selected_plan: Option<PlanSummary>,
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            answers: LeadAnswers::default(),
            selected_plan: None,
        }
    }

    /// Open (or re-open) the widget. Prior state is discarded unconditionally.
    pub fn open(&mut self, selected_plan: Option<PlanSummary>) {
        self.answers = LeadAnswers::default();
        self.selected_plan = selected_plan;
        self.state = SessionState::Greeting;
    }

    pub fn close(&mut self) {
        self.answers = LeadAnswers::default();
        self.selected_plan = None;
        self.state = SessionState::Idle;
    }

    /// The greeting script finished playing.
    pub fn greeting_finished(&mut self) {
        if self.state == SessionState::Greeting {
            self.state = SessionState::AwaitingAnswer(0);
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn answers(&self) -> &LeadAnswers {
        &self.answers
    }

    pub fn selected_plan(&self) -> Option<&PlanSummary> {
        self.selected_plan.as_ref()
    }

    /// Index of the step awaiting an answer. The first question is already
    /// on screen while the greeting plays, so `Greeting` counts as step 0.
    pub fn current_step_index(&self) -> usize {
        match self.state {
            SessionState::Idle | SessionState::Greeting => 0,
            SessionState::AwaitingAnswer(i) => i,
            SessionState::Completed => STEPS.len(),
        }
    }

    pub fn current_step(&self) -> Option<&'static StepDefinition> {
        match self.state {
            SessionState::Greeting => STEPS.first(),
            SessionState::AwaitingAnswer(i) => STEPS.get(i),
            _ => None,
        }
    }

    /// Validate `raw` for the current step and advance. Invalid input leaves
    /// the session where it was.
    pub fn submit(&mut self, raw: &str) -> Result<Advance, SessionError> {
        let step = self.current_step().ok_or(SessionError::NotAccepting)?;
        let index = self.current_step_index();

        let answer = parse_answer(step, raw)?;
        self.answers.record(answer);

        let next = index + 1;
        if let Some(next_step) = STEPS.get(next) {
            self.state = SessionState::AwaitingAnswer(next);
            return Ok(Advance::Next(next_step));
        }

        let answers = self.answers.finish().ok_or(SessionError::NotAccepting)?;
        self.state = SessionState::Completed;
        Ok(Advance::Complete(CompletedConversation {
            answers,
            selected_plan: self.selected_plan.clone(),
            total_steps: STEPS.len(),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::chat::steps::Field;
    use uuid::Uuid;

    pub(crate) const SCRIPTED_ANSWERS: [&str; 11] = [
        "Carlos Lima",
        "32",
        "1,75",
        "80",
        "Emagrecimento",
        "1 a 2 anos",
        "Academia",
        "1 hora",
        "R$ 200 a R$ 350",
        "5511987654321",
        "carlos@example.com",
    ];

    pub(crate) fn complete(session: &mut ConversationSession) -> CompletedConversation {
        let mut outcome = None;
        for raw in SCRIPTED_ANSWERS {
            outcome = Some(session.submit(raw).expect("scripted answer is valid"));
        }
        match outcome {
            Some(Advance::Complete(done)) => done,
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_full_conversation_completes() {
        let mut session = ConversationSession::new();
        session.open(None);
        session.greeting_finished();

        let done = complete(&mut session);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.current_step_index(), STEPS.len());
        assert_eq!(done.answers.height, 1.75);
        assert_eq!(done.answers.weight, 80.0);
        assert_eq!(done.answers.whatsapp, "+55 11 98765-4321");
        assert_eq!(done.answers.budget, BudgetBracket::From200To350);
        assert_eq!(done.total_steps, 11);
    }

    #[test]
    fn test_invalid_answer_does_not_advance() {
        let mut session = ConversationSession::new();
        session.open(None);
        session.submit("Carlos").unwrap();

        let err = session.submit("abc").unwrap_err();
        assert!(matches!(err, SessionError::Invalid(InvalidAnswer { field: Field::Age, .. })));
        assert_eq!(session.state(), SessionState::AwaitingAnswer(1));
        assert_eq!(session.answers().answered(), 1);
    }

    #[test]
    fn test_reopen_resets_progress() {
        let mut session = ConversationSession::new();
        session.open(None);
        session.submit("Carlos").unwrap();
        session.submit("40").unwrap();

        let plan = PlanSummary {
            id: Uuid::new_v4(),
            name: "Premium".into(),
            price: 450.0,
        };
        session.open(Some(plan.clone()));
        assert_eq!(session.current_step_index(), 0);
        assert_eq!(session.answers(), &LeadAnswers::default());
        assert_eq!(session.selected_plan(), Some(&plan));
    }

    #[test]
    fn test_closed_or_completed_session_rejects_answers() {
        let mut session = ConversationSession::new();
        assert_eq!(session.submit("Carlos"), Err(SessionError::NotAccepting));

        session.open(None);
        complete(&mut session);
        assert_eq!(session.submit("again"), Err(SessionError::NotAccepting));

        session.close();
        assert_eq!(session.state(), SessionState::Idle);
    }
}
