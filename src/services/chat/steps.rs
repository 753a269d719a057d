//! The fixed chatbot questionnaire.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Name,
    Age,
    Height,
    Weight,
    Goal,
    Experience,
    Preference,
    Time,
    Budget,
    Whatsapp,
    Email,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Age => "age",
            Field::Height => "height",
            Field::Weight => "weight",
            Field::Goal => "goal",
            Field::Experience => "experience",
            Field::Preference => "preference",
            Field::Time => "time",
            Field::Budget => "budget",
            Field::Whatsapp => "whatsapp",
            Field::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "options", rename_all = "lowercase")]
pub enum StepKind {
    Text,
    Number,
    Select(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepDefinition {
    pub field: Field,
    pub question: &'static str,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl StepDefinition {
    pub fn options(&self) -> &'static [&'static str] {
        match self.kind {
            StepKind::Select(options) => options,
            _ => &[],
        }
    }

    pub fn placeholder(&self) -> &'static str {
        match self.field {
            Field::Whatsapp => "Ex: +55 11 98765-4321",
            Field::Height => "Ex: 1.75",
            Field::Weight => "Ex: 74.5",
            _ => "Digite sua resposta...",
        }
    }
}

pub const GOAL_OPTIONS: &[&str] = &[
    "Emagrecimento",
    "Ganho de massa muscular",
    "Condicionamento físico",
    "Fortalecimento",
    "Reabilitação",
];

pub const EXPERIENCE_OPTIONS: &[&str] = &[
    "Nunca pratiquei",
    "Menos de 6 meses",
    "6 meses a 1 ano",
    "1 a 2 anos",
    "Mais de 2 anos",
];

pub const PREFERENCE_OPTIONS: &[&str] = &["Academia", "Em casa", "Ao ar livre", "Tanto faz"];

pub const TIME_OPTIONS: &[&str] = &[
    "30 minutos",
    "1 hora",
    "1 hora e 30 minutos",
    "2 horas ou mais",
];

pub const BUDGET_OPTIONS: &[&str] = &[
    "Até R$ 200",
    "R$ 200 a R$ 350",
    "R$ 350 a R$ 500",
    "Acima de R$ 500",
];

pub static STEPS: [StepDefinition; 11] = [
    StepDefinition {
        field: Field::Name,
        question: "Primeiro, qual é o seu nome?",
        kind: StepKind::Text,
    },
    StepDefinition {
        field: Field::Age,
        question: "Prazer em conhecê-lo! Quantos anos você tem?",
        kind: StepKind::Number,
    },
    StepDefinition {
        field: Field::Height,
        question: "Qual sua altura? (exemplo: 1.75)",
        kind: StepKind::Number,
    },
    StepDefinition {
        field: Field::Weight,
        question: "E seu peso atual? (exemplo: 70)",
        kind: StepKind::Number,
    },
    StepDefinition {
        field: Field::Goal,
        question: "Qual seu principal objetivo?",
        kind: StepKind::Select(GOAL_OPTIONS),
    },
    StepDefinition {
        field: Field::Experience,
        question: "Há quanto tempo pratica exercícios?",
        kind: StepKind::Select(EXPERIENCE_OPTIONS),
    },
    StepDefinition {
        field: Field::Preference,
        question: "Onde prefere treinar?",
        kind: StepKind::Select(PREFERENCE_OPTIONS),
    },
    StepDefinition {
        field: Field::Time,
        question: "Quanto tempo por dia pode dedicar aos treinos?",
        kind: StepKind::Select(TIME_OPTIONS),
    },
    StepDefinition {
        field: Field::Budget,
        question: "Qual faixa de investimento considera adequada?",
        kind: StepKind::Select(BUDGET_OPTIONS),
    },
    StepDefinition {
        field: Field::Whatsapp,
        question: "Perfeito! Para enviarmos mais detalhes, qual seu WhatsApp?",
        kind: StepKind::Text,
    },
    StepDefinition {
        field: Field::Email,
        question: "E seu melhor e-mail?",
        kind: StepKind::Text,
    },
];

/// Budget answer mapped to a half-open price range `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetBracket {
    UpTo200,
    From200To350,
    From350To500,
    Above500,
}

impl BudgetBracket {
    pub const ALL: [BudgetBracket; 4] = [
        BudgetBracket::UpTo200,
        BudgetBracket::From200To350,
        BudgetBracket::From350To500,
        BudgetBracket::Above500,
    ];

    pub fn from_label(label: &str) -> Option<Self> {
        BUDGET_OPTIONS
            .iter()
            .position(|o| *o == label)
            .map(|i| Self::ALL[i])
    }

    pub fn label(self) -> &'static str {
        match self {
            BudgetBracket::UpTo200 => BUDGET_OPTIONS[0],
            BudgetBracket::From200To350 => BUDGET_OPTIONS[1],
            BudgetBracket::From350To500 => BUDGET_OPTIONS[2],
            BudgetBracket::Above500 => BUDGET_OPTIONS[3],
        }
    }

    /// `(min, max)`; `max` is `None` for the open-ended bracket.
    pub fn range(self) -> (f64, Option<f64>) {
        match self {
            BudgetBracket::UpTo200 => (0.0, Some(200.0)),
            BudgetBracket::From200To350 => (200.0, Some(350.0)),
            BudgetBracket::From350To500 => (350.0, Some(500.0)),
            BudgetBracket::Above500 => (500.0, None),
        }
    }

    pub fn contains(self, price: f64) -> bool {
        let (min, max) = self.range();
        price >= min && max.map_or(true, |max| price < max)
    }
}
