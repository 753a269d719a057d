//! Per-field input cleanup and validation for chatbot answers.

use lazy_static::lazy_static;
use regex::Regex;

use super::steps::{BudgetBracket, Field, StepDefinition};

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[a-zA-ZÀ-ÿ\s-]{2,}$").unwrap();
    static ref WHATSAPP_RE: Regex = Regex::new(r"^\+55\s?\d{2}\s?9\d{4}-?\d{4}$").unwrap();
    static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

/// A validated answer, typed by the step it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Name(String),
    Age(u8),
    Height(f64),
    Weight(f64),
    Goal(String),
    Experience(String),
    Preference(String),
    Time(String),
    Budget(BudgetBracket),
    Whatsapp(String),
    Email(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct InvalidAnswer {
    pub field: Field,
    pub message: &'static str,
}

fn invalid(field: Field, message: &'static str) -> InvalidAnswer {
    InvalidAnswer { field, message }
}

/// Normalize raw input for `field`. Fields without a rule are returned trimmed.
pub fn format_input(field: Field, raw: &str) -> String {
    match field {
        Field::Height => clean_decimal(raw, 2),
        Field::Weight => clean_decimal(raw, 1),
        Field::Whatsapp => format_whatsapp(raw),
        _ => raw.trim().to_string(),
    }
}

/// Keep digits and separators, turn the first comma into a dot and cut the
/// fractional part to `decimals` places.
fn clean_decimal(raw: &str, decimals: usize) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    let cleaned = kept.replacen(',', ".", 1);

    let mut parts = cleaned.split('.');
    let whole = parts.next().unwrap_or_default();
    match parts.next() {
        Some(frac) => {
            let frac: String = frac.chars().take(decimals).collect();
            format!("{}.{}", whole, frac)
        }
        None => cleaned,
    }
}

/// Clamped byte slice over an ASCII digit string.
fn digits_slice(digits: &str, start: usize, end: usize) -> &str {
    let end = end.min(digits.len());
    let start = start.min(end);
    &digits[start..end]
}

/// Rebuild `+55 AA 9XXXX-XXXX` from whatever digits were typed. The first two
/// digits are taken as the country code.
pub fn format_whatsapp(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > 2 {
        format!(
            "+55 {} {}-{}",
            digits_slice(&digits, 2, 4),
            digits_slice(&digits, 4, 9),
            digits_slice(&digits, 9, 13)
        )
    } else if !digits.is_empty() {
        "+55 ".to_string()
    } else {
        String::new()
    }
}

/// Format then validate an answer for `step`.
pub fn parse_answer(step: &StepDefinition, raw: &str) -> Result<Answer, InvalidAnswer> {
    let value = format_input(step.field, raw);
    let field = step.field;

    match field {
        Field::Name => {
            if NAME_RE.is_match(&value) {
                Ok(Answer::Name(value))
            } else {
                Err(invalid(
                    field,
                    "Por favor, insira um nome válido (mínimo 2 caracteres, apenas letras, espaços ou hífens).",
                ))
            }
        }
        Field::Age => value
            .parse::<u8>()
            .ok()
            .filter(|age| (10..=120).contains(age))
            .map(Answer::Age)
            .ok_or_else(|| invalid(field, "A idade deve ser um número entre 10 e 120 anos.")),
        Field::Height => value
            .parse::<f64>()
            .ok()
            .filter(|h| (1.0..=2.5).contains(h))
            .map(Answer::Height)
            .ok_or_else(|| invalid(field, "A altura deve ser um número entre 1.00 e 2.50 metros.")),
        Field::Weight => value
            .parse::<f64>()
            .ok()
            .filter(|w| (30.0..=300.0).contains(w))
            .map(Answer::Weight)
            .ok_or_else(|| invalid(field, "O peso deve ser um número entre 30 e 300 kg.")),
        Field::Goal | Field::Experience | Field::Preference | Field::Time | Field::Budget => {
            if !step.options().contains(&value.as_str()) {
                return Err(invalid(field, "Por favor, escolha uma das opções apresentadas."));
            }
            Ok(match field {
                Field::Goal => Answer::Goal(value),
                Field::Experience => Answer::Experience(value),
                Field::Preference => Answer::Preference(value),
                Field::Time => Answer::Time(value),
                _ => BudgetBracket::from_label(&value)
                    .map(Answer::Budget)
                    .ok_or_else(|| invalid(field, "Por favor, escolha uma das opções apresentadas."))?,
            })
        }
        Field::Whatsapp => {
            if WHATSAPP_RE.is_match(&value) {
                Ok(Answer::Whatsapp(value))
            } else {
                Err(invalid(
                    field,
                    "Por favor, insira um número de WhatsApp válido (exemplo: +5511987654321).",
                ))
            }
        }
        Field::Email => {
            if EMAIL_RE.is_match(&value) {
                Ok(Answer::Email(value))
            } else {
                Err(invalid(field, "Por favor, insira um email válido."))
            }
        }
    }
}

/// Strip characters that could smuggle markup into stored free text.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '{' | '}'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chat::steps::STEPS;

    fn step(field: Field) -> StepDefinition {
        *STEPS.iter().find(|s| s.field == field).unwrap()
    }

    #[test]
    fn test_height_comma_is_normalized() {
        assert_eq!(format_input(Field::Height, "1,75"), "1.75");
        assert_eq!(format_input(Field::Height, "1.7589"), "1.75");
        assert_eq!(format_input(Field::Height, "1,75m"), "1.75");
        assert_eq!(
            parse_answer(&step(Field::Height), "1,75"),
            Ok(Answer::Height(1.75))
        );
    }

    #[test]
    fn test_weight_keeps_one_decimal() {
        assert_eq!(format_input(Field::Weight, "74,56 kg"), "74.5");
        assert_eq!(format_input(Field::Weight, "80"), "80");
        assert_eq!(parse_answer(&step(Field::Weight), "80"), Ok(Answer::Weight(80.0)));
    }

    #[test]
    fn test_numeric_ranges_are_enforced() {
        assert!(parse_answer(&step(Field::Height), "0.9").is_err());
        assert!(parse_answer(&step(Field::Height), "2.51").is_err());
        assert!(parse_answer(&step(Field::Weight), "29").is_err());
        assert!(parse_answer(&step(Field::Age), "9").is_err());
        assert!(parse_answer(&step(Field::Age), "121").is_err());
        assert_eq!(parse_answer(&step(Field::Age), "35"), Ok(Answer::Age(35)));
    }

    #[test]
    fn test_whatsapp_is_reformatted() {
        assert_eq!(format_whatsapp("5511987654321"), "+55 11 98765-4321");
        assert_eq!(format_whatsapp("+55 (11) 98765-4321"), "+55 11 98765-4321");
        assert_eq!(
            parse_answer(&step(Field::Whatsapp), "5511987654321"),
            Ok(Answer::Whatsapp("+55 11 98765-4321".into()))
        );
    }

    #[test]
    fn test_whatsapp_formatting_is_idempotent() {
        let once = format_whatsapp("5511987654321");
        assert_eq!(format_whatsapp(&once), once);
    }

    #[test]
    fn test_whatsapp_rejects_landline() {
        // no leading 9 on the subscriber number
        assert!(parse_answer(&step(Field::Whatsapp), "551187654321").is_err());
        assert!(parse_answer(&step(Field::Whatsapp), "55").is_err());
    }

    #[test]
    fn test_name_rules() {
        assert_eq!(
            parse_answer(&step(Field::Name), "  Ana-Luíza Souza "),
            Ok(Answer::Name("Ana-Luíza Souza".into()))
        );
        assert!(parse_answer(&step(Field::Name), "A").is_err());
        assert!(parse_answer(&step(Field::Name), "R2D2").is_err());
    }

    #[test]
    fn test_select_must_match_an_option() {
        assert_eq!(
            parse_answer(&step(Field::Budget), "R$ 200 a R$ 350"),
            Ok(Answer::Budget(BudgetBracket::From200To350))
        );
        let err = parse_answer(&step(Field::Goal), "Dançar").unwrap_err();
        assert_eq!(err.field, Field::Goal);
    }

    #[test]
    fn test_email_shape() {
        assert!(parse_answer(&step(Field::Email), "ana@example.com").is_ok());
        assert!(parse_answer(&step(Field::Email), "ana@example").is_err());
        assert!(parse_answer(&step(Field::Email), "ana example@x.com").is_err());
    }

    #[test]
    fn test_sanitize_strips_braces() {
        assert_eq!(sanitize(" <b>Ana</b> {x} "), "bAna/b x");
    }
}
