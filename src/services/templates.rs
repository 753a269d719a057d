//! HTML bodies for notification emails. Every user-supplied value goes
//! through [`escape_html`].

use chrono::{DateTime, Utc};

use crate::models::plan::PlanSummary;

pub struct Rendered {
    pub subject: String,
    pub html: String,
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = r#"
body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
.container { max-width: 600px; margin: 0 auto; padding: 20px; }
.header { background-color: #f8f9fa; padding: 20px; border-radius: 8px; margin-bottom: 20px; }
.content { background-color: #ffffff; padding: 20px; border: 1px solid #dee2e6; border-radius: 8px; }
.section { margin-bottom: 20px; }
.field { margin-bottom: 10px; }
.label { font-weight: bold; color: #495057; }
.highlight { background-color: #e3f2fd; padding: 15px; border-radius: 8px; margin: 15px 0; }
.footer { margin-top: 20px; padding-top: 20px; border-top: 1px solid #dee2e6; font-size: 14px; color: #6c757d; }
"#;

fn page(title: &str, color: &str, received_at: DateTime<Utc>, body: &str, footer: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><style>{STYLE}</style></head>
<body>
<div class="container">
<div class="header">
<h2 style="margin: 0; color: {color};">{title}</h2>
<p style="margin: 5px 0 0 0; color: #6b7280;">Recebido em {received}</p>
</div>
<div class="content">{body}</div>
<div class="footer">{footer}</div>
</div>
</body>
</html>"#,
        received = received_at.format("%d/%m/%Y %H:%M:%S UTC"),
    )
}

fn field(label: &str, value: &str) -> String {
    format!(
        r#"<div class="field"><span class="label">{}:</span> {}</div>"#,
        label, value
    )
}

fn optional_field(out: &mut String, label: &str, value: Option<&str>) {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        out.push_str(&field(label, &escape_html(v)));
    }
}

/// Everything the chatbot lead email shows.
pub struct ChatbotLeadEmail<'a> {
    pub name: &'a str,
    pub email: Option<&'a str>,
    pub whatsapp: Option<&'a str>,
    pub age: Option<i32>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub bmi: Option<f64>,
    pub goal: Option<&'a str>,
    pub experience: Option<&'a str>,
    pub preference: Option<&'a str>,
    pub time: Option<&'a str>,
    pub budget: Option<&'a str>,
    pub selected_plan: Option<&'a PlanSummary>,
    pub recommended_plan: Option<&'a PlanSummary>,
    pub received_at: DateTime<Utc>,
}

pub fn chatbot_lead(lead: &ChatbotLeadEmail<'_>) -> Rendered {
    let mut personal = String::from(
        r#"<div class="section"><h3 style="color: #495057;">📝 Informações Pessoais</h3>"#,
    );
    personal.push_str(&field("Nome", &escape_html(lead.name)));
    if let Some(email) = lead.email {
        let email = escape_html(email);
        personal.push_str(&field(
            "Email",
            &format!(r#"<a href="mailto:{0}">{0}</a>"#, email),
        ));
    }
    if let Some(whatsapp) = lead.whatsapp {
        let digits: String = whatsapp.chars().filter(|c| c.is_ascii_digit()).collect();
        personal.push_str(&field(
            "WhatsApp",
            &format!(
                r#"<a href="https://wa.me/{}">{}</a>"#,
                digits,
                escape_html(whatsapp)
            ),
        ));
    }
    if let Some(age) = lead.age {
        personal.push_str(&field("Idade", &format!("{} anos", age)));
    }
    personal.push_str("</div>");

    let mut physical = String::new();
    if lead.height.is_some() || lead.weight.is_some() {
        physical.push_str(
            r#"<div class="section"><h3 style="color: #495057;">📊 Dados Físicos</h3>"#,
        );
        if let Some(h) = lead.height {
            physical.push_str(&field("Altura", &format!("{}m", h)));
        }
        if let Some(w) = lead.weight {
            physical.push_str(&field("Peso", &format!("{}kg", w)));
        }
        if let Some(bmi) = lead.bmi {
            physical.push_str(&field("IMC", &format!("{:.1}", bmi)));
        }
        physical.push_str("</div>");
    }

    let mut goals = String::from(
        r#"<div class="section"><h3 style="color: #495057;">🎯 Objetivos e Preferências</h3>"#,
    );
    optional_field(&mut goals, "Objetivo Principal", lead.goal);
    optional_field(&mut goals, "Experiência", lead.experience);
    optional_field(&mut goals, "Preferência de Local", lead.preference);
    optional_field(&mut goals, "Tempo Disponível", lead.time);
    optional_field(&mut goals, "Orçamento", lead.budget);
    goals.push_str("</div>");

    let plan_kind = if lead.selected_plan.is_some() {
        "Selecionado"
    } else {
        "Recomendado"
    };
    let plan = lead
        .selected_plan
        .or(lead.recommended_plan)
        .map(|p| {
            format!(
                r#"<div class="highlight"><h3 style="color: #2196f3;">💎 Plano {}</h3>{}{}</div>"#,
                plan_kind,
                field("Plano", &escape_html(&p.name)),
                field("Valor", &format!("R$ {}", p.price)),
            )
        })
        .unwrap_or_default();

    let footer = format!(
        "<p><strong>🚀 Próximos Passos Recomendados:</strong></p>\
         <ul>\
         <li>Entrar em contato via WhatsApp em até 2 horas</li>\
         <li>Agendar avaliação física gratuita</li>\
         <li>Apresentar proposta personalizada baseada no perfil</li>\
         <li>Explicar benefícios específicos do plano {}</li>\
         </ul>\
         <p><strong>Lead Score:</strong> Alto (Completou 100% do questionário via chatbot)</p>\
         <p>Este email foi gerado automaticamente pelo chatbot assistente da sua landing page.</p>",
        plan_kind.to_lowercase()
    );

    Rendered {
        subject: format!("🤖 Novo Lead Qualificado: {} - Chatbot", lead.name),
        html: page(
            "🤖 Novo Lead - Chatbot Assistente",
            "#2196f3",
            lead.received_at,
            &format!("{}{}{}{}", personal, physical, goals, plan),
            &footer,
        ),
    }
}

pub struct ContactLeadEmail<'a> {
    pub name: &'a str,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub message: &'a str,
    pub received_at: DateTime<Utc>,
}

pub fn contact_lead(lead: &ContactLeadEmail<'_>) -> Rendered {
    let mut body = field("Nome", &escape_html(lead.name));
    optional_field(&mut body, "Email", lead.email);
    optional_field(&mut body, "Telefone", lead.phone);
    body.push_str(&field(
        "Mensagem",
        &escape_html(lead.message).replace('\n', "<br>"),
    ));

    Rendered {
        subject: format!("🎯 Novo Lead: {} - Formulário de Contato", lead.name),
        html: page(
            "🎯 Novo Lead - Formulário de Contato",
            "#dc2626",
            lead.received_at,
            &body,
            "<p>Este email foi enviado automaticamente pelo formulário de contato da sua landing page.</p>",
        ),
    }
}

pub fn magic_link(url: &str, ttl_minutes: i64, sent_at: DateTime<Utc>) -> Rendered {
    let url = escape_html(url);
    let body = format!(
        r#"<p>Use o link abaixo para acessar o painel administrativo:</p>
<p><a href="{0}" style="background-color: #2196f3; color: #fff; padding: 10px 16px; border-radius: 6px; text-decoration: none;">Entrar no painel</a></p>
<p style="font-size: 12px; color: #6c757d;">{0}</p>"#,
        url
    );
    Rendered {
        subject: "Seu link de acesso ao painel".into(),
        html: page(
            "🔐 Acesso ao painel",
            "#2196f3",
            sent_at,
            &body,
            &format!(
                "<p>O link expira em {} minutos e só pode ser usado uma vez. Se você não solicitou este acesso, ignore este email.</p>",
                ttl_minutes
            ),
        ),
    }
}
