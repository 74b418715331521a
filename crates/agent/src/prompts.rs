//! Prompt and email templates.
//!
//! Each decision type has a fixed system instruction and a tera template for the user turn.
//! Pipelines hand in a flat, pre-formatted context so templates stay free of filters.

use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

use coachdesk_core::domain::decision::DecisionType;

use crate::llm::ChatMessage;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("template error: {0}")]
    Template(#[from] tera::Error),
}

/// Non-AI transactional emails sent by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailTemplate {
    FeedbackSurvey,
    BidReminder,
}

impl EmailTemplate {
    fn template_name(&self) -> &'static str {
        match self {
            Self::FeedbackSurvey => "feedback_survey.html",
            Self::BidReminder => "bid_reminder.html",
        }
    }
}

const JSON_ONLY: &str = "Reply with a single JSON object matching the provided schema. \
Include a confidence_score between 0 and 1 describing how sure you are.";

const TEMPLATES: [(&str, &str); 10] = [
    (
        "email_parse.txt",
        "Extract the coach hire enquiry from this message. Use ISO-8601 dates and leave \
optional fields null when the sender did not give them.

From: {{ from }}
{% if subject %}Subject: {{ subject }}
{% endif %}
{{ body }}
",
    ),
    (
        "enquiry_analysis.txt",
        "Enquiry {{ reference }}
Pickup: {{ pickup }}
Dropoff: {{ dropoff }}
Departure: {{ departure }}
Return: {{ return_at }}
Passengers: {{ passengers }}
Trip type: {{ trip_type }}
Special requirements: {{ requirements }}

Score complexity from 1 to 10, suggest a vehicle class, estimate a market price band in \
{{ currency }} and score how complete the customer's information is from 1 to 10.
",
    ),
    (
        "supplier_selection.txt",
        "Enquiry {{ reference }}: {{ passengers }} passengers, {{ pickup }} to {{ dropoff }}, {{ trip_type }}.
{% if vehicle %}Suggested vehicle: {{ vehicle }}
{% endif %}
Candidate suppliers:
{% for supplier in suppliers %}- id={{ supplier.id }} name={{ supplier.name }} rating={{ supplier.rating }} fleet={{ supplier.fleet_size }} vehicles={{ supplier.vehicle_types }} completed_jobs={{ supplier.completed_jobs }} response_rate={{ supplier.response_rate }}
{% endfor %}
Rank the suppliers best first, using their ids exactly, and recommend how many to invite \
(at most {{ max_suppliers }}).
",
    ),
    (
        "bid_evaluation.txt",
        "Enquiry {{ reference }}: {{ passengers }} passengers, {{ pickup }} to {{ dropoff }}, {{ trip_type }}.
{% if estimate %}Estimated market price: {{ estimate }}
{% else %}No reliable market estimate is available.
{% endif %}
Bids:
{% for bid in bids %}- bid_id={{ bid.id }} supplier={{ bid.supplier }} rating={{ bid.rating }} price={{ bid.price }} vehicle={{ bid.vehicle }}{% if bid.notes %} notes={{ bid.notes }}{% endif %}
{% endfor %}
Rank every bid, score its fairness from 0 to 100, list any pricing anomalies and recommend \
exactly one bid_id from the list.
",
    ),
    (
        "markup_calculation.txt",
        "Supplier price: {{ supplier_price }} {{ currency }} for {{ passengers }} passengers, {{ pickup }} to {{ dropoff }}.
Customer history: {{ prior_bookings }} prior bookings, quote acceptance rate {{ acceptance_rate }}, average spend {{ average_spend }}.
Allowed markup range: {{ min_percent }}% to {{ max_percent }}%.

Recommend a markup percentage and estimate the probability that the customer accepts.
",
    ),
    (
        "quote_content.txt",
        "Write the customer-facing quote for {{ customer_name }}.
Trip: {{ pickup }} to {{ dropoff }}, departing {{ departure }}, {{ passengers }} passengers, {{ trip_type }}.
Vehicle: {{ vehicle }}
Total price: {{ total }} {{ currency }} including tax of {{ tax_amount }}.

Do not alter, round or restate the price in any other form.
",
    ),
    (
        "job_documents.txt",
        "Booking {{ reference }} with {{ supplier }}.
Trip: {{ pickup }} to {{ dropoff }}, departing {{ departure }}{% if return_at %}, returning {{ return_at }}{% endif %}.
Passengers: {{ passengers }}. Vehicle: {{ vehicle }}.
{% if requirements %}Special requirements: {{ requirements }}
{% endif %}Lead contact: {{ contact_name }} {{ contact_phone }}

Write a job sheet for the operator and a briefing for the driver.
",
    ),
    (
        "email_personalization.txt",
        "Write a short, friendly email. Purpose: {{ purpose }}.
Recipient: {{ recipient_name }} <{{ recipient_email }}>
Facts to include exactly as given:
{% for fact in facts %}- {{ fact.label }}: {{ fact.value }}
{% endfor %}{% if link %}Include this link: {{ link }}
{% endif %}
Return a subject line and an HTML body.
",
    ),
    (
        "feedback_survey.html",
        "<p>Hello {{ name }},</p>
<p>Thank you for travelling with us on booking {{ reference }}. We would love to hear how the journey went.</p>
<p><a href=\"{{ link }}\">Share your feedback</a></p>
",
    ),
    (
        "bid_reminder.html",
        "<p>Hello {{ supplier }},</p>
<p>We are still waiting for your price for enquiry {{ reference }} ({{ pickup }} to {{ dropoff }}). Bids close at {{ deadline }}.</p>
<p><a href=\"{{ link }}\">Submit your bid</a></p>
",
    ),
];

fn system_instruction(decision_type: DecisionType) -> &'static str {
    match decision_type {
        DecisionType::EmailParse => "You read inbound emails for a coach hire broker and extract enquiries.",
        DecisionType::EnquiryAnalysis => "You assess coach hire enquiries for a broker's operations team.",
        DecisionType::SupplierSelection => "You choose which coach operators should be invited to bid on a trip.",
        DecisionType::BidEvaluation => "You compare operator bids for a coach hire trip and spot unfair or suspicious pricing.",
        DecisionType::MarkupCalculation => "You recommend the broker's markup on an operator's price within a fixed policy range.",
        DecisionType::QuoteContent => "You write clear, friendly coach hire quotes for customers.",
        DecisionType::JobDocuments => "You prepare operational paperwork for confirmed coach bookings.",
        DecisionType::EmailPersonalization => "You write concise transactional emails for a coach hire broker.",
    }
}

pub struct PromptLibrary {
    tera: Tera,
}

impl PromptLibrary {
    pub fn new() -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.to_vec())?;
        Ok(Self { tera })
    }

    /// System instruction plus the rendered user turn for `decision_type`.
    pub fn messages(
        &self,
        decision_type: DecisionType,
        context: &impl Serialize,
    ) -> Result<Vec<ChatMessage>, PromptError> {
        let template = format!("{}.txt", decision_type.as_str());
        let user = self.tera.render(&template, &Context::from_serialize(context)?)?;

        Ok(vec![
            ChatMessage::system(format!("{} {JSON_ONLY}", system_instruction(decision_type))),
            ChatMessage::user(user),
        ])
    }

    pub fn render_email(
        &self,
        template: EmailTemplate,
        context: &impl Serialize,
    ) -> Result<String, PromptError> {
        Ok(self.tera.render(template.template_name(), &Context::from_serialize(context)?)?)
    }
}
