use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::InvestigationError;

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    TicketAnalysis {
        ticket_id: String,
        /// The matched ticket URL.
        reference: String,
    },
    CodeQuery {
        question: String,
    },
}

// Ticket URL: .../tickets/<id>, optionally under /a/ or /helpdesk/.
// `|` and `>` end the URL inside chat link markup like <https://...|label>.
static TICKET_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://[^\s<>|]+?/(?:a/|helpdesk/)?tickets/(\d+)\b").expect("static regex")
});

// `<@U024BE7LH>` user mentions and bare `@name` mentions.
static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@[A-Za-z0-9]+>|(?:^|\s)@[\w.\-]+").expect("static regex"));

/// Classify a raw request. A ticket URL wins over any surrounding question.
pub fn route(input: &str) -> Result<Route, InvestigationError> {
    if let Some(caps) = TICKET_URL.captures(input) {
        return Ok(Route::TicketAnalysis {
            ticket_id: caps[1].to_string(),
            reference: caps[0].to_string(),
        });
    }

    let question = MENTION.replace_all(input, " ");
    let question = question.split_whitespace().collect::<Vec<_>>().join(" ");
    if question.is_empty() {
        return Err(InvestigationError::UnroutableRequest(
            "request has no ticket reference and no question".to_string(),
        ));
    }
    Ok(Route::CodeQuery { question })
}
