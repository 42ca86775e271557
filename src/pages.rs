//! Server-rendered HTML for the chat form and the history table.

use std::fmt::Write;

use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use url::form_urlencoded;

use crate::{
    model::{DEFAULT_TEMPERATURE, MAX_NEW_TOKENS_LIMIT},
    orchestrator::{MAX_PROMPT_CHARS, OrchestratedResult, Persistence},
    store::{InteractionFilter, InteractionPage, SortDirection, SortSpec},
};

/// Values echoed back into the chat form.
#[derive(Debug, Default, Clone)]
pub struct ChatFormValues {
    pub prompt: String,
    pub max_new_tokens: String,
    pub temperature: String,
}

pub enum ChatOutcome<'a> {
    Answered(&'a OrchestratedResult),
    Rejected(&'a str),
}

pub fn chat_page(
    session_id: &str,
    default_max_new_tokens: u32,
    form: &ChatFormValues,
    outcome: Option<ChatOutcome<'_>>,
) -> String {
    let mut body = String::new();

    match outcome {
        Some(ChatOutcome::Answered(result)) => {
            if result.backend_failed {
                notice(&mut body, "error", "The model could not produce a response.");
            } else {
                notice(&mut body, "success", "Response generated.");
            }
            if let Persistence::Failed { .. } = result.persistence {
                notice(
                    &mut body,
                    "warning",
                    "The response could not be saved to history.",
                );
            }
            let _ = write!(
                body,
                "<section class=\"response\"><h2>Response</h2><pre>{}</pre>\
                 <p class=\"meta\">{} · {} · {:.2}s</p></section>",
                text(&result.response_text),
                text(&result.model),
                text(result.task.as_str()),
                result.elapsed_seconds,
            );
        }
        Some(ChatOutcome::Rejected(message)) => notice(&mut body, "error", message),
        None => {}
    }

    let max_tokens_placeholder = default_max_new_tokens.to_string();
    let temperature_placeholder = DEFAULT_TEMPERATURE.to_string();
    let _ = write!(
        body,
        "<form method=\"post\" action=\"/\">\
         <label>Prompt<textarea name=\"prompt\" rows=\"3\" maxlength=\"{MAX_PROMPT_CHARS}\" \
         required placeholder=\"Type your question...\">{}</textarea></label>\
         <label>Max new tokens<input type=\"number\" name=\"max_new_tokens\" min=\"1\" \
         max=\"{MAX_NEW_TOKENS_LIMIT}\" value=\"{}\" placeholder=\"{}\"></label>\
         <label>Temperature<input type=\"number\" name=\"temperature\" min=\"0\" max=\"2\" \
         step=\"0.1\" value=\"{}\" placeholder=\"{}\"></label>\
         <button type=\"submit\">Send</button></form>",
        text(&form.prompt),
        attr(&form.max_new_tokens),
        attr(&max_tokens_placeholder),
        attr(&form.temperature),
        attr(&temperature_placeholder),
    );

    layout("Chat", session_id, &body)
}

pub fn history_page(
    session_id: &str,
    filter: &InteractionFilter,
    sort: SortSpec,
    page: &InteractionPage,
) -> String {
    let mut body = String::new();

    let _ = write!(
        body,
        "<form method=\"get\" action=\"/history/\" class=\"filters\">\
         <input name=\"session_id\" placeholder=\"session\" value=\"{}\">\
         <input name=\"model\" placeholder=\"model\" value=\"{}\">\
         <input name=\"q\" placeholder=\"search prompt or response\" value=\"{}\">\
         <input type=\"number\" name=\"page_size\" min=\"1\" value=\"{}\">\
         <button type=\"submit\">Filter</button></form>",
        attr(filter.session_id.as_deref().unwrap_or_default()),
        attr(filter.model.as_deref().unwrap_or_default()),
        attr(filter.q.as_deref().unwrap_or_default()),
        page.page_size,
    );

    let _ = write!(
        body,
        "<p>{} interaction(s) · page {} of {} · \
         <a href=\"/export/?{}\">CSV</a> · <a href=\"/export/?{}\">JSON</a></p>",
        page.total,
        page.page,
        page.total_pages().max(1),
        attr(&export_query(filter, "csv")),
        attr(&export_query(filter, "json")),
    );

    body.push_str(
        "<table><thead><tr><th>When</th><th>Model</th><th>Prompt</th>\
         <th>Response</th><th>Latency</th></tr></thead><tbody>",
    );
    for item in &page.items {
        let _ = write!(
            body,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.2}s</td></tr>",
            text(&item.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            text(&item.model),
            text(&item.prompt),
            text(&item.response),
            item.latency_seconds,
        );
    }
    if page.items.is_empty() {
        body.push_str("<tr><td colspan=\"5\">No interactions found.</td></tr>");
    }
    body.push_str("</tbody></table>");

    body.push_str("<nav class=\"pager\">");
    if page.page > 1 {
        let _ = write!(
            body,
            "<a href=\"/history/?{}\">Previous</a> ",
            attr(&history_query(filter, sort, page.page - 1, page.page_size)),
        );
    }
    if page.has_next() {
        let _ = write!(
            body,
            "<a href=\"/history/?{}\">Next</a>",
            attr(&history_query(filter, sort, page.page + 1, page.page_size)),
        );
    }
    body.push_str("</nav>");

    layout("History", session_id, &body)
}

pub fn error_page(session_id: &str, message: &str) -> String {
    let mut body = String::new();
    notice(&mut body, "error", message);
    layout("Error", session_id, &body)
}

fn notice(body: &mut String, level: &str, message: &str) {
    let _ = write!(
        body,
        "<p class=\"notice {}\">{}</p>",
        attr(level),
        text(message)
    );
}

fn layout(title: &str, session_id: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{}</title></head>\
         <body><header><nav><a href=\"/\">Chat</a> · <a href=\"/history/\">History</a></nav>\
         <small>session {}</small></header><main><h1>{}</h1>{}</main></body></html>",
        text(title),
        text(session_id),
        text(title),
        body,
    )
}

fn filter_pairs<'a>(
    serializer: &mut form_urlencoded::Serializer<'a, String>,
    filter: &InteractionFilter,
) {
    if let Some(session_id) = &filter.session_id {
        serializer.append_pair("session_id", session_id);
    }
    if let Some(model) = &filter.model {
        serializer.append_pair("model", model);
    }
    if let Some(q) = &filter.q {
        serializer.append_pair("q", q);
    }
}

pub fn history_query(filter: &InteractionFilter, sort: SortSpec, page: u64, page_size: u64) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    filter_pairs(&mut serializer, filter);
    serializer.append_pair("page", &page.to_string());
    serializer.append_pair("page_size", &page_size.to_string());
    if sort != SortSpec::default() {
        serializer.append_pair("sort", sort.field.as_str());
        let dir = match sort.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        serializer.append_pair("dir", dir);
    }
    serializer.finish()
}

fn export_query(filter: &InteractionFilter, format: &str) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    serializer.append_pair("format", format);
    filter_pairs(&mut serializer, filter);
    serializer.finish()
}
