//! Cheque-bounce advisory flow
//!
//! Variable dependencies between hooks (writer → reader):
//! - `fetch_providers` enter writes `search_failed` and, on success,
//!   `providers`; the `search_failed` guard and the provider-selection guard
//!   read them.
//! - `select_provider` exit writes `selected_provider` for a valid
//!   selection; `confirm_provider` and `send_link` enter read it.
//! - `ask_question` exit writes `query`; `fetch_answer` and `render_answer`
//!   enter read it.
//! - `form_filled` enter writes `form_failed` and, on success, the dispute
//!   form fields; its guard and `dispute_registered` read them.
//! - Every yes/no prompt writes `pending_choice` on entry; the guards
//!   leaving `choice_retry` read it.

use super::catalog::{Provider, ProviderCatalog};
use crate::state_machine::{
    Attachment, EnterContext, ExitContext, Flow, FlowError, FormSpec, GraphBuilder, GraphError,
    Guard, OptionItem, OutboundMessage, TurnSignal,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const FLOW_NAME: &str = "cheque_bounce";

/// Collaborator tag for the answer-retrieval service
pub const RETRIEVAL_TAG: &str = "retrieval";

/// Tag for the messaging channel's rich widgets. The channel renders them
/// for the human, so the human's choice comes back as ordinary input.
pub const CHANNEL_TAG: &str = "channel";

/// Channel reply once the human has picked a language
pub const LANGUAGE_SELECTED: &str = "language_selected";

pub const DISPUTE_FORM_ID: &str = "cb_dispute_form";

const BOOKING_LINK: &str = "https://booking.example.org/call";

const GREETING: &str = "Hey there! I'm the Cheque Bounce Bot. If your cheque bounces, I can give you \
     quick updates, answer your questions and help you draft a demand notice. I can also connect \
     you with experts who handle cheque bounce cases.";

/// Demand-notice fields collected one prompt at a time, in order
const NOTICE_FIELDS: [(&str, &str); 9] = [
    ("drawer_name", "Please enter the name of the drawer."),
    ("drawer_address", "Please enter the address of the drawer."),
    ("payee_name", "Please enter the name of the payee."),
    ("payee_address", "Please enter the address of the payee."),
    ("cheque_number", "Please enter the cheque number."),
    ("cheque_date", "Please enter the cheque date."),
    ("cheque_amount", "Please enter the cheque amount."),
    ("return_date", "Please enter the date the cheque was returned."),
    ("return_reason", "Please enter the reason the cheque was returned."),
];

/// Fields the dispute form must carry; nothing else in a submission is kept
const FORM_FIELDS: [&str; 9] = [
    "r_name",
    "r_phone",
    "r_email",
    "c_name",
    "c_phone",
    "c_email",
    "c_address",
    "c_city",
    "dispute_details",
];

/// Optional dispute form field, kept when it is a string or a number
const CLAIM_VALUE: &str = "claim_value";

/// Yes/no prompts; an unrecognised reply goes through `choice_retry` and back
const CHOICE_PROMPTS: [&str; 5] = [
    "ask_another_question",
    "confirm_details",
    "confirm_provider",
    "ask_for_lawyer",
    "ask_further_assistance",
];

const PENDING_CHOICE: &str = "pending_choice";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HistoryEntry {
    name: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RetrievalResult {
    chunks: Vec<RetrievedChunk>,
}

#[derive(Debug, Deserialize)]
struct RetrievedChunk {
    chunk: String,
}

// ============================================================================
// Hook helpers
// ============================================================================

fn prompt(text: &'static str) -> impl Fn(&mut EnterContext<'_>) -> Result<TurnSignal, FlowError> {
    move |ctx| {
        ctx.emit(OutboundMessage::text(text));
        Ok(TurnSignal::AwaitInput)
    }
}

/// Ask a Yes/No question, remembering the prompt so `choice_retry` can return to it
fn ask_choice(ctx: &mut EnterContext<'_>, text: impl Into<String>) -> Result<TurnSignal, FlowError> {
    let state = ctx.state().to_string();
    ctx.variables.set(PENDING_CHOICE, state);
    ctx.emit(OutboundMessage::yes_no(text));
    Ok(TurnSignal::AwaitInput)
}

fn yes_no(text: &'static str) -> impl Fn(&mut EnterContext<'_>) -> Result<TurnSignal, FlowError> {
    move |ctx| ask_choice(ctx, text)
}

fn notify(text: &'static str) -> impl Fn(&mut EnterContext<'_>) -> Result<TurnSignal, FlowError> {
    move |ctx| {
        ctx.emit(OutboundMessage::text(text));
        Ok(TurnSignal::Continue)
    }
}

/// Store the reply that leaves a prompting state
fn capture(variable: &'static str) -> impl Fn(&mut ExitContext<'_>) -> Result<(), FlowError> {
    move |ctx| {
        let value = ctx.input().map(str::trim).unwrap_or_default().to_string();
        ctx.variables.set(variable, value);
        Ok(())
    }
}

/// 1-based index into `providers`, if the reply is a valid selection
fn parse_selection(input: Option<&str>, count: usize) -> Option<usize> {
    let n: usize = input?.trim().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}

/// True for a missing, non-numeric or out-of-range provider selection.
/// Requires `providers` from `fetch_providers`.
fn invalid_provider_selection() -> Guard {
    Guard::new("invalid_provider_selection", |ctx| {
        let providers: Vec<Provider> = ctx.variables.require_as("providers")?;
        Ok(parse_selection(ctx.input(), providers.len()).is_none())
    })
}

// ============================================================================
// Flow
// ============================================================================

/// Build the advisory flow around a provider catalog collaborator
pub fn build(catalog: Arc<dyn ProviderCatalog>, max_hops: usize) -> Result<Arc<Flow>, GraphError> {
    let mut graph = GraphBuilder::new("zero", "end");

    // Language selection and main menu
    graph
        .add_chain(&["zero", "select_language", "language_retry", "select_language"])
        .add_guarded_edge("select_language", "main_menu", Guard::input_eq(LANGUAGE_SELECTED))
        .add_chain(&["main_menu", "menu_retry", "main_menu"])
        .add_guarded_edge("main_menu", "ask_question", Guard::input_eq("1"))
        .add_guarded_edge("main_menu", "confirm_details", Guard::input_eq("2"))
        .add_guarded_edge("main_menu", "drawer_name", Guard::input_eq("3"))
        .add_guarded_edge("main_menu", "collect_details", Guard::input_eq("4"));

    // Question answering via the retrieval collaborator
    graph
        .add_chain(&["ask_question", "fetch_answer", "render_answer", "ask_another_question"])
        .add_guarded_edge("ask_another_question", "ask_question", Guard::input_eq("1"))
        .add_guarded_edge("ask_another_question", "ask_further_assistance", Guard::input_eq("2"));

    // Lawyer consultation
    graph
        .add_guarded_edge("confirm_details", "fetch_providers", Guard::input_eq("1"))
        .add_guarded_edge("confirm_details", "main_menu", Guard::input_eq("2"))
        .add_chain(&["fetch_providers", "select_provider", "confirm_provider"])
        .add_guarded_edge("fetch_providers", "ask_further_assistance", Guard::flag("search_failed"))
        .add_guarded_edge("select_provider", "provider_retry", invalid_provider_selection())
        .add_edge("provider_retry", "select_provider")
        .add_guarded_edge("confirm_provider", "send_link", Guard::input_eq("1"))
        .add_guarded_edge("confirm_provider", "fetch_providers", Guard::input_eq("2"))
        .add_edge("send_link", "ask_further_assistance");

    // Demand notice drafting
    let mut notice_chain: Vec<&str> = NOTICE_FIELDS.iter().map(|(name, _)| *name).collect();
    notice_chain.extend(["generate_notice", "ask_for_lawyer"]);
    graph
        .add_chain(notice_chain.as_slice())
        .add_guarded_edge("ask_for_lawyer", "confirm_details", Guard::input_eq("1"))
        .add_guarded_edge("ask_for_lawyer", "ask_further_assistance", Guard::input_eq("2"));

    // Dispute registration via a channel form
    graph
        .add_chain(&[
            "collect_details",
            "form_filled",
            "dispute_registered",
            "ask_further_assistance",
        ])
        .add_guarded_edge("form_filled", "ask_further_assistance", Guard::flag("form_failed"))
        .add_guarded_edge("ask_further_assistance", "main_menu", Guard::input_eq("1"))
        .add_guarded_edge("ask_further_assistance", "end", Guard::input_eq("2"));

    // Shared retry for every yes/no prompt
    for state in CHOICE_PROMPTS {
        graph
            .add_edge(state, "choice_retry")
            .add_guarded_edge("choice_retry", state, Guard::var_eq(PENDING_CHOICE, state));
    }
    graph.add_edge("choice_retry", "main_menu");

    let mut builder = Flow::builder(FLOW_NAME, graph).max_hops(max_hops);
    let hooks = builder.hooks_mut();

    hooks
        .on_enter("select_language", |ctx| {
            ctx.emit(
                OutboundMessage::text(GREETING)
                    .with_dialog("language")
                    .to_collaborator(CHANNEL_TAG),
            );
            Ok(TurnSignal::AwaitInput)
        })
        .on_enter("language_retry", notify("Please choose a language to continue."))
        .on_enter("main_menu", |ctx| {
            ctx.emit(
                OutboundMessage::menu(
                    "How can I help you today? Here are the options:",
                    &[
                        "Get more info",
                        "Consult a lawyer",
                        "Draft demand notice",
                        "Register a dispute",
                    ],
                )
                .with_header("Menu Options"),
            );
            Ok(TurnSignal::AwaitInput)
        })
        .on_exit("main_menu", capture("service_picked"))
        .on_enter("menu_retry", notify("Sorry, that is not one of the options. Please reply with its number."));

    hooks
        .on_enter("ask_question", prompt(
            "Please ask your question about cheque bouncing below. Ask one question at a time and keep it brief.",
        ))
        .on_exit("ask_question", |ctx| {
            capture("query")(ctx)?;
            ctx.emit(OutboundMessage::text(
                "Thank you. I have received your question and need a minute to prepare the answer.",
            ));
            Ok(())
        })
        .on_enter("fetch_answer", |ctx| {
            let query = ctx.variables.require_str("query")?.to_string();
            ctx.emit(OutboundMessage::text(query.clone()).to_collaborator(RETRIEVAL_TAG));
            ctx.emit(OutboundMessage::text(format!("*Your question*:\n{query}")));
            Ok(TurnSignal::AwaitCallback)
        })
        .on_enter("render_answer", render_answer)
        .on_enter("ask_another_question", yes_no("Do you have any other question?"));

    hooks
        .on_enter("confirm_details", |ctx| {
            let field = |name: &str, default: &str| -> String {
                ctx.variables
                    .get(name)
                    .and_then(|v| v.as_str())
                    .unwrap_or(default)
                    .to_string()
            };
            let text = format!(
                "Please confirm the following details:\nName: {}\nCheque Number: {}\nCheque Amount: {}",
                field("drawer_name", "not provided"),
                field("cheque_number", "not provided"),
                field("cheque_amount", "not provided"),
            );
            ask_choice(ctx, text)
        })
        .on_enter("fetch_providers", {
            let catalog = Arc::clone(&catalog);
            move |ctx| fetch_providers(ctx, catalog.as_ref())
        })
        .on_enter("select_provider", prompt("Reply with the number of the provider you want to book."))
        .on_exit("select_provider", |ctx| {
            let providers: Vec<Provider> = ctx.variables.require_as("providers")?;
            if let Some(index) = parse_selection(ctx.input(), providers.len()) {
                let selected = &providers[index];
                ctx.variables.set_json("selected_provider", selected)?;
                ctx.emit(
                    OutboundMessage::text(selected.card())
                        .with_header(format!("Selected Provider: {}", selected.name)),
                );
            }
            Ok(())
        })
        .on_enter("provider_retry", notify(
            "Sorry, that is not a valid provider. Please select a provider from the list.",
        ))
        .on_enter("confirm_provider", |ctx| {
            let provider: Provider = ctx.variables.require_as("selected_provider")?;
            ask_choice(ctx, format!("Are you sure you want to go ahead with {}?", provider.name))
        })
        .on_enter("send_link", |ctx| {
            let provider: Provider = ctx.variables.require_as("selected_provider")?;
            let mut text = format!(
                "Thanks for confirming. Here is the link for the call: {BOOKING_LINK}\nSelected Provider: {}",
                provider.name
            );
            if let Some(fee) = &provider.base_fee {
                text.push_str(&format!("\nBase Fee: {fee}"));
            }
            ctx.emit(OutboundMessage::text(text));
            Ok(TurnSignal::Continue)
        });

    for (name, question) in NOTICE_FIELDS {
        hooks.on_enter(name, prompt(question)).on_exit(name, capture(name));
    }
    hooks
        .on_enter("generate_notice", generate_notice)
        .on_enter("ask_for_lawyer", yes_no(
            "Here is the first draft of your demand notice. Would you like to consult a lawyer on this?",
        ));

    hooks
        .on_enter("collect_details", |ctx| {
            ctx.emit(
                OutboundMessage::form(
                    "Please fill in the details below.",
                    FormSpec {
                        form_id: DISPUTE_FORM_ID.to_string(),
                        token: uuid::Uuid::new_v4().to_string(),
                    },
                )
                .with_header("Complaint Registration")
                .to_collaborator(CHANNEL_TAG),
            );
            Ok(TurnSignal::AwaitInput)
        })
        .on_enter("form_filled", form_filled)
        .on_enter("dispute_registered", |ctx| {
            let claimant = ctx.variables.require_str("c_name")?.to_string();
            let reference = uuid::Uuid::new_v4().simple().to_string();
            ctx.variables.set("dispute_reference", reference.clone());
            let mut text = format!(
                "Thank you, {claimant}. Your dispute has been registered with reference {reference}."
            );
            match ctx.variables.get(CLAIM_VALUE) {
                Some(serde_json::Value::String(claim)) => text.push_str(&format!("\nClaim value: {claim}")),
                Some(claim) => text.push_str(&format!("\nClaim value: {claim}")),
                None => {}
            }
            ctx.emit(OutboundMessage::text(text));
            Ok(TurnSignal::Continue)
        })
        .on_enter("ask_further_assistance", yes_no("Do you want help with anything else?"))
        .on_enter("choice_retry", notify("Sorry, I didn't get that. Please reply 1 for Yes or 2 for No."))
        .on_enter("end", |ctx| {
            ctx.emit(OutboundMessage::text("Thanks for giving us the opportunity to serve you!"));
            Ok(TurnSignal::Continue)
        });

    builder.build()
}

/// Renders the retrieval collaborator's result, delivered as this turn's input
fn render_answer(ctx: &mut EnterContext<'_>) -> Result<TurnSignal, FlowError> {
    let query = ctx.variables.require_str("query")?.to_string();
    let chunks = ctx
        .input()
        .and_then(|raw| serde_json::from_str::<RetrievalResult>(raw).ok())
        .map(|r| r.chunks)
        .unwrap_or_default();

    if chunks.is_empty() {
        tracing::warn!(state = %ctx.state(), "Retrieval returned no usable chunks");
        ctx.emit(OutboundMessage::text(
            "Sorry, I don't have information about this. Please try again with a different query.",
        ));
        return Ok(TurnSignal::Continue);
    }

    let knowledge: Vec<&str> = chunks.iter().map(|c| c.chunk.trim()).collect();
    let answer = format!("Here is what I found:\n{}", knowledge.join("\n"));

    let mut history: Vec<HistoryEntry> = ctx.variables.get_as("history")?.unwrap_or_default();
    history.push(HistoryEntry {
        name: "User".to_string(),
        message: query,
    });
    history.push(HistoryEntry {
        name: "Bot".to_string(),
        message: answer.clone(),
    });
    ctx.variables.set_json("history", &history)?;

    ctx.emit(OutboundMessage::text(answer));
    Ok(TurnSignal::Continue)
}

/// Dispatches the catalog search. Failures are absorbed: the hook apologises,
/// records `search_failed` and lets the graph route to recovery.
fn fetch_providers(ctx: &mut EnterContext<'_>, catalog: &dyn ProviderCatalog) -> Result<TurnSignal, FlowError> {
    match catalog.search() {
        Ok(providers) => {
            ctx.emit(OutboundMessage::text(
                "Here is a list of legal service providers who can help you. Please select one.",
            ));
            for (i, provider) in providers.iter().enumerate() {
                ctx.emit(
                    OutboundMessage::options(
                        provider.card(),
                        vec![OptionItem::new((i + 1).to_string(), "Book Appointment")],
                    )
                    .with_header(provider.name.clone()),
                );
            }
            ctx.variables.set_json("providers", &providers)?;
            ctx.variables.set("search_failed", false);
        }
        Err(e) => {
            tracing::warn!(state = %ctx.state(), error = %e, "Provider search failed");
            ctx.emit(OutboundMessage::text(
                "Sorry for the inconvenience, please try again after some time.",
            ));
            ctx.variables.set("search_failed", true);
        }
    }
    Ok(TurnSignal::Continue)
}

fn generate_notice(ctx: &mut EnterContext<'_>) -> Result<TurnSignal, FlowError> {
    let mut body = String::from("Demand notice draft\n");
    for (name, _) in NOTICE_FIELDS {
        let value = ctx.variables.require_str(name)?;
        body.push_str(&format!("{}: {value}\n", name.replace('_', " ")));
    }
    let cheque_number = ctx.variables.require_str("cheque_number")?.to_string();
    ctx.emit(OutboundMessage::document(
        body,
        Attachment {
            filename: format!("demand_notice_{cheque_number}.pdf"),
            mime_type: "application/pdf".to_string(),
        },
    ));
    Ok(TurnSignal::Continue)
}

/// Parses the form submission delivered as input. Only the dispute form
/// fields are copied into the variable store. A malformed or incomplete
/// submission sets `form_failed` instead of failing the turn.
fn form_filled(ctx: &mut EnterContext<'_>) -> Result<TurnSignal, FlowError> {
    let submission = ctx
        .input()
        .and_then(|raw| serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw).ok());

    let fields = submission.as_ref().and_then(|form| {
        let required = FORM_FIELDS
            .iter()
            .map(|name| {
                form.get(*name)
                    .and_then(serde_json::Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(|value| (*name, value.to_string()))
            })
            .collect::<Option<Vec<_>>>()?;
        let claim = form
            .get(CLAIM_VALUE)
            .filter(|value| value.is_string() || value.is_number())
            .cloned();
        Some((required, claim))
    });

    match fields {
        Some((required, claim)) => {
            for (name, value) in required {
                ctx.variables.set(name, value);
            }
            match claim {
                Some(claim) => ctx.variables.set(CLAIM_VALUE, claim),
                None => {
                    ctx.variables.remove(CLAIM_VALUE);
                }
            }
            ctx.variables.set("form_failed", false);
        }
        None => {
            tracing::warn!(state = %ctx.state(), "Dispute form submission incomplete");
            ctx.emit(OutboundMessage::text(
                "Sorry, the form could not be read. Please try again later.",
            ));
            ctx.variables.set("form_failed", true);
        }
    }
    Ok(TurnSignal::Continue)
}
