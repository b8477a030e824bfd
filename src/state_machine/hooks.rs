//! State hooks and the output sink they emit through

use super::session::{FlowError, StateId, TurnSignal, Variables};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Outbound messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Options,
    Document,
    Form,
}

/// A selectable option rendered by the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionItem {
    pub id: String,
    pub label: String,
}

impl OptionItem {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Where a message is delivered.
///
/// A collaborator's eventual result comes back as the input of a later turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "tag", rename_all = "snake_case")]
pub enum Destination {
    #[default]
    Human,
    Collaborator(String),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Human => f.write_str("human"),
            Destination::Collaborator(tag) => f.write_str(tag),
        }
    }
}

/// File reference carried by a document message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
}

/// Rich form rendered by the channel; the submission arrives as JSON input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSpec {
    pub form_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub kind: MessageKind,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionItem>,
    #[serde(default)]
    pub destination: Destination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<FormSpec>,
    /// Channel dialog to render alongside the body, e.g. a language picker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog: Option<String>,
}

impl OutboundMessage {
    fn with_kind(kind: MessageKind, body: impl Into<String>) -> Self {
        Self {
            kind,
            body: body.into(),
            options: Vec::new(),
            destination: Destination::Human,
            header: None,
            attachment: None,
            form: None,
            dialog: None,
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::with_kind(MessageKind::Text, body)
    }

    pub fn options(body: impl Into<String>, options: Vec<OptionItem>) -> Self {
        let mut msg = Self::with_kind(MessageKind::Options, body);
        msg.options = options;
        msg
    }

    /// Numbered options starting at "1"
    pub fn menu<S: AsRef<str>>(body: impl Into<String>, labels: &[S]) -> Self {
        let options = labels
            .iter()
            .enumerate()
            .map(|(i, label)| OptionItem::new((i + 1).to_string(), label.as_ref()))
            .collect();
        Self::options(body, options)
    }

    pub fn yes_no(body: impl Into<String>) -> Self {
        Self::menu(body, &["Yes", "No"])
    }

    pub fn document(body: impl Into<String>, attachment: Attachment) -> Self {
        let mut msg = Self::with_kind(MessageKind::Document, body);
        msg.attachment = Some(attachment);
        msg
    }

    pub fn form(body: impl Into<String>, form: FormSpec) -> Self {
        let mut msg = Self::with_kind(MessageKind::Form, body);
        msg.form = Some(form);
        msg
    }

    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    #[must_use]
    pub fn with_dialog(mut self, dialog: impl Into<String>) -> Self {
        self.dialog = Some(dialog.into());
        self
    }

    /// Route to a named collaborator instead of the human
    #[must_use]
    pub fn to_collaborator(mut self, tag: impl Into<String>) -> Self {
        self.destination = Destination::Collaborator(tag.into());
        self
    }
}

/// Delivery boundary for everything a hook emits
pub trait OutputSink {
    fn emit(&mut self, message: OutboundMessage);
}

impl OutputSink for Vec<OutboundMessage> {
    fn emit(&mut self, message: OutboundMessage) {
        self.push(message);
    }
}

// ============================================================================
// Hook contexts
// ============================================================================

/// What an `on_enter` hook may see and touch.
///
/// The state id is read-only: hooks steer the conversation only through the
/// returned [`TurnSignal`] and the variables guards read.
pub struct EnterContext<'a> {
    state: &'a StateId,
    input: &'a mut Option<String>,
    pub variables: &'a mut Variables,
    sink: &'a mut dyn OutputSink,
}

impl<'a> EnterContext<'a> {
    pub(crate) fn new(
        state: &'a StateId,
        input: &'a mut Option<String>,
        variables: &'a mut Variables,
        sink: &'a mut dyn OutputSink,
    ) -> Self {
        Self {
            state,
            input,
            variables,
            sink,
        }
    }

    pub fn state(&self) -> &StateId {
        self.state
    }

    pub fn input(&self) -> Option<&str> {
        self.input.as_deref()
    }

    /// Input of the turn, failing when the turn carries none
    pub fn require_input(&self) -> Result<&str, FlowError> {
        self.input()
            .ok_or_else(|| FlowError::hook(format!("state `{}` requires an input", self.state)))
    }

    /// Replace the input seen by the next edge resolution of this turn
    pub fn reroute_input(&mut self, input: Option<String>) {
        *self.input = input;
    }

    pub fn emit(&mut self, message: OutboundMessage) {
        self.sink.emit(message);
    }
}

/// What an `on_exit` hook may see and touch: no signal, no state change
pub struct ExitContext<'a> {
    state: &'a StateId,
    input: Option<&'a str>,
    pub variables: &'a mut Variables,
    sink: &'a mut dyn OutputSink,
}

impl<'a> ExitContext<'a> {
    pub(crate) fn new(
        state: &'a StateId,
        input: Option<&'a str>,
        variables: &'a mut Variables,
        sink: &'a mut dyn OutputSink,
    ) -> Self {
        Self {
            state,
            input,
            variables,
            sink,
        }
    }

    pub fn state(&self) -> &StateId {
        self.state
    }

    pub fn input(&self) -> Option<&str> {
        self.input
    }

    pub fn emit(&mut self, message: OutboundMessage) {
        self.sink.emit(message);
    }
}

// ============================================================================
// Registry
// ============================================================================

pub type EnterFn = Arc<dyn Fn(&mut EnterContext<'_>) -> Result<TurnSignal, FlowError> + Send + Sync>;
pub type ExitFn = Arc<dyn Fn(&mut ExitContext<'_>) -> Result<(), FlowError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct StateHooks {
    pub on_enter: Option<EnterFn>,
    pub on_exit: Option<ExitFn>,
}

/// Explicit map from state id to its entry/exit logic, built once
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<StateId, StateHooks>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_enter<F>(&mut self, state: impl Into<StateId>, hook: F) -> &mut Self
    where
        F: Fn(&mut EnterContext<'_>) -> Result<TurnSignal, FlowError> + Send + Sync + 'static,
    {
        self.hooks.entry(state.into()).or_default().on_enter = Some(Arc::new(hook));
        self
    }

    pub fn on_exit<F>(&mut self, state: impl Into<StateId>, hook: F) -> &mut Self
    where
        F: Fn(&mut ExitContext<'_>) -> Result<(), FlowError> + Send + Sync + 'static,
    {
        self.hooks.entry(state.into()).or_default().on_exit = Some(Arc::new(hook));
        self
    }

    pub fn get(&self, state: &StateId) -> Option<&StateHooks> {
        self.hooks.get(state)
    }

    pub fn enter_hook(&self, state: &StateId) -> Option<&EnterFn> {
        self.hooks.get(state).and_then(|h| h.on_enter.as_ref())
    }

    pub fn exit_hook(&self, state: &StateId) -> Option<&ExitFn> {
        self.hooks.get(state).and_then(|h| h.on_exit.as_ref())
    }

    pub fn states(&self) -> impl Iterator<Item = &StateId> {
        self.hooks.keys()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut states: Vec<_> = self.hooks.keys().map(StateId::as_str).collect();
        states.sort_unstable();
        f.debug_struct("HookRegistry").field("states", &states).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_menu_numbers_options_from_one() {
        let msg = OutboundMessage::menu("Pick one", &["Get more info", "Consult a lawyer"]);
        assert_eq!(msg.kind, MessageKind::Options);
        assert_eq!(msg.options[0], OptionItem::new("1", "Get more info"));
        assert_eq!(msg.options[1], OptionItem::new("2", "Consult a lawyer"));
        assert_eq!(msg.destination, Destination::Human);
    }

    #[test]
    fn test_collaborator_destination_serializes_tag() {
        let msg = OutboundMessage::text("what is a demand notice?").to_collaborator("retrieval");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["destination"], json!({"type": "collaborator", "tag": "retrieval"}));
        assert_eq!(msg.destination.to_string(), "retrieval");
    }

    #[test]
    fn test_enter_context_reroute_input() {
        let state = StateId::from("process_choice");
        let mut input = Some("hello".to_string());
        let mut vars = Variables::new();
        let mut sink: Vec<OutboundMessage> = Vec::new();

        {
            let mut ctx = EnterContext::new(&state, &mut input, &mut vars, &mut sink);
            assert_eq!(ctx.input(), Some("hello"));
            ctx.reroute_input(Some("1".to_string()));
            ctx.variables.set("random_query", true);
            ctx.emit(OutboundMessage::text("ok"));
        }

        assert_eq!(input.as_deref(), Some("1"));
        assert!(vars.require_bool("random_query").unwrap());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_registry_keeps_enter_and_exit_together() {
        let mut registry = HookRegistry::new();
        registry
            .on_enter("ask_question", |_| Ok(TurnSignal::AwaitInput))
            .on_exit("ask_question", |ctx| {
                let query = ctx.input().unwrap_or_default().to_string();
                ctx.variables.set("query", query);
                Ok(())
            });

        let state = StateId::from("ask_question");
        assert!(registry.enter_hook(&state).is_some());
        assert!(registry.exit_hook(&state).is_some());
        assert!(registry.enter_hook(&StateId::from("other")).is_none());
    }
}
