//! Topic routing of decoded messages to application handlers.
//!
//! The handler table is built once with [`DispatcherBuilder`] and is
//! immutable afterwards. Each handler runs in isolation: an error or a panic
//! is logged against the connection and never reaches the decode loop.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use devlink_frame::{TopicField, TopicKey};
use tokio::sync::mpsc;

use crate::connection::{Health, LogLevel};
use crate::registry::ConnectionRegistry;

/// Error returned by an application handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(value: serde_json::Error) -> Self {
        Self(value.to_string())
    }
}

impl From<devlink_frame::FrameError> for HandlerError {
    fn from(value: devlink_frame::FrameError) -> Self {
        Self(value.to_string())
    }
}

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Queue of raw bytes to write on a connection, drained by its session.
pub type Outbox = mpsc::UnboundedSender<Bytes>;

/// What a handler sees besides the message itself.
#[derive(Clone)]
pub struct DispatchContext {
    uuid: String,
    registry: ConnectionRegistry,
    outbox: Option<Outbox>,
}

impl DispatchContext {
    pub fn new(uuid: impl Into<String>, registry: ConnectionRegistry, outbox: Option<Outbox>) -> Self {
        Self {
            uuid: uuid.into(),
            registry,
            outbox,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn health(&self) -> Option<Health> {
        self.registry.get(&self.uuid).map(|c| c.health)
    }

    /// Append to this connection's log ring.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.registry.log(&self.uuid, level, message);
    }

    /// Queue already-framed bytes for this connection. Written after the
    /// current inbound chunk has been fully dispatched.
    pub fn reply(&self, bytes: impl Into<Bytes>) -> HandlerResult {
        let outbox = self
            .outbox
            .as_ref()
            .ok_or_else(|| HandlerError::new("connection has no outbound path"))?;
        outbox
            .send(bytes.into())
            .map_err(|_| HandlerError::new("connection session has stopped"))
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("uuid", &self.uuid)
            .field("outbox", &self.outbox.is_some())
            .finish()
    }
}

/// Handler for messages of one topic.
pub trait TopicHandler<M>: Send + Sync {
    fn handle(&self, message: &M, ctx: &DispatchContext) -> HandlerResult;
}

impl<M, F> TopicHandler<M> for F
where
    F: Fn(&M, &DispatchContext) -> HandlerResult + Send + Sync,
{
    fn handle(&self, message: &M, ctx: &DispatchContext) -> HandlerResult {
        self(message, ctx)
    }
}

type TextHandler = Arc<dyn Fn(&str, &DispatchContext) -> HandlerResult + Send + Sync>;
type BinaryHandler = Arc<dyn Fn(&Bytes, &DispatchContext) -> HandlerResult + Send + Sync>;

/// Result of routing one decoded item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and returned `Ok`.
    Handled,
    /// The handler returned an error or panicked.
    Failed,
    /// No handler is registered for this topic.
    Unknown(TopicKey),
    /// The message carries no routable topic field.
    Unrouted,
    /// Text or SLIP frame with no handler configured.
    Ignored,
}

/// Builder for an immutable [`TopicDispatcher`].
pub struct DispatcherBuilder<M> {
    topic_field: String,
    handlers: HashMap<TopicKey, Arc<dyn TopicHandler<M>>>,
    fallback: Option<Arc<dyn TopicHandler<M>>>,
    text: Option<TextHandler>,
    binary: Option<BinaryHandler>,
}

impl<M: TopicField> DispatcherBuilder<M> {
    pub fn new(topic_field: impl Into<String>) -> Self {
        Self {
            topic_field: topic_field.into(),
            handlers: HashMap::new(),
            fallback: None,
            text: None,
            binary: None,
        }
    }

    /// Register a closure for `topic`. A later registration for the same
    /// topic replaces the earlier one.
    pub fn on<F>(self, topic: impl Into<TopicKey>, handler: F) -> Self
    where
        F: Fn(&M, &DispatchContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(topic, handler)
    }

    /// Register any [`TopicHandler`] for `topic`.
    pub fn route(mut self, topic: impl Into<TopicKey>, handler: impl TopicHandler<M> + 'static) -> Self {
        self.handlers.insert(topic.into(), Arc::new(handler));
        self
    }

    /// Handler for messages with an unknown or missing topic. Runs after
    /// the warning has been logged; the outcome still reports the miss.
    pub fn fallback<F>(mut self, handler: F) -> Self
    where
        F: Fn(&M, &DispatchContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(handler));
        self
    }

    /// Handler for complete text lines.
    pub fn on_text(
        mut self,
        handler: impl Fn(&str, &DispatchContext) -> HandlerResult + Send + Sync + 'static,
    ) -> Self {
        self.text = Some(Arc::new(handler));
        self
    }

    /// Handler for SLIP frames.
    pub fn on_binary(
        mut self,
        handler: impl Fn(&Bytes, &DispatchContext) -> HandlerResult + Send + Sync + 'static,
    ) -> Self {
        self.binary = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> TopicDispatcher<M> {
        TopicDispatcher {
            topic_field: self.topic_field,
            handlers: self.handlers,
            fallback: self.fallback,
            text: self.text,
            binary: self.binary,
        }
    }
}

/// Immutable topic to handler table.
pub struct TopicDispatcher<M> {
    topic_field: String,
    handlers: HashMap<TopicKey, Arc<dyn TopicHandler<M>>>,
    fallback: Option<Arc<dyn TopicHandler<M>>>,
    text: Option<TextHandler>,
    binary: Option<BinaryHandler>,
}

impl<M: TopicField> TopicDispatcher<M> {
    pub fn builder(topic_field: impl Into<String>) -> DispatcherBuilder<M> {
        DispatcherBuilder::new(topic_field)
    }

    pub fn topic_field(&self) -> &str {
        &self.topic_field
    }

    pub fn has_topic(&self, topic: &TopicKey) -> bool {
        self.handlers.contains_key(topic)
    }

    pub fn topics(&self) -> Vec<TopicKey> {
        self.handlers.keys().cloned().collect()
    }

    /// Route a decoded message by its topic field.
    pub fn dispatch(&self, message: &M, ctx: &DispatchContext) -> DispatchOutcome {
        let Some(topic) = message.topic(&self.topic_field) else {
            ctx.log(
                LogLevel::Warning,
                format!("message has no routable `{}` field", self.topic_field),
            );
            self.run_fallback(message, ctx);
            return DispatchOutcome::Unrouted;
        };
        let Some(handler) = self.handlers.get(&topic) else {
            ctx.log(LogLevel::Warning, format!("no handler for topic `{topic}`"));
            self.run_fallback(message, ctx);
            return DispatchOutcome::Unknown(topic);
        };
        invoke(&format!("topic `{topic}`"), ctx, || handler.handle(message, ctx))
    }

    fn run_fallback(&self, message: &M, ctx: &DispatchContext) {
        if let Some(fallback) = &self.fallback {
            invoke("fallback handler", ctx, || fallback.handle(message, ctx));
        }
    }

    /// Log a text line and hand it to the text handler, if any.
    pub fn dispatch_text(&self, line: &str, ctx: &DispatchContext) -> DispatchOutcome {
        ctx.log(LogLevel::Info, line);
        match &self.text {
            Some(handler) => invoke("text handler", ctx, || handler(line, ctx)),
            None => DispatchOutcome::Ignored,
        }
    }

    pub fn dispatch_binary(&self, frame: &Bytes, ctx: &DispatchContext) -> DispatchOutcome {
        match &self.binary {
            Some(handler) => invoke("binary handler", ctx, || handler(frame, ctx)),
            None => {
                ctx.log(
                    LogLevel::Warning,
                    format!("unhandled SLIP frame ({} bytes)", frame.len()),
                );
                DispatchOutcome::Ignored
            }
        }
    }
}

impl<M> fmt::Debug for TopicDispatcher<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicDispatcher")
            .field("topic_field", &self.topic_field)
            .field("topics", &self.handlers.len())
            .field("fallback", &self.fallback.is_some())
            .field("text", &self.text.is_some())
            .field("binary", &self.binary.is_some())
            .finish()
    }
}

fn invoke(what: &str, ctx: &DispatchContext, f: impl FnOnce() -> HandlerResult) -> DispatchOutcome {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => DispatchOutcome::Handled,
        Ok(Err(err)) => {
            ctx.log(LogLevel::Error, format!("{what} failed: {err}"));
            DispatchOutcome::Failed
        }
        Err(payload) => {
            ctx.log(
                LogLevel::Error,
                format!("{what} panicked: {}", panic_message(payload.as_ref())),
            );
            DispatchOutcome::Failed
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
