//! Mail dispatch seams
//!
//! The worker talks to the outside world through two traits: a renderer
//! that turns a template reference plus recipient attributes into a
//! message, and a gateway that delivers it. The default implementations
//! in [`default`] log instead of sending; real transports plug in behind
//! the same traits.

pub mod default;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::TemplateError;
use crate::recipients::Recipient;

/// A message rendered for one recipient, ready for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Per-recipient result reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// The gateway refused the message; counts as a recipient failure.
    Rejected(String),
    /// Send failed for infrastructure reasons; counts as a recipient
    /// failure and is covered by the job-level retry machinery.
    TransientError(String),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

/// Delivers one rendered message to one recipient.
#[async_trait]
pub trait DispatchGateway: Send + Sync {
    async fn send(&self, message: &RenderedMessage, recipient: &Recipient) -> DispatchOutcome;
}

/// Renders a template reference against a recipient's attributes.
pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        template_ref: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<RenderedMessage, TemplateError>;
}
