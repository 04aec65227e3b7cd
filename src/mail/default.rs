//! Default renderer and gateway implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use crate::error::TemplateError;
use crate::recipients::Recipient;

use super::{DispatchGateway, DispatchOutcome, RenderedMessage, TemplateRenderer};

/// Gateway that logs each would-be delivery and reports success. Used in
/// development and as the stand-in until a real transport is wired up.
#[derive(Debug, Default)]
pub struct LoggingDispatchGateway;

#[async_trait]
impl DispatchGateway for LoggingDispatchGateway {
    async fn send(&self, message: &RenderedMessage, recipient: &Recipient) -> DispatchOutcome {
        info!(
            recipient = %recipient.email,
            subject = %message.subject,
            "Dispatching message"
        );
        DispatchOutcome::Delivered
    }
}

/// Renderer that treats the template reference as the subject line and
/// substitutes `{{key}}` placeholders from recipient attributes into a
/// fixed body. Unknown placeholders are left untouched.
#[derive(Debug, Default)]
pub struct BasicTemplateRenderer;

impl TemplateRenderer for BasicTemplateRenderer {
    fn render(
        &self,
        template_ref: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<RenderedMessage, TemplateError> {
        if template_ref.trim().is_empty() {
            return Err(TemplateError {
                template_ref: template_ref.to_string(),
                reason: "template reference is empty".to_string(),
            });
        }

        let mut body = format!("Hello {{{{name}}}},\n\nThis is the '{template_ref}' message.\n");
        for (key, value) in attributes {
            body = body.replace(&format!("{{{{{key}}}}}"), value);
        }

        Ok(RenderedMessage {
            subject: template_ref.to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_substitutes_attributes() {
        let renderer = BasicTemplateRenderer;
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), "Ada".to_string());

        let message = renderer.render("welcome", &attributes).unwrap();
        assert_eq!(message.subject, "welcome");
        assert!(message.body.contains("Hello Ada,"));
    }

    #[test]
    fn renderer_leaves_unknown_placeholders() {
        let renderer = BasicTemplateRenderer;
        let message = renderer.render("welcome", &HashMap::new()).unwrap();
        assert!(message.body.contains("{{name}}"));
    }

    #[test]
    fn renderer_rejects_empty_reference() {
        let renderer = BasicTemplateRenderer;
        assert!(renderer.render("  ", &HashMap::new()).is_err());
    }

    #[tokio::test]
    async fn logging_gateway_always_delivers() {
        let gateway = LoggingDispatchGateway;
        let message = RenderedMessage {
            subject: "s".to_string(),
            body: "b".to_string(),
        };
        let outcome = gateway.send(&message, &Recipient::new("a@example.com")).await;
        assert!(outcome.is_delivered());
    }
}
