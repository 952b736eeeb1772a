//! `mail` plugin — sends one email via the DAG's configured SMTP relay.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

#[derive(Deserialize)]
struct MailConfig {
    smtp_host: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    from: String,
    to: Vec<String>,
    subject: String,
}

fn default_smtp_port() -> u16 {
    587
}

pub struct MailNode;

#[async_trait]
impl ExecutableNode for MailNode {
    async fn run(
        &self,
        _ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        let config: MailConfig = serde_json::from_value(req.config.clone())
            .map_err(|e| NodeError::Execution(format!("invalid mail config: {e}")))?;
        let body = req.script.clone().unwrap_or_default();

        let from: Mailbox = config.from.parse().map_err(|e| NodeError::Execution(format!("invalid from address: {e}")))?;
        let mut builder = Message::builder().from(from).subject(config.subject);
        for to in &config.to {
            let to: Mailbox = to.parse().map_err(|e| NodeError::Execution(format!("invalid to address: {e}")))?;
            builder = builder.to(to);
        }
        let message = builder.body(body).map_err(|e| NodeError::Execution(e.to_string()))?;

        let mut transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| NodeError::Execution(e.to_string()))?
            .port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            transport = transport.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let transport = transport.build();

        transport.send(message).await.map_err(|e| NodeError::Execution(e.to_string()))?;
        io.stdout.write_all(b"mail sent").await.ok();
        Ok(0)
    }
}
