//! Polling webhook adapter.
//!
//! The messaging platform cannot hold a streaming response open. It posts a
//! message, takes a `stream` reply carrying a stream id, and keeps posting
//! `msgtype: stream` refreshes for that id until a reply says
//! `finish: true`. [`PollingBridge`] maps both calls onto the
//! [`GenerationTaskRegistry`]: the stream id is the task id.

use crate::WebhookError;
use crate::dedup::MessageDedup;
use crate::message::{InboundMessage, MsgType, Reply};
use hmac::{Hmac, Mac};
use pollbridge_agent::GenerationTaskRegistry;
use pollbridge_config::GatewayConfig;
use pollbridge_core::error::TaskError;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const IMAGES_UNSUPPORTED: &str = "I received your image, but image analysis is not supported yet. \
     Please describe your question in text.";
pub const TASK_EXPIRED: &str = "This answer has expired or no longer exists. Please ask again.";

/// Checks that a webhook body really came from the platform.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), WebhookError>;
}

/// HMAC-SHA256 over the raw body, hex encoded, with an optional
/// `sha256=` prefix.
pub struct HmacVerifier {
    secret: String,
}

impl HmacVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn sign(&self, payload: &[u8]) -> Result<String, WebhookError> {
        let mut mac = self.mac()?;
        mac.update(payload);
        Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }

    fn mac(&self) -> Result<HmacSha256, WebhookError> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| WebhookError::Signature(format!("unusable secret: {e}")))
    }
}

impl SignatureVerifier for HmacVerifier {
    fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), WebhookError> {
        let signature =
            signature.ok_or_else(|| WebhookError::Signature("missing signature".into()))?;
        let sig_hex = signature.strip_prefix("sha256=").unwrap_or(signature);
        let provided = hex::decode(sig_hex)
            .map_err(|_| WebhookError::Signature("signature is not hex".into()))?;

        let mut mac = self.mac()?;
        mac.update(payload);
        // constant-time
        mac.verify_slice(&provided)
            .map_err(|_| WebhookError::Signature("signature mismatch".into()))
    }
}

/// Accepts everything. Used when no secret is configured.
pub struct Unsigned;

impl SignatureVerifier for Unsigned {
    fn verify(&self, _payload: &[u8], _signature: Option<&str>) -> Result<(), WebhookError> {
        Ok(())
    }
}

pub fn verifier_for(config: &GatewayConfig) -> Arc<dyn SignatureVerifier> {
    match config.webhook_secret.as_deref() {
        Some(secret) if !secret.is_empty() => Arc::new(HmacVerifier::new(secret)),
        _ => Arc::new(Unsigned),
    }
}

pub struct PollingBridge {
    registry: Arc<GenerationTaskRegistry>,
    dedup: MessageDedup,
    verifier: Arc<dyn SignatureVerifier>,
}

impl PollingBridge {
    pub fn new(registry: Arc<GenerationTaskRegistry>, config: &GatewayConfig) -> Self {
        Self {
            registry,
            dedup: MessageDedup::new(
                config.dedup_capacity,
                Duration::from_secs(config.dedup_window_secs),
            ),
            verifier: verifier_for(config),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn registry(&self) -> &Arc<GenerationTaskRegistry> {
        &self.registry
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }

    /// Verify, parse and answer one webhook body. `Ok(None)` means the call
    /// is acknowledged with no reply.
    pub fn handle_body(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<Reply>, WebhookError> {
        self.verifier.verify(body, signature)?;
        let msg = InboundMessage::parse(body)?;
        Ok(self.handle(&msg))
    }

    pub fn handle(&self, msg: &InboundMessage) -> Option<Reply> {
        if !self.dedup.check_and_record(&msg.msgid) {
            debug!(msgid = %msg.msgid, "Duplicate message ignored");
            return None;
        }

        match msg.kind() {
            MsgType::Stream => match msg.stream_id() {
                Some(id) => Some(self.refresh(id)),
                None => {
                    warn!(msgid = %msg.msgid, "Stream refresh without a stream id");
                    None
                }
            },
            _ => self.new_message(msg),
        }
    }

    fn new_message(&self, msg: &InboundMessage) -> Option<Reply> {
        let question = msg.text_content();
        if question.trim().is_empty() {
            if !msg.image_urls().is_empty() {
                return Some(Reply::text(IMAGES_UNSUPPORTED));
            }
            return None;
        }

        let key = msg.conversation_key();
        info!(user = %msg.from.userid, conversation = %key, "Question received");
        let stream_id = self.registry.start(&question, &key);
        Some(self.refresh(&stream_id))
    }

    /// Poll the task once and answer with whatever it has.
    pub fn refresh(&self, stream_id: &str) -> Reply {
        match self.registry.poll(stream_id) {
            Ok(increment) => {
                if increment.finished {
                    self.registry.remove(stream_id);
                    info!(stream_id, "Stream finished");
                }
                Reply::stream(stream_id, increment.text, increment.finished)
            }
            Err(TaskError::NotFound(_)) => {
                debug!(stream_id, "Refresh for unknown stream");
                Reply::stream(stream_id, TASK_EXPIRED, true)
            }
            Err(e) => Reply::stream(stream_id, format!("Error: {e}"), true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pollbridge_agent::{ConversationSessionCache, SessionFactory};
    use pollbridge_config::{ReadMode, TaskConfig};
    use pollbridge_core::agent::{Agent, AgentStreamEvent};
    use pollbridge_core::error::GenerationError;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Echo;

    #[async_trait]
    impl Agent for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate_stream(
            &self,
            question: &str,
        ) -> Result<mpsc::Receiver<AgentStreamEvent>, GenerationError> {
            let (tx, rx) = mpsc::channel(4);
            let answer = format!("You asked: {question}");
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = tx.send(AgentStreamEvent::Chunk { content: answer }).await;
            });
            Ok(rx)
        }
    }

    struct EchoFactory;

    #[async_trait]
    impl SessionFactory for EchoFactory {
        async fn create(&self, _key: &str) -> Result<Arc<dyn Agent>, GenerationError> {
            Ok(Arc::new(Echo))
        }
    }

    fn bridge() -> PollingBridge {
        let sessions = Arc::new(ConversationSessionCache::new(Arc::new(EchoFactory)));
        let config = TaskConfig {
            read_mode: ReadMode::Accumulating,
            ..TaskConfig::default()
        };
        let registry = Arc::new(GenerationTaskRegistry::new(sessions, &config));
        PollingBridge::new(registry, &GatewayConfig::default())
    }

    fn text(msgid: &str, content: &str) -> InboundMessage {
        serde_json::from_value(json!({
            "msgid": msgid,
            "chattype": "single",
            "from": {"userid": "alice"},
            "msgtype": "text",
            "text": {"content": content}
        }))
        .unwrap()
    }

    fn refresh(msgid: &str, stream_id: &str) -> InboundMessage {
        serde_json::from_value(json!({
            "msgid": msgid,
            "from": {"userid": "alice"},
            "msgtype": "stream",
            "stream": {"id": stream_id}
        }))
        .unwrap()
    }

    fn stream_of(reply: Option<Reply>) -> crate::message::StreamReply {
        match reply {
            Some(Reply::Stream { stream }) => stream,
            other => panic!("expected stream reply, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn question_then_refreshes_until_finished() {
        let bridge = bridge();
        let first = stream_of(bridge.handle(&text("m1", "What time is it?")));
        assert!(!first.finish);
        assert_eq!(first.content, "");

        let mut n = 0;
        let last = loop {
            n += 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            let reply = stream_of(bridge.handle(&refresh(&format!("r{n}"), &first.id)));
            assert_eq!(reply.id, first.id);
            if reply.finish {
                break reply;
            }
            assert!(n < 50, "never finished");
        };
        assert_eq!(last.content, "You asked: What time is it?");
        assert!(bridge.registry().get(&first.id).is_none());

        let gone = stream_of(bridge.handle(&refresh("late", &first.id)));
        assert!(gone.finish);
        assert_eq!(gone.content, TASK_EXPIRED);
    }

    #[tokio::test]
    async fn duplicates_get_no_reply() {
        let bridge = bridge();
        assert!(bridge.handle(&text("m1", "hi")).is_some());
        assert!(bridge.handle(&text("m1", "hi")).is_none());
        assert_eq!(bridge.registry().len(), 1);
        assert_eq!(bridge.dedup_len(), 1);
    }

    #[tokio::test]
    async fn images_and_empty_messages() {
        let bridge = bridge();
        let image: InboundMessage = serde_json::from_value(json!({
            "msgid": "img",
            "from": {"userid": "alice"},
            "msgtype": "image",
            "image": {"url": "https://img/1"}
        }))
        .unwrap();
        assert_eq!(bridge.handle(&image), Some(Reply::text(IMAGES_UNSUPPORTED)));
        assert_eq!(bridge.handle(&text("blank", "   ")), None);
        assert!(bridge.registry().is_empty());
    }

    #[test]
    fn hmac_signatures() {
        let verifier = HmacVerifier::new("hook-secret");
        let body = br#"{"msgid":"m1"}"#;
        let signature = verifier.sign(body).unwrap();
        assert!(signature.starts_with("sha256="));

        assert!(verifier.verify(body, Some(&signature)).is_ok());
        assert!(verifier.verify(body, Some(&signature["sha256=".len()..])).is_ok());
        assert!(verifier.verify(b"tampered", Some(&signature)).is_err());
        assert!(verifier.verify(body, Some("sha256=zz")).is_err());
        assert!(verifier.verify(body, None).is_err());
    }

    #[tokio::test]
    async fn handle_body_checks_signature_first() {
        let bridge = bridge().with_verifier(Arc::new(HmacVerifier::new("s3cret")));
        let body = json!({
            "msgid": "m1",
            "from": {"userid": "alice"},
            "msgtype": "text",
            "text": {"content": "hi"}
        })
        .to_string();

        let err = bridge.handle_body(body.as_bytes(), Some("sha256=00")).unwrap_err();
        assert!(matches!(err, WebhookError::Signature(_)));
        assert!(bridge.registry().is_empty());

        let signature = HmacVerifier::new("s3cret").sign(body.as_bytes()).unwrap();
        let reply = bridge.handle_body(body.as_bytes(), Some(&signature)).unwrap();
        assert!(matches!(reply, Some(Reply::Stream { .. })));
    }

    #[test]
    fn empty_secret_means_unsigned() {
        let config = GatewayConfig {
            webhook_secret: Some(String::new()),
            ..GatewayConfig::default()
        };
        assert!(verifier_for(&config).verify(b"x", None).is_ok());
    }
}
