//! EventValidator - webhook request の認証とデコード
//!
//! # フロー
//! 1. `X-Hub-Signature-256` を共有 secret の HMAC-SHA256 と照合（定数時間比較）
//! 2. `X-GitHub-Event` で種類を判定（`workflow_job` 以外は UnsupportedEventKind）
//! 3. body を JSON としてデコードし `DomainEvent` に変換
//!
//! 副作用はない。ログを出すのも呼び出し側。

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::domain::{DomainEvent, JobAction, JobEvent, RunId, RunnerName, ValidationError};

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const WORKFLOW_JOB_KIND: &str = "workflow_job";

const SIGNATURE_PREFIX: &str = "sha256=";

/// A raw inbound request as seen by the validator.
#[derive(Debug, Clone, Copy)]
pub struct RawRequest<'a> {
    pub event_kind: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Deserialize)]
struct WorkflowJobPayload {
    action: String,
    workflow_job: WorkflowJob,
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct WorkflowJob {
    id: u64,
    runner_name: Option<String>,
    conclusion: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    html_url: Option<String>,
}

/// Authenticates and decodes lifecycle events.
#[derive(Clone)]
pub struct EventValidator {
    secret: Vec<u8>,
}

impl std::fmt::Debug for EventValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventValidator")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl EventValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn validate(&self, request: RawRequest<'_>) -> Result<DomainEvent, ValidationError> {
        self.verify_signature(request.signature, request.body)?;

        let kind = request.event_kind.unwrap_or_default();
        if kind != WORKFLOW_JOB_KIND {
            return Err(ValidationError::UnsupportedEventKind(kind.to_string()));
        }

        let payload: WorkflowJobPayload = serde_json::from_slice(request.body)
            .map_err(|e| ValidationError::UnparseableBody(e.to_string()))?;

        let job = payload.workflow_job;
        Ok(DomainEvent::Job(JobEvent {
            run_id: RunId::new(job.id),
            action: JobAction::parse(&payload.action),
            // 割り当て前の runner_name は null か空文字で届く
            runner_name: job
                .runner_name
                .filter(|name| !name.is_empty())
                .map(RunnerName::new),
            conclusion: job.conclusion,
            repository: payload.repository.and_then(|r| r.html_url),
            labels: job.labels,
        }))
    }

    fn verify_signature(&self, header: Option<&str>, body: &[u8]) -> Result<(), ValidationError> {
        let header = header.ok_or(ValidationError::InvalidSignature("missing signature header"))?;
        let hex_digest = header
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or(ValidationError::InvalidSignature("unsupported signature scheme"))?;
        let expected = hex::decode(hex_digest)
            .map_err(|_| ValidationError::InvalidSignature("signature is not hex"))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| ValidationError::InvalidSignature("unusable secret"))?;
        mac.update(body);
        // verify_slice は定数時間で比較する
        mac.verify_slice(&expected)
            .map_err(|_| ValidationError::InvalidSignature("digest mismatch"))
    }
}

/// Signature header value for `body`, as the upstream source would send it.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    const SECRET: &[u8] = b"It's a Secret to Everybody";

    fn payload(action: &str, runner: Option<&str>) -> Vec<u8> {
        let conclusion = (action == "completed").then_some("success");
        serde_json::to_vec(&json!({
            "action": action,
            "workflow_job": {
                "id": 42,
                "run_id": 7,
                "runner_name": runner,
                "conclusion": conclusion,
                "labels": ["self-hosted", "linux"],
            },
            "repository": { "html_url": "https://github.com/acme/widgets" },
        }))
        .unwrap()
    }

    fn request<'a>(kind: &'a str, signature: &'a str, body: &'a [u8]) -> RawRequest<'a> {
        RawRequest {
            event_kind: Some(kind),
            signature: Some(signature),
            body,
        }
    }

    #[test]
    fn decodes_signed_queued_event() {
        let validator = EventValidator::new(SECRET);
        let body = payload("queued", None);
        let sig = sign(SECRET, &body);

        let DomainEvent::Job(event) = validator
            .validate(request(WORKFLOW_JOB_KIND, &sig, &body))
            .unwrap();

        assert_eq!(event.run_id, RunId::new(42));
        assert_eq!(event.action, JobAction::Queued);
        assert!(event.runner_name.is_none());
        assert_eq!(event.repository.as_deref(), Some("https://github.com/acme/widgets"));
        assert_eq!(event.labels, vec!["self-hosted", "linux"]);
    }

    #[test]
    fn decodes_completed_event_with_runner() {
        let validator = EventValidator::new(SECRET);
        let body = payload("completed", Some("ferry-abc"));
        let sig = sign(SECRET, &body);

        let DomainEvent::Job(event) = validator
            .validate(request(WORKFLOW_JOB_KIND, &sig, &body))
            .unwrap();

        assert_eq!(event.action, JobAction::Completed);
        assert_eq!(event.runner_name, Some(RunnerName::new("ferry-abc")));
        assert_eq!(event.conclusion.as_deref(), Some("success"));
    }

    #[test]
    fn empty_runner_name_is_absent() {
        let validator = EventValidator::new(SECRET);
        let body = payload("in_progress", Some(""));
        let sig = sign(SECRET, &body);

        let DomainEvent::Job(event) = validator
            .validate(request(WORKFLOW_JOB_KIND, &sig, &body))
            .unwrap();
        assert!(event.runner_name.is_none());
    }

    #[test]
    fn unknown_action_is_not_an_error() {
        let validator = EventValidator::new(SECRET);
        let body = payload("waiting", None);
        let sig = sign(SECRET, &body);

        let DomainEvent::Job(event) = validator
            .validate(request(WORKFLOW_JOB_KIND, &sig, &body))
            .unwrap();
        assert_eq!(event.action, JobAction::Unknown("waiting".to_string()));
    }

    #[rstest]
    #[case::wrong_secret(Some("sha256=0000"))]
    #[case::missing(None)]
    #[case::sha1_scheme(Some("sha1=deadbeef"))]
    #[case::not_hex(Some("sha256=zz"))]
    fn rejects_bad_signatures(#[case] signature: Option<&str>) {
        let validator = EventValidator::new(SECRET);
        let body = payload("queued", None);

        let err = validator
            .validate(RawRequest {
                event_kind: Some(WORKFLOW_JOB_KIND),
                signature,
                body: &body,
            })
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSignature(_)));
    }

    #[test]
    fn signature_from_other_secret_is_rejected() {
        let validator = EventValidator::new(SECRET);
        let body = payload("queued", None);
        let sig = sign(b"another secret", &body);

        let err = validator
            .validate(request(WORKFLOW_JOB_KIND, &sig, &body))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSignature("digest mismatch")));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let validator = EventValidator::new(SECRET);
        let body = payload("queued", None);
        let sig = sign(SECRET, &body);
        let tampered = payload("completed", Some("ferry-abc"));

        let err = validator
            .validate(request(WORKFLOW_JOB_KIND, &sig, &tampered))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSignature(_)));
    }

    #[test]
    fn other_event_kinds_are_unsupported() {
        let validator = EventValidator::new(SECRET);
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let sig = sign(SECRET, body);

        let err = validator.validate(request("ping", &sig, body)).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedEventKind(kind) if kind == "ping"));
    }

    #[test]
    fn malformed_body_is_unparseable() {
        let validator = EventValidator::new(SECRET);
        let body = br#"{"action":"queued"}"#;
        let sig = sign(SECRET, body);

        let err = validator
            .validate(request(WORKFLOW_JOB_KIND, &sig, body))
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnparseableBody(_)));
    }
}
