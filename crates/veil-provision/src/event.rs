//! Progress events and their wire encoding
//!
//! Consumers see a sequence of `status:<step>:<phase>` tokens followed by
//! exactly one terminal token, either `error:<message>` (with the
//! distinguished `error:exists`) or `result:<json>`.

use std::fmt;

/// Workflow steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Check,
    Cleanup,
    Install,
    Keys,
    Config,
    Verify,
    Done,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Connect => "connect",
            Step::Check => "check",
            Step::Cleanup => "cleanup",
            Step::Install => "install",
            Step::Keys => "keys",
            Step::Config => "config",
            Step::Verify => "verify",
            Step::Done => "done",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    InProgress,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::InProgress => "inprogress",
            Phase::Done => "done",
        }
    }
}

/// One event on the provisioning progress stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionEvent {
    Status {
        step: Step,
        phase: Phase,
    },
    /// The host is already provisioned and overwrite was not requested.
    Exists,
    Error {
        message: String,
    },
    Result {
        vless_link: String,
        qr_code: String,
    },
}

impl ProvisionEvent {
    /// Wire encoding consumed by the HTTP streaming boundary.
    pub fn token(&self) -> String {
        match self {
            ProvisionEvent::Status { step, phase } => {
                format!("status:{}:{}", step.as_str(), phase.as_str())
            }
            ProvisionEvent::Exists => "error:exists".to_string(),
            ProvisionEvent::Error { message } => format!("error:{message}"),
            ProvisionEvent::Result { vless_link, qr_code } => format!(
                "result:{}",
                serde_json::json!({ "vless_link": vless_link, "qr_code": qr_code })
            ),
        }
    }

    /// Terminal events end the stream; exactly one occurs per run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProvisionEvent::Status { .. })
    }
}
