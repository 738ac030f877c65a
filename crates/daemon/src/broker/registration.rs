use serde::{Deserialize, Serialize};

use common::attestation::AttestationToken;
use common::protocol::EncryptedMessage;

/// A workload instance believed to be live, as found by discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Registration {
    pub project_id: String,
    pub zone: String,
    pub instance_name: String,
    /// The token the instance most recently published
    pub attestation_token: AttestationToken,
}

impl Registration {
    pub fn matches(&self, project_id: &str, zone: &str, instance_name: &str) -> bool {
        self.instance_name == instance_name && self.zone == zone && self.project_id == project_id
    }

    /// Internal DNS name of the instance within its VPC
    pub fn internal_hostname(&self) -> String {
        format!(
            "{}.{}.c.{}.internal",
            self.instance_name, self.zone, self.project_id
        )
    }
}

/// A client-facing capability to reach one workload instance
///
/// Nothing but the instance's attestation token. The client verifies it to
/// learn the instance's key; the broker verifies it again when the client
/// presents it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(AttestationToken);

impl RequestToken {
    pub fn new(attestation_token: AttestationToken) -> Self {
        Self(attestation_token)
    }

    pub fn attestation_token(&self) -> &AttestationToken {
        &self.0
    }
}

impl From<&Registration> for RequestToken {
    fn from(registration: &Registration) -> Self {
        Self(registration.attestation_token.clone())
    }
}

/// One candidate of a forward request: a token and a payload sealed for the
/// instance it names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRequest {
    pub token: RequestToken,
    pub message: EncryptedMessage,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_internal_hostname() {
        let registration = Registration {
            project_id: "my-project".to_string(),
            zone: "us-central1-a".to_string(),
            instance_name: "workload-1".to_string(),
            attestation_token: AttestationToken::new("t"),
        };
        assert_eq!(
            registration.internal_hostname(),
            "workload-1.us-central1-a.c.my-project.internal"
        );
        assert!(registration.matches("my-project", "us-central1-a", "workload-1"));
        assert!(!registration.matches("my-project", "us-central1-b", "workload-1"));
    }

    #[test]
    fn test_workload_request_json() {
        let request = WorkloadRequest {
            token: RequestToken::new(AttestationToken::new("header.claims.sig")),
            message: EncryptedMessage::new(vec![1, 2, 3]),
        };

        let json = serde_json::to_value(vec![request.clone()]).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "token": "header.claims.sig", "message": "AQID" }])
        );

        let parsed: Vec<WorkloadRequest> = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, vec![request]);
    }
}
