use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failures surfaced by the coordination primitives.
///
/// Expected control-flow outcomes (a lock held by someone else, consensus not yet
/// reached, a duplicate message) are *not* errors; they are returned as typed
/// outcome values by the components themselves.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CoordinationError {
    // Not found
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Resource is not locked: {0}")]
    NotLocked(String),

    #[error("Proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("Replica not found: {0}")]
    ReplicaNotFound(String),

    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("No pending conflict for key: {0}")]
    NoConflict(String),

    #[error("Message not in flight: {0}")]
    MessageNotInFlight(String),

    // Conflict
    #[error("Lock on {resource} is held by {holder}, not {requester}")]
    NotOwner {
        resource: String,
        holder: String,
        requester: String,
    },

    #[error("Node {node_id} already voted on proposal {proposal_id}")]
    AlreadyVoted {
        proposal_id: String,
        node_id: String,
    },

    #[error("Node {0} is the local node and cannot be removed")]
    LocalNode(String),

    #[error("Proposal {0} is already finalized")]
    ProposalClosed(String),

    #[error("Proposal already exists: {0}")]
    ProposalExists(String),

    #[error("Partition already exists: {0}")]
    PartitionExists(String),

    #[error("Replica already exists: {0}")]
    ReplicaExists(String),

    #[error("Stale write for {key}: version {attempted} is older than stored version {current}")]
    StaleVersion {
        key: String,
        attempted: u64,
        current: u64,
    },

    // Capacity / threshold
    #[error("No nodes available")]
    NoNodesAvailable,

    // Programmer errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinationError {
    /// Stable snake_case code for callers that branch on the failure kind.
    pub fn reason(&self) -> &'static str {
        match self {
            CoordinationError::NodeNotFound(_) => "node_not_found",
            CoordinationError::NotLocked(_) => "not_locked",
            CoordinationError::ProposalNotFound(_) => "proposal_not_found",
            CoordinationError::ReplicaNotFound(_) => "replica_not_found",
            CoordinationError::PartitionNotFound(_) => "partition_not_found",
            CoordinationError::ServiceNotFound(_) => "service_not_found",
            CoordinationError::NoConflict(_) => "no_conflict",
            CoordinationError::MessageNotInFlight(_) => "not_in_flight",
            CoordinationError::NotOwner { .. } => "not_owner",
            CoordinationError::AlreadyVoted { .. } => "already_voted",
            CoordinationError::LocalNode(_) => "local_node",
            CoordinationError::ProposalClosed(_) => "proposal_closed",
            CoordinationError::ProposalExists(_) => "proposal_exists",
            CoordinationError::PartitionExists(_) => "partition_exists",
            CoordinationError::ReplicaExists(_) => "replica_exists",
            CoordinationError::StaleVersion { .. } => "stale_version",
            CoordinationError::NoNodesAvailable => "no_nodes",
            CoordinationError::InvalidConfig(_) => "invalid_config",
            CoordinationError::Internal(_) => "internal",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoordinationError::NodeNotFound(_)
                | CoordinationError::NotLocked(_)
                | CoordinationError::ProposalNotFound(_)
                | CoordinationError::ReplicaNotFound(_)
                | CoordinationError::PartitionNotFound(_)
                | CoordinationError::ServiceNotFound(_)
                | CoordinationError::NoConflict(_)
                | CoordinationError::MessageNotInFlight(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoordinationError::NotOwner { .. }
                | CoordinationError::AlreadyVoted { .. }
                | CoordinationError::LocalNode(_)
                | CoordinationError::ProposalClosed(_)
                | CoordinationError::ProposalExists(_)
                | CoordinationError::PartitionExists(_)
                | CoordinationError::ReplicaExists(_)
                | CoordinationError::StaleVersion { .. }
        )
    }
}

impl From<serde_yaml::Error> for CoordinationError {
    fn from(err: serde_yaml::Error) -> Self {
        CoordinationError::InvalidConfig(format!("YAML error: {}", err))
    }
}

impl From<std::io::Error> for CoordinationError {
    fn from(err: std::io::Error) -> Self {
        CoordinationError::InvalidConfig(format!("IO error: {}", err))
    }
}

impl IntoResponse for CoordinationError {
    fn into_response(self) -> Response {
        let status = if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.is_conflict() {
            StatusCode::CONFLICT
        } else {
            match self {
                CoordinationError::NoNodesAvailable => StatusCode::SERVICE_UNAVAILABLE,
                CoordinationError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "reason": self.reason(),
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(CoordinationError::NotLocked("r".into()).reason(), "not_locked");
        assert_eq!(
            CoordinationError::AlreadyVoted {
                proposal_id: "p".into(),
                node_id: "n".into()
            }
            .reason(),
            "already_voted"
        );
        assert_eq!(CoordinationError::NoNodesAvailable.reason(), "no_nodes");
    }

    #[test]
    fn test_taxonomy() {
        assert!(CoordinationError::ProposalNotFound("p".into()).is_not_found());
        assert!(!CoordinationError::ProposalNotFound("p".into()).is_conflict());
        assert!(CoordinationError::NotOwner {
            resource: "r".into(),
            holder: "a".into(),
            requester: "b".into()
        }
        .is_conflict());
    }

    #[test]
    fn test_into_response_status() {
        let response = CoordinationError::ServiceNotFound("svc".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = CoordinationError::ProposalClosed("p".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = CoordinationError::NoNodesAvailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = CoordinationError::InvalidConfig("unknown algorithm".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
