use thiserror::Error;

/// All error kinds a connection, room, or background task can surface.
///
/// Each variant maps to one of §7's error kinds; `.code()` is the string sent
/// to clients in the `error.details.code` field of a wire envelope.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid message format: {0}")]
    ProtocolDecode(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Role password required")]
    RolePasswordRequired,

    #[error("Room password required")]
    PasswordRequired,

    #[error("Incorrect room password")]
    PasswordIncorrect,

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Upstream session failure: {0}")]
    UpstreamFailure(String),

    #[error("Server memory pressure")]
    CapacityExceeded,

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Room not found: {id}")]
    RoomNotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Short error code string sent to clients in `error.details.code`.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::Config(_) => "CONFIG_ERROR",
            HubError::ProtocolDecode(_) => "PROTOCOL_DECODE",
            HubError::Unauthorized(_) => "UNAUTHORIZED",
            HubError::RolePasswordRequired => "ROLE_PASSWORD_REQUIRED",
            HubError::PasswordRequired => "PASSWORD_REQUIRED",
            HubError::PasswordIncorrect => "PASSWORD_INCORRECT",
            HubError::PermissionDenied { .. } => "PERMISSION_DENIED",
            HubError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            HubError::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            HubError::CapacityExceeded => "CAPACITY_EXCEEDED",
            HubError::ToolError(_) => "TOOL_ERROR",
            HubError::RoomNotFound { .. } => "ROOM_NOT_FOUND",
            HubError::Serialization(_) => "SERIALIZATION_ERROR",
            HubError::Io(_) => "IO_ERROR",
            HubError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error should close the socket (vs. a soft in-band reply).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HubError::Unauthorized(_) | HubError::RolePasswordRequired | HubError::CapacityExceeded
        )
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
