use crate::store::StoreError;

/// Entity named by a `NotFound` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Group,
    Resource,
    Reservation,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Group => "group",
            Entity::Resource => "resource",
            Entity::Reservation => "reservation",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(Entity, String),
    Mismatch { resource_id: String, group_id: String },
    Conflict(String),
    ResourceUnavailable(String),
    IdConflict(String),
    AlreadyCancelled(String),
    Storage(String),
}

/// Error classification. Callers branch on this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Mismatch,
    Conflict,
    ResourceUnavailable,
    IdConflict,
    AlreadyCancelled,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Mismatch => "mismatch",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ResourceUnavailable => "resource_unavailable",
            ErrorKind::IdConflict => "id_conflict",
            ErrorKind::AlreadyCancelled => "already_cancelled",
            ErrorKind::Storage => "storage",
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::NotFound(..) => ErrorKind::NotFound,
            EngineError::Mismatch { .. } => ErrorKind::Mismatch,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            EngineError::IdConflict(_) => ErrorKind::IdConflict,
            EngineError::AlreadyCancelled(_) => ErrorKind::AlreadyCancelled,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(entity, id) => write!(f, "{} not found: {id}", entity.as_str()),
            EngineError::Mismatch { resource_id, group_id } => {
                write!(f, "resource {resource_id} does not belong to group {group_id}")
            }
            EngineError::Conflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::ResourceUnavailable(id) => {
                write!(f, "resource {id} is not available for reservation")
            }
            EngineError::IdConflict(id) => write!(f, "reservation id {id} already exists, try again"),
            EngineError::AlreadyCancelled(id) => write!(f, "reservation {id} is already cancelled"),
            EngineError::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Storage(e.to_string())
    }
}
