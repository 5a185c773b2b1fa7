use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Table,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Table => write!(f, "table"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorCode {
    Io,
    Encode,
    Decode,
    InvalidConfig,
    InvalidRowKey,
    InvalidVisibility,
    InvalidAuthorization,
    InvalidPattern,
    Unavailable,
    TableAlreadyExists,
    TableNotFound,
    FilterAlreadyAttached,
    MutationsRejected,
    TooManyRows,
    PermissionDenied,
}

impl ModelErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelErrorCode::Io => "io",
            ModelErrorCode::Encode => "encode",
            ModelErrorCode::Decode => "decode",
            ModelErrorCode::InvalidConfig => "invalid_config",
            ModelErrorCode::InvalidRowKey => "invalid_row_key",
            ModelErrorCode::InvalidVisibility => "invalid_visibility",
            ModelErrorCode::InvalidAuthorization => "invalid_authorization",
            ModelErrorCode::InvalidPattern => "invalid_pattern",
            ModelErrorCode::Unavailable => "unavailable",
            ModelErrorCode::TableAlreadyExists => "table_already_exists",
            ModelErrorCode::TableNotFound => "table_not_found",
            ModelErrorCode::FilterAlreadyAttached => "filter_already_attached",
            ModelErrorCode::MutationsRejected => "mutations_rejected",
            ModelErrorCode::TooManyRows => "too_many_rows",
            ModelErrorCode::PermissionDenied => "permission_denied",
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("invalid row key: {0}")]
    InvalidRowKey(String),
    #[error("invalid visibility expression '{expression}': {message}")]
    InvalidVisibility { expression: String, message: String },
    #[error("invalid authorization: {0}")]
    InvalidAuthorization(String),
    #[error("invalid row key pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },
    #[error("{resource_type} '{resource_id}' already exists")]
    AlreadyExists {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("filter '{filter}' is already attached to table '{table}'")]
    FilterAlreadyAttached { table: String, filter: String },
    #[error("mutations rejected by writer for table '{table}': {message}")]
    MutationsRejected { table: String, message: String },
    #[error("too many rows returned for a single row query (table: {table}, row key: {row_key})")]
    TooManyRows { table: String, row_key: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl ModelError {
    pub fn code(&self) -> ModelErrorCode {
        match self {
            ModelError::Io(_) => ModelErrorCode::Io,
            ModelError::Encode(_) => ModelErrorCode::Encode,
            ModelError::Decode(_) => ModelErrorCode::Decode,
            ModelError::InvalidConfig { .. } => ModelErrorCode::InvalidConfig,
            ModelError::InvalidRowKey(_) => ModelErrorCode::InvalidRowKey,
            ModelError::InvalidVisibility { .. } => ModelErrorCode::InvalidVisibility,
            ModelError::InvalidAuthorization(_) => ModelErrorCode::InvalidAuthorization,
            ModelError::InvalidPattern { .. } => ModelErrorCode::InvalidPattern,
            ModelError::Unavailable { .. } => ModelErrorCode::Unavailable,
            ModelError::AlreadyExists { resource_type, .. } => match resource_type {
                ResourceType::Table => ModelErrorCode::TableAlreadyExists,
            },
            ModelError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Table => ModelErrorCode::TableNotFound,
            },
            ModelError::FilterAlreadyAttached { .. } => ModelErrorCode::FilterAlreadyAttached,
            ModelError::MutationsRejected { .. } => ModelErrorCode::MutationsRejected,
            ModelError::TooManyRows { .. } => ModelErrorCode::TooManyRows,
            ModelError::PermissionDenied(_) => ModelErrorCode::PermissionDenied,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// True when the failure means "the table is missing"; callers typically
    /// create the table and retry.
    pub fn is_table_not_found(&self) -> bool {
        self.code() == ModelErrorCode::TableNotFound
    }

    pub fn table_not_found(table: impl Into<String>) -> Self {
        ModelError::NotFound {
            resource_type: ResourceType::Table,
            resource_id: table.into(),
        }
    }

    pub(crate) fn missing_config(key: &str) -> Self {
        ModelError::InvalidConfig {
            message: format!("configuration property {key} missing"),
        }
    }
}
