use thiserror::Error;

/// 稳定错误码
///
/// 与其他语言的 SDK 保持一致的字符串表示，便于跨端排查问题。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    InvalidConfig,
    InvalidState,
    Timeout,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "ErrCodeAPIInvalidArgument",
            ErrorCode::InvalidConfig => "ErrCodeAPIInvalidConfig",
            ErrorCode::InvalidState => "ErrCodeInvalidStateError",
            ErrorCode::Timeout => "ErrCodeAPITimeoutError",
            ErrorCode::Internal => "ErrCodeInternalError",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    /// 调用方传入了非法参数，属于调用方的bug
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// 配置校验失败
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// 状态不允许该操作，例如组件已销毁或配额已耗尽
    #[error("invalid state: {0}")]
    State(String),
    /// 预留给外层传输适配器的超时错误
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// 预留给外层插件的内部错误
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// 返回该错误对应的稳定错误码
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            CoreError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            CoreError::State(_) => ErrorCode::InvalidState,
            CoreError::Timeout(_) => ErrorCode::Timeout,
            CoreError::Internal(_) => ErrorCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
