//! 工作表错误定义

use thiserror::Error;

/// 名称被拒绝的具体原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameIssue {
    /// 保留名称（关键字、坐标轴名称、内建函数）
    Reserved,
    /// 含有保留的 `__` 分隔符
    DoubleSeparator,
    /// 不符合标识符语法
    Malformed,
    /// 名称已被占用，且新值无法原地更新
    AlreadyUsed,
    /// 名称被限定给其他类别的实体
    RestrictedCategory(&'static str),
    /// 以 `_prime` 结尾的名称保留给函数的导数
    DerivativeReserved,
    /// 与已有的导数命名产生歧义
    DerivativeAmbiguous(String),
}

impl std::fmt::Display for NameIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameIssue::Reserved => write!(f, "reserved name"),
            NameIssue::DoubleSeparator => write!(f, "a name cannot contain \"__\""),
            NameIssue::Malformed => write!(f, "not a valid entity name"),
            NameIssue::AlreadyUsed => write!(f, "name already used"),
            NameIssue::RestrictedCategory(category) => {
                write!(f, "name is restricted to {} entities", category)
            }
            NameIssue::DerivativeReserved => write!(f, "name is reserved for a derivative"),
            NameIssue::DerivativeAmbiguous(existing) => {
                write!(f, "ambiguous with existing entity '{}'", existing)
            }
        }
    }
}

/// 工作表错误
#[derive(Debug, Clone, Error)]
pub enum SheetError {
    #[error("Name error for '{name}': {issue}")]
    Name { name: String, issue: NameIssue },

    #[error("Circular definition: '{name}' would depend on itself through '{via}'")]
    CircularDependency { name: String, via: String },

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Syntax error at {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("Forbidden keywords: {}", .0.join(", "))]
    Forbidden(Vec<String>),

    #[error("'{0}' cannot be deleted")]
    Protected(String),

    #[error("'{name}' is still used by: {}", .dependents.join(", "))]
    DependentsRemain { name: String, dependents: Vec<String> },

    #[error("No free name found for prefix '{0}' after 1000 attempts")]
    NameExhausted(String),

    #[error("Macro interrupted")]
    Cancelled,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl SheetError {
    pub fn name(name: impl Into<String>, issue: NameIssue) -> Self {
        SheetError::Name {
            name: name.into(),
            issue,
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        SheetError::Evaluation(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        SheetError::Type(message.into())
    }

    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        SheetError::Syntax {
            message: message.into(),
            position,
        }
    }

    /// 是否为致命错误（不应被容错模式吞掉）
    pub fn is_fatal(&self) -> bool {
        matches!(self, SheetError::NameExhausted(_) | SheetError::Protected(_))
    }
}

pub type SheetResult<T> = Result<T, SheetError>;
