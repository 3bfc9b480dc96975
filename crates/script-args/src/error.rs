use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgsError {
    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("unterminated list starting at offset {offset}")]
    UnterminatedList { offset: usize },

    #[error("expected '=' after key '{key}' at offset {offset}")]
    MissingEquals { key: String, offset: usize },

    #[error("empty key at offset {offset}")]
    EmptyKey { offset: usize },

    #[error("invalid key '{key}' at offset {offset}: keys must start with a letter or '_'")]
    InvalidKey { key: String, offset: usize },

    #[error("lists nested deeper than {limit} levels at offset {offset}")]
    TooDeep { limit: usize, offset: usize },

    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEnd { offset: usize },
}

impl ArgsError {
    /// Byte offset into the input where the problem was detected.
    pub fn offset(&self) -> usize {
        match self {
            Self::UnterminatedString { offset }
            | Self::UnterminatedList { offset }
            | Self::MissingEquals { offset, .. }
            | Self::EmptyKey { offset }
            | Self::InvalidKey { offset, .. }
            | Self::TooDeep { offset, .. }
            | Self::UnexpectedChar { offset, .. }
            | Self::UnexpectedEnd { offset } => *offset,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArgsError>;
