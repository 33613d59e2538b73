use std::fmt::Display;

#[derive(Debug)]
pub enum DataProcessingError {
    ExpectedSlicesSameLength {
        expected: usize,
        other: usize,
        context: String,
    },
    ExpectedNonEmptyData {
        context: Option<String>,
    },
    ExpectedPositiveValue {
        value: f64,
        context: String,
    },
    ExpectedFiniteNonNanData {
        context: String,
    },
}

impl DataProcessingError {
    pub fn append_to_context(mut self, context: &str) -> Self {
        match &mut self {
            DataProcessingError::ExpectedSlicesSameLength {
                context: owned_context,
                ..
            } => {
                owned_context.push_str(context);
            }
            DataProcessingError::ExpectedNonEmptyData {
                context: owned_context,
            } => match owned_context {
                Some(x) => x.push_str(context),
                None => *owned_context = Some(context.to_string()),
            },
            DataProcessingError::ExpectedPositiveValue {
                context: owned_context,
                ..
            } => {
                owned_context.push_str(context);
            }
            DataProcessingError::ExpectedFiniteNonNanData {
                context: owned_context,
            } => {
                owned_context.push_str(context);
            }
        }
        self
    }
}

#[derive(Debug)]
pub enum MsfeatError {
    DataProcessing(DataProcessingError),
    LibraryParsing { msg: String },
    Other(String),
}

impl Display for MsfeatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl MsfeatError {
    pub fn custom(msg: impl Display) -> Self {
        Self::Other(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MsfeatError>;

/// Fail-fast guard for configuration values that must be positive and
/// finite.
pub fn check_positive(value: f64, context: &str) -> Result<()> {
    if value <= 0.0 || !value.is_finite() {
        return Err(DataProcessingError::ExpectedPositiveValue {
            value,
            context: context.to_string(),
        }
        .into());
    }
    Ok(())
}

impl From<DataProcessingError> for MsfeatError {
    fn from(x: DataProcessingError) -> Self {
        Self::DataProcessing(x)
    }
}

impl From<serde_json::Error> for MsfeatError {
    fn from(val: serde_json::Error) -> Self {
        MsfeatError::LibraryParsing {
            msg: val.to_string(),
        }
    }
}
