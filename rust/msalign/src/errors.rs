use msfeat::errors::{
    DataProcessingError,
    MsfeatError,
};
use std::fmt::Display;

#[derive(Debug)]
pub enum MsalignError {
    Feature(MsfeatError),
    DataProcessing(DataProcessingError),
    Config { msg: String },
    Other(String),
}

impl Display for MsalignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl MsalignError {
    pub fn custom(msg: impl Display) -> Self {
        Self::Other(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MsalignError>;

impl From<MsfeatError> for MsalignError {
    fn from(x: MsfeatError) -> Self {
        Self::Feature(x)
    }
}

impl From<DataProcessingError> for MsalignError {
    fn from(x: DataProcessingError) -> Self {
        Self::DataProcessing(x)
    }
}
