use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Invalid crop geometry: {0}")]
    Geometry(String),

    #[error("Read error: {0}")]
    Read(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Invalid expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    #[error("Packaging failed ({status}): {output}")]
    Packaging { status: String, output: String },

    #[error("Invalid export options: {0}")]
    Options(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Failed to load color map '{name}': {message}")]
    Colormap { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        ExportError::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
