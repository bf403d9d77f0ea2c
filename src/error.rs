/// Broad failure category, used for the user-facing label and the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid CLI/env configuration.
    Config,
    /// Input series missing or unparseable.
    InputLoad,
    /// ODE integrator failed (non-finite state, step underflow, budget exhausted).
    Integration,
    /// Optimizer failed to converge or the bounds are infeasible.
    Fit,
    /// Terminal/chart backend failure.
    Render,
    /// Writing or reading an export file failed.
    Export,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Config => "configuration error",
            ErrorKind::InputLoad => "input load error",
            ErrorKind::Integration => "integration error",
            ErrorKind::Fit => "fit error",
            ErrorKind::Render => "render error",
            ErrorKind::Export => "export error",
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Config => 2,
            ErrorKind::InputLoad => 3,
            ErrorKind::Integration => 4,
            ErrorKind::Fit => 5,
            ErrorKind::Render => 6,
            ErrorKind::Export => 7,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn input_load(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputLoad, message)
    }

    pub fn integration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integration, message)
    }

    pub fn fit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fit, message)
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Render, message)
    }

    pub fn export(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Export, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
