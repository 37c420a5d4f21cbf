use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("response body read failed: {0}")]
    Body(String),
    #[error("http client could not be built: {0}")]
    Client(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid credential: {0}")]
    Authentication(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider response invalid: {0}")]
    MalformedResponse(String),
    #[error("provider stream reported an error: {0}")]
    Stream(String),
    #[error("request could not be encoded: {0}")]
    Encode(String),
    #[error("response task ended without a result")]
    Task,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("function not found within active tools: {0}")]
    NotFound(String),
    #[error("function name already registered in the active tool set: {name}")]
    DuplicateFunction { name: String },
    #[error("invalid argument '{parameter}' for {function}: {message}")]
    ArgumentDecode {
        function: String,
        parameter: String,
        message: String,
    },
    #[error("function execution failed: {0}")]
    Execution(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("rate limited after {attempts} retries")]
    RateLimited { attempts: u32 },
    #[error("tool loop exceeded ({max_iterations} dispatch rounds)")]
    ToolLoopExceeded { max_iterations: u32 },
    #[error("turn ended without final response")]
    MissingFinalResponse,
    #[error("message already has a response")]
    MessageCompleted,
    #[error("engine configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("document produced no text: {0}")]
    Empty(String),
}
