//! Error types for the bridge.

/// Errors that can occur while driving the interpreter.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The interpreter reported an error; carries its diagnostic text.
    #[error("{0}")]
    Target(String),

    #[error("main thread is not in the event loop")]
    NotInEventLoop,

    #[error("interpreter called from a thread it is not bound to")]
    WrongThread,

    #[error("event loop is already running for this session")]
    PumpBusy,

    #[error("nesting too deep")]
    TooDeeplyNested,

    #[error("cannot represent value: {0}")]
    UnsupportedValue(String),

    #[error("expected integer but got \"{0}\"")]
    BadInteger(String),

    #[error("expected floating-point number but got \"{0}\"")]
    BadDouble(String),

    #[error("expected boolean but got \"{0}\"")]
    BadBoolean(String),

    #[error("file handlers are not supported with a threaded interpreter")]
    FileHandlersUnsupported,

    #[error("interrupted by host signal")]
    Interrupted,

    #[error("bridge session closed")]
    Closed,
}
