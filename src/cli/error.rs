//! Process exit codes for scripted use of the CLI

pub const SUCCESS: i32 = 0;
/// A download failed or a command could not complete
pub const ERROR: i32 = 1;
pub const NOT_FOUND: i32 = 2;
/// Bad URL or other unusable argument
pub const INVALID_INPUT: i32 = 3;

/// Exit code for an error that escaped a command handler
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<url::ParseError>().is_some() {
        INVALID_INPUT
    } else if err
        .downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
    {
        NOT_FOUND
    } else {
        ERROR
    }
}
