use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One request record on the command channel. `data` is itself a
/// JSON-encoded payload for the named command.
#[derive(Deserialize, Debug, Clone)]
pub struct CommandRequestDto {
    pub command: String,
    pub data: String,
}

/// Every reply is wrapped in a single-field object. `data` is the command
/// result, the string "void" for acknowledgements, or the string "nil" on
/// any parse or dispatch failure.
#[derive(Serialize, Debug, Clone)]
pub struct CommandResponseDto {
    pub data: Value,
}

impl CommandResponseDto {
    pub fn result(data: Value) -> Self {
        CommandResponseDto { data }
    }

    pub fn void() -> Self {
        CommandResponseDto { data: Value::String("void".to_string()) }
    }

    pub fn nil() -> Self {
        CommandResponseDto { data: Value::String("nil".to_string()) }
    }
}
