//! Line commands typed at the prompt.

use std::path::PathBuf;

use serde_json::Value;

use jsonroom_core::{EditIntent, JsonPath, PatchError};

pub const HELP: &str = "\
commands:
  create                  create a room and join it
  join <room>             join an existing room
  set <path> <value>      set a value (JSON, or plain text as a string)
  del <path>              delete a key or array element
  replace <json>          replace the whole document
  patch <intent>          apply {\"full\": ..} or {\"path\": .., \"value\": ..}
  show                    print the document
  save <file>             write the document as pretty JSON
  status                  connection and room
  help                    this text
  quit                    leave";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create,
    Join(String),
    Edit(EditIntent),
    Show,
    Save(PathBuf),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb {
        "create" => Command::Create,
        "join" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("join <room>"));
            }
            Command::Join(rest.to_string())
        }
        "set" => {
            let (path, value) = rest
                .split_once(char::is_whitespace)
                .ok_or(CommandError::Usage("set <path> <value>"))?;
            Command::Edit(EditIntent::Set {
                path: JsonPath::parse_dotted(path),
                value: parse_value(value.trim()),
            })
        }
        "del" | "delete" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("del <path>"));
            }
            Command::Edit(EditIntent::Delete { path: JsonPath::parse_dotted(rest) })
        }
        "replace" => {
            let document: Value = serde_json::from_str(rest)
                .map_err(|e| PatchError::Malformed(format!("document is not JSON: {e}")))?;
            Command::Edit(EditIntent::Replace(document))
        }
        "patch" => Command::Edit(EditIntent::parse(rest)?),
        "show" => Command::Show,
        "save" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("save <file>"));
            }
            Command::Save(PathBuf::from(rest))
        }
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
