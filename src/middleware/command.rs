//! Wire types for the per-request command stream.
//!
//! During one session the plugin drives the conversation: it sends
//! [`Command`]s and the host answers read-type commands with a matching
//! [`CommandResponse`]. Write-type commands are applied without an
//! acknowledgement.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered header pairs. Request headers preserve receipt order.
pub type HeaderPairs = Vec<(String, String)>;

/// One imperative command from the plugin. Exactly one variant per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    GetRequestBody,
    GetResponseBody,
    GetRequestHeaders,
    GetResponseHeaders,
    SetRequestHeaders {
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        uri: Option<String>,
    },
    SetResponseHeaders {
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    SetResponseStatus {
        code: u16,
    },
    SetRequestBody {
        #[serde(default)]
        data: Vec<u8>,
    },
    SetResponseBody {
        #[serde(default)]
        data: Vec<u8>,
    },
    ExecuteNext,
}

/// Host answer to a read-type command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum CommandResponse {
    RequestBody {
        data: Vec<u8>,
    },
    ResponseBody {
        data: Vec<u8>,
    },
    RequestHeaders {
        method: String,
        uri: String,
        headers: HeaderPairs,
    },
    ResponseHeaders {
        headers: HeaderPairs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_tagged_json() {
        let cmd: Command = serde_json::from_str(r#"{"command":"execute_next"}"#).unwrap();
        assert_eq!(cmd, Command::ExecuteNext);

        let cmd: Command = serde_json::from_str(
            r#"{"command":"set_request_headers","headers":{"x-a":"1"},"method":"POST"}"#,
        )
        .unwrap();
        match cmd {
            Command::SetRequestHeaders {
                headers,
                method,
                uri,
            } => {
                assert_eq!(headers.get("x-a").unwrap(), "1");
                assert_eq!(method.as_deref(), Some("POST"));
                assert!(uri.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn set_response_status_requires_a_code() {
        assert!(serde_json::from_str::<Command>(r#"{"command":"set_response_status"}"#).is_err());
        let cmd: Command =
            serde_json::from_str(r#"{"command":"set_response_status","code":429}"#).unwrap();
        assert_eq!(cmd, Command::SetResponseStatus { code: 429 });
    }
}
