//! Legacy channel message events. The v1 room surface lives in
//! [`crate::portal`]; this records flat channel events for `/chat/send`.

use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::identifiers::deterministic_id;
use crate::store::{self, MessageEvent};
use crate::validation::validate_chat_payload;

pub fn record_message_event(
    conn: &Connection,
    run_id: &str,
    payload: &Map<String, Value>,
    caller_account_id: &str,
) -> Result<()> {
    let validated = validate_chat_payload(payload)?;
    store::insert_message_event(
        conn,
        &MessageEvent {
            message_id: deterministic_id("message", run_id),
            channel: validated.channel,
            sender_account_id: caller_account_id.to_string(),
            body: validated.message,
            run_id: run_id.to_string(),
        },
    )
}
