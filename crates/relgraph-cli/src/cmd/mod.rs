pub mod delete_stream;
pub mod due_executions;
pub mod init;
pub mod next_slot;
pub mod project;
pub mod refresh_contract;
pub mod search_orgs;

use anyhow::Result;
use serde_json::Value;

/// Print `value` as pretty JSON, or the human rendering otherwise.
pub fn emit(json: bool, value: &Value, human: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human());
    }
    Ok(())
}
