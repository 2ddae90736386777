pub mod agent;
pub mod entity;
pub mod names;

pub use agent::{Agent, AgentDirectory, NameLookup};
pub use entity::{exists, find_client, find_contract};

const PLACEHOLDER_REFERENCES: &[&str] = &["0", "null", "undefined", "none", "nan"];

/// False for blank references and the placeholders front ends send for
/// "no id" (`0`, `null`, `undefined`).
pub fn is_usable_reference(id: &str) -> bool {
    let trimmed = id.trim();
    !trimmed.is_empty()
        && !PLACEHOLDER_REFERENCES
            .iter()
            .any(|p| trimmed.eq_ignore_ascii_case(p))
}
