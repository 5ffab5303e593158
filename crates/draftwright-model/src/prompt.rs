//! Prompt text for the two model rounds.

use serde_json::Value;

pub const SYSTEM_PROMPT: &str = "You edit structured game documents. \
You never see the whole document, only what is needed. \
Answer only with the requested JSON.";

const PATH_SYNTAX: &str = "Paths are dotted: system.traits.value. \
List elements are addressed by position (items[0].name), by id or name (items.a1.name), \
or by filter (items[?(@.type=='weapon')].name).";

/// First round: pick the paths the request touches.
#[must_use]
pub fn selection_prompt(instruction: &str, shape: &Value) -> String {
    format!(
        "Request: {instruction}\n\n\
         Document structure (types only):\n{shape:#}\n\n\
         {PATH_SYNTAX}\n\
         List the paths you need to read or change as {{\"paths\": [...]}}."
    )
}

/// Second round: propose the edits.
#[must_use]
pub fn edit_prompt(instruction: &str, context: &Value) -> String {
    format!(
        "Request: {instruction}\n\n\
         Relevant document fields:\n{context:#}\n\n\
         {PATH_SYNTAX}\n\
         Operations: set replaces a value, add appends to a list, remove drops matching list elements.\n\
         Respond with {{\"changes\": [{{\"path\": ..., \"value\": ..., \"operation\": ...}}], \"reason\": ...}}."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompts_embed_inputs() {
        let prompt = selection_prompt("make it fiery", &json!({ "name": "string" }));
        assert!(prompt.contains("make it fiery"));
        assert!(prompt.contains("\"name\": \"string\""));
        assert!(prompt.contains("{\"paths\": [...]}"));

        let prompt = edit_prompt("make it fiery", &json!({ "name": "Blade" }));
        assert!(prompt.contains("\"name\": \"Blade\""));
        assert!(prompt.contains("\"changes\""));
    }
}
