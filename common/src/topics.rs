pub const TOPIC_ROOT: &str = "climate";

/// Topic a message from `sender` to `recipient` is published on:
/// `climate/<recipient>/from/<sender>`.
pub fn message_topic(recipient: &str, sender: &str) -> String {
    format!("{TOPIC_ROOT}/{recipient}/from/{sender}")
}

/// Subscription filter covering every message addressed to `recipient`.
pub fn inbox_filter(recipient: &str) -> String {
    format!("{TOPIC_ROOT}/{recipient}/from/+")
}

/// Extract the sender from `climate/<recipient>/from/<sender>`, checking the
/// recipient matches.
pub fn extract_sender<'a>(topic: &'a str, recipient: &str) -> Option<&'a str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 4
        && parts[0] == TOPIC_ROOT
        && parts[1] == recipient
        && parts[2] == "from"
        && !parts[3].is_empty()
    {
        Some(parts[3])
    } else {
        None
    }
}

/// Identifiers end up as topic levels, so wildcard and separator characters
/// are not allowed.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '+', '#'])
}
