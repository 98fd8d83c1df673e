//! Topic naming and MQTT filter matching

use prisma_events_core::Operation;

/// `{prefix}/{entity_type}/{operation}`
pub fn publish_topic(prefix: &str, entity_type: &str, operation: Operation) -> String {
    format!("{}/{}/{}", prefix, entity_type, operation.as_str())
}

/// `{prefix}/{entity_type}/#`, matching every operation of one entity type
pub fn subscribe_topic(prefix: &str, entity_type: &str) -> String {
    format!("{}/{}/#", prefix, entity_type)
}

/// Entity type segment of a topic under `prefix`.
///
/// Returns `None` for topics outside the namespace or without an entity segment.
pub fn entity_type_from_topic<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let entity_type = rest.split('/').next()?;
    if entity_type.is_empty() {
        None
    } else {
        Some(entity_type)
    }
}

/// MQTT topic filter matching with `+` (one level) and `#` (rest, including
/// the parent level).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    // wildcards never match `$SYS`-style topics at the first level
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
