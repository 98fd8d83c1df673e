//! Emission-control flag carried in mutation arguments

use prisma_events_shared::EmitConfig;
use serde_json::Value;
use tracing::warn;

/// Argument key holding the emission-control flag
pub const EMIT_FLAG: &str = "emit";

/// Where a mutation's event goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitFlags {
    /// Run local listeners
    pub local: bool,
    /// Publish to the broker
    pub remote: bool,
}

impl EmitFlags {
    /// Explicit flags
    pub fn new(local: bool, remote: bool) -> Self {
        Self { local, remote }
    }

    /// Local listeners and broker
    pub fn all() -> Self {
        Self::new(true, true)
    }

    /// Local listeners only
    pub fn local_only() -> Self {
        Self::new(true, false)
    }

    /// No emission at all
    pub fn none() -> Self {
        Self::new(false, false)
    }
}

impl Default for EmitFlags {
    fn default() -> Self {
        Self::all()
    }
}

impl From<&EmitConfig> for EmitFlags {
    fn from(config: &EmitConfig) -> Self {
        Self::new(config.local, config.remote)
    }
}

/// Strip the `emit` key from `args` and resolve it against `defaults`.
///
/// `emit: false` silences both sides, `emit: { remote: false }` only the
/// broker; missing sides keep their default. Any other value is ignored.
pub fn split_emit_flag(mut args: Value, defaults: EmitFlags) -> (Value, EmitFlags) {
    let flag = match args.as_object_mut() {
        Some(map) => map.remove(EMIT_FLAG),
        None => None,
    };

    let flags = match flag {
        None => defaults,
        Some(Value::Bool(enabled)) => EmitFlags::new(enabled, enabled),
        Some(Value::Object(sides)) => EmitFlags::new(
            sides.get("local").and_then(Value::as_bool).unwrap_or(defaults.local),
            sides.get("remote").and_then(Value::as_bool).unwrap_or(defaults.remote),
        ),
        Some(other) => {
            warn!(value = %other, "Ignoring unrecognised emit flag");
            defaults
        }
    };

    (args, flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_flag_keeps_defaults() {
        let (args, flags) = split_emit_flag(json!({"data": {"a": 1}}), EmitFlags::local_only());
        assert_eq!(args, json!({"data": {"a": 1}}));
        assert_eq!(flags, EmitFlags::local_only());
    }

    #[test]
    fn test_boolean_flag() {
        let (args, flags) = split_emit_flag(json!({"data": {}, "emit": false}), EmitFlags::all());
        assert_eq!(args, json!({"data": {}}));
        assert_eq!(flags, EmitFlags::none());
    }

    #[test]
    fn test_object_flag_merges_with_defaults() {
        let (args, flags) = split_emit_flag(
            json!({"where": {"id": 1}, "emit": {"remote": false}}),
            EmitFlags::all(),
        );
        assert_eq!(args, json!({"where": {"id": 1}}));
        assert_eq!(flags, EmitFlags::new(true, false));
    }

    #[test]
    fn test_unrecognised_flag_is_stripped() {
        let (args, flags) = split_emit_flag(json!({"emit": "yes"}), EmitFlags::none());
        assert_eq!(args, json!({}));
        assert_eq!(flags, EmitFlags::none());
    }

    #[test]
    fn test_from_config() {
        let config = EmitConfig {
            local: true,
            remote: false,
        };
        assert_eq!(EmitFlags::from(&config), EmitFlags::local_only());
    }
}
