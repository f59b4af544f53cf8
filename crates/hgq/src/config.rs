use crate::common::Map;

/// External configuration contract: a string key/value store supplied by
/// the surrounding negotiator. The engine only ever reads from it during
/// tree construction.
pub trait ConfigSource {
    fn lookup(&self, key: &str) -> Option<&str>;

    /// Read a floating-point setting restricted to `[min, max]`.
    /// Unparseable or out-of-range values are treated as unset, with a
    /// warning.
    fn param_f64_in_range(&self, key: &str, min: f64, max: f64) -> Option<f64> {
        let raw = self.lookup(key)?;
        match raw.trim().parse::<f64>() {
            Ok(value) if value >= min && value <= max => Some(value),
            Ok(value) => {
                log::warn!("config: {key} = {value} is outside [{min}, {max}], ignoring");
                None
            }
            Err(_) => {
                log::warn!("config: cannot parse {key} = \"{raw}\" as a number, ignoring");
                None
            }
        }
    }

    /// Read a boolean setting, falling back to `default` when unset or
    /// unrecognized.
    fn param_bool(&self, key: &str, default: bool) -> bool {
        let Some(raw) = self.lookup(key) else {
            return default;
        };
        match raw.trim().to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => true,
            "false" | "f" | "no" | "n" | "0" => false,
            _ => {
                log::warn!("config: cannot parse {key} = \"{raw}\" as a boolean, using default");
                default
            }
        }
    }
}

impl ConfigSource for Map<String, String> {
    fn lookup(&self, key: &str) -> Option<&str> {
        self.get(key).map(|value| value.as_str())
    }
}
