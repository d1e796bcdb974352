//! Environment-driven configuration.
//!
//! Values are read from `FRAMESYNC_*` environment variables:
//!
//! | variable                   | meaning                                          | default |
//! |----------------------------|--------------------------------------------------|---------|
//! | `FRAMESYNC_BUFFER_DEPTH`   | fence ring depth, or `none`/`off` for no fences  | `3`     |
//! | `FRAMESYNC_FRAMES`         | frames the demo driver renders                   | `16`    |
//! | `FRAMESYNC_GPU_LATENCY_MS` | simulated time for a fence to signal             | `2`     |

use std::time::Duration;

use crate::error::{Error, Result};

const BUFFER_DEPTH_VAR: &str = "FRAMESYNC_BUFFER_DEPTH";
const FRAMES_VAR: &str = "FRAMESYNC_FRAMES";
const GPU_LATENCY_VAR: &str = "FRAMESYNC_GPU_LATENCY_MS";

/// Runtime configuration for a framesync host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSyncConfig {
    /// Fence ring depth for renderers; `None` disables fence emission.
    pub buffer_depth: Option<usize>,
    /// Number of frames to drive.
    pub frames: u32,
    /// Simulated GPU latency between fence creation and signal.
    pub gpu_latency: Duration,
}

impl Default for FrameSyncConfig {
    fn default() -> Self {
        Self {
            buffer_depth: Some(3),
            frames: 16,
            gpu_latency: Duration::from_millis(2),
        }
    }
}

impl FrameSyncConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup.
    ///
    /// Unset keys keep their default value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(BUFFER_DEPTH_VAR) {
            config.buffer_depth = parse_buffer_depth(&raw)?;
        }
        if let Some(raw) = lookup(FRAMES_VAR) {
            config.frames = parse_number(FRAMES_VAR, &raw)?;
        }
        if let Some(raw) = lookup(GPU_LATENCY_VAR) {
            config.gpu_latency = Duration::from_millis(parse_number(GPU_LATENCY_VAR, &raw)?);
        }

        Ok(config)
    }
}

fn parse_buffer_depth(raw: &str) -> Result<Option<usize>> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("none") || trimmed.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    parse_number(BUFFER_DEPTH_VAR, trimmed).map(Some)
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = FrameSyncConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, FrameSyncConfig::default());
        assert_eq!(config.buffer_depth, Some(3));
    }

    #[test]
    fn test_reads_all_values() {
        let config = FrameSyncConfig::from_lookup(lookup_from(&[
            (BUFFER_DEPTH_VAR, "0"),
            (FRAMES_VAR, " 120 "),
            (GPU_LATENCY_VAR, "7"),
        ]))
        .unwrap();

        assert_eq!(config.buffer_depth, Some(0));
        assert_eq!(config.frames, 120);
        assert_eq!(config.gpu_latency, Duration::from_millis(7));
    }

    #[test]
    fn test_buffer_depth_can_be_disabled() {
        for raw in ["none", "OFF", " Off "] {
            let config =
                FrameSyncConfig::from_lookup(lookup_from(&[(BUFFER_DEPTH_VAR, raw)])).unwrap();
            assert_eq!(config.buffer_depth, None, "input {raw:?}");
        }
    }

    #[test]
    fn test_rejects_garbage() {
        let err = FrameSyncConfig::from_lookup(lookup_from(&[(BUFFER_DEPTH_VAR, "-1")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains(BUFFER_DEPTH_VAR)));

        let err =
            FrameSyncConfig::from_lookup(lookup_from(&[(FRAMES_VAR, "lots")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
