use serde::Deserialize;

/// Canvas-wide settings. Deserializable so a host can load them from a
/// config file; `Default` mirrors the original UI defaults.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CanvasConfig {
    /// When enabled, a newly placed worker node is wired to the first
    /// principal node automatically.
    pub auto_connect: bool,
    /// Base URL of the orchestration API.
    pub api_base_url: String,
    pub animation: AnimationConfig,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            api_base_url: "http://localhost:8000".to_string(),
            animation: AnimationConfig::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AnimationConfig {
    /// One full sweep of the run marker, in milliseconds.
    pub cycle_ms: u64,
    /// Fade-out after the sweep completes, in milliseconds.
    pub fade_ms: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            cycle_ms: 2500,
            fade_ms: 1200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_ui_expectations() {
        let config = CanvasConfig::default();
        assert!(config.auto_connect);
        assert_eq!(config.animation.cycle_ms, 2500);
        assert_eq!(config.animation.fade_ms, 1200);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: CanvasConfig =
            serde_json::from_str(r#"{ "auto_connect": false }"#).expect("valid config");
        assert!(!config.auto_connect);
        assert_eq!(config.api_base_url, "http://localhost:8000");
    }
}
