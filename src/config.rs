use anyhow::Result;

use crate::error::Error;

pub const DEFAULT_MAX_BONES: u32 = 2048;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    #[default]
    None,
    LowPower,
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(value: PowerPreference) -> Self {
        match value {
            PowerPreference::None => wgpu::PowerPreference::None,
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub power_preference: PowerPreference,
    pub force_fallback_adapter: bool,
}

/// Engine-wide settings. Every field may be omitted from the JSON form.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct SkinningConfig {
    /// Capacity of every instance's bone matrix buffer, and the upper bound of a valid bone index.
    pub max_bones: u32,
    pub adapter: AdapterConfig,
}

impl Default for SkinningConfig {
    fn default() -> Self {
        Self {
            max_bones: DEFAULT_MAX_BONES,
            adapter: Default::default(),
        }
    }
}

impl SkinningConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &str) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        log::debug!("Loading skinning config from {path}");
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_bones == 0 || self.max_bones > i32::MAX as u32 {
            return Err(Error::invalid_data(format!(
                "max_bones must be in 1..={}, got {}",
                i32::MAX,
                self.max_bones
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = SkinningConfig::from_json("{}").unwrap();

        assert_eq!(config, SkinningConfig::default());
        assert_eq!(config.max_bones, 2048);
    }

    #[test]
    fn fields_are_read_from_json() {
        let config = SkinningConfig::from_json(
            r#"{"max_bones": 64, "adapter": {"power_preference": "high_performance"}}"#,
        )
        .unwrap();

        assert_eq!(config.max_bones, 64);
        assert_eq!(
            config.adapter.power_preference,
            PowerPreference::HighPerformance
        );
        assert!(!config.adapter.force_fallback_adapter);
    }

    #[test]
    fn zero_bones_is_rejected() {
        assert!(SkinningConfig::from_json(r#"{"max_bones": 0}"#).is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(SkinningConfig::from_json("{max_bones: 1").is_err());
    }
}
