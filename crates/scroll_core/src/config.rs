use serde::Deserialize;
use shared::domain::PageIndex;

use crate::visibility::ObserveOptions;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Page requested at the start of every epoch.
    pub initial_page: PageIndex,
    pub observe: ObserveOptions,
}

impl ControllerConfig {
    pub fn with_initial_page(mut self, initial_page: PageIndex) -> Self {
        self.initial_page = initial_page;
        self
    }

    /// Clamps `threshold` into `0.0..=1.0`; a non-finite value leaves the
    /// current threshold in place.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        if threshold.is_finite() {
            self.observe.threshold = threshold.clamp(0.0, 1.0);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"observe":{"root_margin_px":200}}"#).expect("config");

        assert_eq!(config.initial_page, PageIndex(0));
        assert_eq!(config.observe.threshold, 0.1);
        assert_eq!(config.observe.root_margin_px, 200);
    }

    #[test]
    fn threshold_is_clamped() {
        let config = ControllerConfig::default()
            .with_initial_page(PageIndex(1))
            .with_threshold(4.0);
        assert_eq!(config.initial_page, PageIndex(1));
        assert_eq!(config.observe.threshold, 1.0);
        assert_eq!(config.with_threshold(f32::NAN).observe.threshold, 1.0);
    }
}
