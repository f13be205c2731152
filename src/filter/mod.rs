//! Data-driven filter chain
//!
//! A [`FilterSpec`] is an ordered list of tagged stages, each carrying its own
//! parameters. The chain folds an image through the stages; a stage that
//! cannot produce output leaves every downstream stage without input and the
//! whole chain reports [`FilterError::EmptyResult`].

pub mod convert;
pub mod stages;

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{instrument, trace, warn};

use crate::error::FilterError;
pub use self::convert::{extent, image_from_frame, Image};

/// One stage of the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterStage {
    /// Sepia tone mapping blended by `intensity` in [0, 1]
    ToneMap { intensity: f32 },
    /// Instant-film stylisation
    Stylize,
    /// Radial darkening around the image centre
    Vignette {
        #[serde(default = "default_vignette_radius")]
        radius: f32,
        #[serde(default = "default_vignette_intensity")]
        intensity: f32,
    },
    /// A kind this build does not know. Always fails.
    #[serde(other)]
    Unknown,
}

fn default_vignette_radius() -> f32 {
    1.0
}

fn default_vignette_intensity() -> f32 {
    0.6
}

impl FilterStage {
    pub fn kind(&self) -> &'static str {
        match self {
            FilterStage::ToneMap { .. } => "tone_map",
            FilterStage::Stylize => "stylize",
            FilterStage::Vignette { .. } => "vignette",
            FilterStage::Unknown => "unknown",
        }
    }

    /// Run the stage. `None` in means `None` out.
    pub fn apply(&self, input: Option<Image>) -> Option<Image> {
        let input = input?;
        match *self {
            FilterStage::ToneMap { intensity } => {
                if !intensity.is_finite() {
                    return None;
                }
                Some(stages::tone_map(input, intensity))
            }
            FilterStage::Stylize => Some(stages::stylize(input)),
            FilterStage::Vignette { radius, intensity } => {
                if !(radius.is_finite() && radius > 0.0 && intensity.is_finite()) {
                    return None;
                }
                Some(stages::vignette(input, radius, intensity))
            }
            FilterStage::Unknown => None,
        }
    }
}

/// Ordered filter stages, fixed once a chain is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec {
    pub stages: Vec<FilterStage>,
}

impl FilterSpec {
    pub fn new(stages: Vec<FilterStage>) -> Self {
        Self { stages }
    }

    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }
}

impl Default for FilterSpec {
    /// Sepia at 0.8 followed by the instant-film look.
    fn default() -> Self {
        Self::new(vec![
            FilterStage::ToneMap { intensity: 0.8 },
            FilterStage::Stylize,
        ])
    }
}

/// Immutable filter chain
#[derive(Debug, Clone)]
pub struct FilterChain {
    spec: FilterSpec,
}

impl FilterChain {
    pub fn new(spec: FilterSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    /// Apply every stage in order.
    ///
    /// Once a stage produces nothing every downstream stage is left without
    /// input; the error names the first stage that produced nothing.
    #[instrument(level = "trace", skip_all, fields(stages = self.spec.stages.len()))]
    pub fn apply(&self, input: Image) -> Result<Image, FilterError> {
        let start = Instant::now();

        let result = self
            .spec
            .stages
            .iter()
            .enumerate()
            .try_fold(input, |image, (index, stage)| {
                let out = stage.apply(Some(image));
                trace!(stage = index, kind = stage.kind(), ok = out.is_some(), "stage done");
                out.ok_or_else(|| {
                    warn!(stage = index, kind = stage.kind(), "filter stage produced no output");
                    FilterError::EmptyResult {
                        stage: index,
                        kind: stage.kind(),
                    }
                })
            });

        metrics::histogram!("filter_time_us").record(start.elapsed().as_micros() as f64);
        result
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new(FilterSpec::default())
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn sample() -> Image {
        Image::from_fn(8, 6, |x, y| Rgba([(x * 30) as u8, (y * 40) as u8, 90, 255]))
    }

    #[test]
    fn empty_chain_returns_input_unchanged() {
        let chain = FilterChain::new(FilterSpec::empty());
        let input = sample();
        assert_eq!(chain.apply(input.clone()).unwrap(), input);
    }

    #[test]
    fn stages_run_in_order() {
        let chain = FilterChain::default();
        let input = sample();
        let expected = stages::stylize(stages::tone_map(input.clone(), 0.8));
        assert_eq!(chain.apply(input).unwrap(), expected);
    }

    #[test]
    fn failing_last_stage_discards_earlier_output() {
        let chain = FilterChain::new(FilterSpec::new(vec![
            FilterStage::ToneMap { intensity: 0.8 },
            FilterStage::Unknown,
        ]));
        let err = chain.apply(sample()).unwrap_err();
        assert_eq!(
            err,
            FilterError::EmptyResult {
                stage: 1,
                kind: "unknown"
            }
        );
    }

    #[test]
    fn failing_first_stage_short_circuits_the_rest() {
        let chain = FilterChain::new(FilterSpec::new(vec![
            FilterStage::ToneMap {
                intensity: f32::NAN,
            },
            FilterStage::Stylize,
        ]));
        let err = chain.apply(sample()).unwrap_err();
        assert_eq!(
            err,
            FilterError::EmptyResult {
                stage: 0,
                kind: "tone_map"
            }
        );
    }

    #[test]
    fn error_names_first_of_several_failing_stages() {
        let chain = FilterChain::new(FilterSpec::new(vec![
            FilterStage::Stylize,
            FilterStage::Vignette {
                radius: 0.0,
                intensity: 0.5,
            },
            FilterStage::Unknown,
        ]));
        assert_eq!(
            chain.apply(sample()).unwrap_err(),
            FilterError::EmptyResult {
                stage: 1,
                kind: "vignette"
            }
        );
    }

    #[test]
    fn out_of_range_intensity_is_clamped() {
        let input = sample();
        let over = FilterStage::ToneMap { intensity: 3.0 }.apply(Some(input.clone()));
        let full = FilterStage::ToneMap { intensity: 1.0 }.apply(Some(input));
        assert_eq!(over, full);
    }

    #[test]
    fn vignette_is_enabled_by_configuration_alone() {
        let chain = FilterChain::new(FilterSpec::new(vec![
            FilterStage::ToneMap { intensity: 0.8 },
            FilterStage::Stylize,
            FilterStage::Vignette {
                radius: 1.0,
                intensity: 0.6,
            },
        ]));
        let out = chain.apply(sample()).unwrap();
        assert_eq!(out.dimensions(), (8, 6));
    }

    #[test]
    fn stage_list_deserializes_with_unknown_kinds() {
        let toml = r#"
            stages = [
                { kind = "tone_map", intensity = 0.5 },
                { kind = "stylize" },
                { kind = "vignette" },
                { kind = "kaleidoscope" },
            ]
        "#;
        #[derive(Deserialize)]
        struct Wrapper {
            stages: FilterSpec,
        }
        let w: Wrapper = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(
            w.stages.stages,
            vec![
                FilterStage::ToneMap { intensity: 0.5 },
                FilterStage::Stylize,
                FilterStage::Vignette {
                    radius: 1.0,
                    intensity: 0.6
                },
                FilterStage::Unknown,
            ]
        );
    }
}
