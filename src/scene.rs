//! Scene model and validation.
//!
//! Scenes arrive as loosely-typed JSON ([`SceneDescription`]) and are accepted
//! through [`SceneDescription::validate`], which checks every constraint, fills
//! in defaults once and produces an immutable [`Scene`]. Engines only ever see
//! validated scenes.

use std::fmt;

use glam::Vec3;
use hashbrown::HashSet;
use itertools::Itertools;
use serde::Deserialize;
use thiserror::Error;

use crate::orientation::{spherical_to_direction, MAX_BEAM_WIDTH_DEG, MIN_BEAM_WIDTH_DEG};

/// Longest fade a source may configure, in seconds.
pub const MAX_FADE_SEC: f32 = 30.0;

/// Scene JSON as written by an editor.
///
/// Required fields are optional here so that a missing field is reported as a
/// [`Constraint::Required`] violation rather than a parse error.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDescription {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub global: Option<GlobalDescription>,
    pub sources: Option<Vec<SourceDescription>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalDescription {
    pub beam_width_deg: Option<f32>,
    pub normalize: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescription {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub azimuth_deg: Option<f32>,
    pub elevation_deg: Option<f32>,
    pub gain: Option<f32>,
    pub color: Option<String>,
    #[serde(rename = "loop")]
    pub looping: Option<bool>,
    pub fade_in_sec: Option<f32>,
    pub fade_out_sec: Option<f32>,
}

/// A fully-populated audio source.
///
/// Built either by validating a [`SourceDescription`] or directly with
/// [`AudioSource::new`] and the `with_*` methods, in which case it is checked
/// when the owning scene is built.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSource {
    pub id: String,
    pub name: Option<String>,
    pub url: String,
    /// -180..=180, 0 faces forward, positive turns right
    pub azimuth_deg: f32,
    /// -90..=90, positive tilts up
    pub elevation_deg: f32,
    /// 0..=1
    pub gain: f32,
    pub color: Option<String>,
    pub looping: bool,
    pub fade_in_sec: f32,
    pub fade_out_sec: f32,
}

impl AudioSource {
    /// A looping source at unit gain with no fades.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        azimuth_deg: f32,
        elevation_deg: f32,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            url: url.into(),
            azimuth_deg,
            elevation_deg,
            gain: 1.0,
            color: None,
            looping: true,
            fade_in_sec: 0.0,
            fade_out_sec: 0.0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_loop(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_fade_in(mut self, secs: f32) -> Self {
        self.fade_in_sec = secs;
        self
    }

    pub fn with_fade_out(mut self, secs: f32) -> Self {
        self.fade_out_sec = secs;
        self
    }

    /// Unit vector from the listener toward this source.
    pub fn direction(&self) -> Vec3 {
        spherical_to_direction(self.azimuth_deg, self.elevation_deg)
    }

    /// Fade-in length clamped to `0..=MAX_FADE_SEC`.
    pub fn fade_in(&self) -> f32 {
        clamp_fade(self.fade_in_sec)
    }

    /// Fade-out length clamped to `0..=MAX_FADE_SEC`.
    pub fn fade_out(&self) -> f32 {
        clamp_fade(self.fade_out_sec)
    }
}

#[inline]
fn clamp_fade(secs: f32) -> f32 {
    if secs.is_finite() { secs.clamp(0.0, MAX_FADE_SEC) } else { 0.0 }
}

/// A validated scene: the unit of "what to play".
#[derive(Clone, Debug, PartialEq)]
pub struct Scene {
    id: String,
    name: String,
    description: Option<String>,
    beam_width_deg: Option<f32>,
    normalize: Option<bool>,
    sources: Vec<AudioSource>,
}

impl Scene {
    /// Start building a scene in code.
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> SceneBuilder {
        SceneBuilder {
            id: id.into(),
            name: name.into(),
            description: None,
            beam_width_deg: None,
            normalize: None,
            sources: Vec::new(),
        }
    }

    /// Parse and validate scene JSON.
    pub fn from_json_str(json: &str) -> Result<Scene, SceneError> {
        let description: SceneDescription = serde_json::from_str(json)?;
        description.validate()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Beam width requested by the scene, if any.
    pub fn beam_width_deg(&self) -> Option<f32> {
        self.beam_width_deg
    }

    /// Normalization requested by the scene, if any.
    pub fn normalize(&self) -> Option<bool> {
        self.normalize
    }

    /// Sources in scene order. Never empty.
    pub fn sources(&self) -> &[AudioSource] {
        &self.sources
    }

    pub fn source(&self, id: &str) -> Option<&AudioSource> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Distinct asset URLs in first-use order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.url.as_str()).unique()
    }
}

/// Builder returned by [`Scene::builder`].
#[derive(Clone, Debug)]
pub struct SceneBuilder {
    id: String,
    name: String,
    description: Option<String>,
    beam_width_deg: Option<f32>,
    normalize: Option<bool>,
    sources: Vec<AudioSource>,
}

impl SceneBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn beam_width_deg(mut self, deg: f32) -> Self {
        self.beam_width_deg = Some(deg);
        self
    }

    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = Some(normalize);
        self
    }

    pub fn source(mut self, source: AudioSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = AudioSource>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Check every constraint and produce the scene.
    pub fn build(self) -> Result<Scene, SceneError> {
        let mut violations = Violations::default();
        if self.sources.is_empty() {
            violations.push("sources", Constraint::NotEmpty);
        }
        let sources = self.sources.into_iter().enumerate().collect();
        finish(
            self.id,
            self.name,
            self.description,
            self.beam_width_deg,
            self.normalize,
            sources,
            violations,
        )
    }
}

impl SceneDescription {
    /// Apply defaults and check every constraint.
    ///
    /// All violations are collected, not just the first.
    pub fn validate(self) -> Result<Scene, SceneError> {
        let mut violations = Violations::default();

        let id = violations.required("id", self.id);
        let name = violations.required("name", self.name);
        let (beam_width_deg, normalize) = self
            .global
            .map_or((None, None), |g| (g.beam_width_deg, g.normalize));

        let sources = match self.sources {
            None => {
                violations.push("sources", Constraint::Required);
                Vec::new()
            }
            Some(list) if list.is_empty() => {
                violations.push("sources", Constraint::NotEmpty);
                Vec::new()
            }
            Some(list) => list
                .into_iter()
                .enumerate()
                .filter_map(|(i, s)| s.into_source(i, &mut violations).map(|s| (i, s)))
                .collect(),
        };

        finish(
            id.unwrap_or_default(),
            name.unwrap_or_default(),
            self.description,
            beam_width_deg,
            normalize,
            sources,
            violations,
        )
    }
}

impl SourceDescription {
    fn into_source(self, index: usize, violations: &mut Violations) -> Option<AudioSource> {
        let path = |field: &str| format!("sources[{}].{}", index, field);

        let id = violations.required(path("id"), self.id);
        let url = violations.required(path("url"), self.url);
        let azimuth_deg = violations.required(path("azimuthDeg"), self.azimuth_deg);
        let elevation_deg = violations.required(path("elevationDeg"), self.elevation_deg);

        Some(AudioSource {
            id: id?,
            name: self.name,
            url: url?,
            azimuth_deg: azimuth_deg?,
            elevation_deg: elevation_deg?,
            gain: self.gain.unwrap_or(1.0),
            color: self.color,
            looping: self.looping.unwrap_or(true),
            fade_in_sec: self.fade_in_sec.unwrap_or(0.0),
            fade_out_sec: self.fade_out_sec.unwrap_or(0.0),
        })
    }
}

fn finish(
    id: String,
    name: String,
    description: Option<String>,
    beam_width_deg: Option<f32>,
    normalize: Option<bool>,
    sources: Vec<(usize, AudioSource)>,
    mut violations: Violations,
) -> Result<Scene, SceneError> {
    if let Some(deg) = beam_width_deg {
        violations.range("global.beamWidthDeg", deg, MIN_BEAM_WIDTH_DEG, MAX_BEAM_WIDTH_DEG);
    }

    let mut seen = HashSet::new();
    for (i, source) in &sources {
        let path = |field: &str| format!("sources[{}].{}", i, field);

        if source.id.is_empty() {
            violations.push(path("id"), Constraint::NotEmpty);
        } else if !seen.insert(source.id.as_str()) {
            violations.push(path("id"), Constraint::DuplicateId(source.id.clone()));
        }

        match url::Url::parse(&source.url) {
            Ok(_) => {}
            Err(e) => violations.push(path("url"), Constraint::InvalidUrl(e.to_string())),
        }

        violations.range(path("azimuthDeg"), source.azimuth_deg, -180.0, 180.0);
        violations.range(path("elevationDeg"), source.elevation_deg, -90.0, 90.0);
        violations.range(path("gain"), source.gain, 0.0, 1.0);
        violations.range(path("fadeInSec"), source.fade_in_sec, 0.0, MAX_FADE_SEC);
        violations.range(path("fadeOutSec"), source.fade_out_sec, 0.0, MAX_FADE_SEC);
    }
    drop(seen);

    if !violations.0.is_empty() {
        return Err(SceneError::Invalid(violations.0));
    }

    Ok(Scene {
        id,
        name,
        description,
        beam_width_deg,
        normalize,
        sources: sources.into_iter().map(|(_, s)| s).collect(),
    })
}

/// A constraint a scene field failed.
#[derive(Clone, Debug, PartialEq)]
pub enum Constraint {
    Required,
    NotEmpty,
    Range { min: f32, max: f32, actual: f32 },
    NotFinite,
    InvalidUrl(String),
    DuplicateId(String),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Required => write!(f, "is required"),
            Constraint::NotEmpty => write!(f, "must not be empty"),
            Constraint::Range { min, max, actual } => {
                write!(f, "must be within {}..={} (got {})", min, max, actual)
            }
            Constraint::NotFinite => write!(f, "must be a finite number"),
            Constraint::InvalidUrl(reason) => write!(f, "is not a valid URL ({})", reason),
            Constraint::DuplicateId(id) => write!(f, "duplicates source id {:?}", id),
        }
    }
}

/// One failed constraint, located by its JSON path (e.g. `sources[2].gain`).
#[derive(Clone, Debug, PartialEq)]
pub struct Violation {
    pub field: String,
    pub constraint: Constraint,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.constraint)
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("malformed scene JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid scene: {}", format_violations(.0))]
    Invalid(Vec<Violation>),
}

impl SceneError {
    /// Violations found during validation; empty for parse errors.
    pub fn violations(&self) -> &[Violation] {
        match self {
            SceneError::Invalid(v) => v,
            SceneError::Json(_) => &[],
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Default)]
struct Violations(Vec<Violation>);

impl Violations {
    fn push(&mut self, field: impl Into<String>, constraint: Constraint) {
        self.0.push(Violation { field: field.into(), constraint });
    }

    fn required<T>(&mut self, field: impl Into<String>, value: Option<T>) -> Option<T> {
        if value.is_none() {
            self.push(field, Constraint::Required);
        }
        value
    }

    fn range(&mut self, field: impl Into<String>, value: f32, min: f32, max: f32) {
        if !value.is_finite() {
            self.push(field, Constraint::NotFinite);
        } else if value < min || value > max {
            self.push(field, Constraint::Range { min, max, actual: value });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "id": "s1",
        "name": "Forest",
        "sources": [
            { "id": "a", "url": "https://example.com/a.ogg", "azimuthDeg": 0, "elevationDeg": 0 }
        ]
    }"#;

    #[test]
    fn defaults_are_filled_once() {
        let scene = Scene::from_json_str(MINIMAL).unwrap();
        let source = &scene.sources()[0];
        assert_eq!(source.gain, 1.0);
        assert!(source.looping);
        assert_eq!(source.fade_in_sec, 0.0);
        assert_eq!(source.fade_out_sec, 0.0);
        assert_eq!(scene.beam_width_deg(), None);
        assert_eq!(scene.normalize(), None);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r##"{
            "id": "s1", "name": "n", "extra": 4,
            "global": { "beamWidthDeg": 90, "normalize": false },
            "sources": [
                { "id": "a", "url": "file:///tmp/a.wav", "azimuthDeg": -180,
                  "elevationDeg": 90, "color": "#ff0000", "loop": false, "fadeOutSec": 2.5 }
            ]
        }"##;
        let scene = Scene::from_json_str(json).unwrap();
        assert_eq!(scene.beam_width_deg(), Some(90.0));
        assert_eq!(scene.normalize(), Some(false));
        let a = scene.source("a").unwrap();
        assert!(!a.looping);
        assert_eq!(a.fade_out(), 2.5);
        assert_eq!(a.color.as_deref(), Some("#ff0000"));
    }

    #[test]
    fn every_violation_is_reported_with_its_path() {
        let json = r#"{
            "name": "n",
            "global": { "beamWidthDeg": 2 },
            "sources": [
                { "id": "a", "url": "not a url", "azimuthDeg": 200, "elevationDeg": 0 },
                { "id": "a", "url": "https://x.test/b.mp3", "elevationDeg": 0, "gain": 1.5 }
            ]
        }"#;
        let err = Scene::from_json_str(json).unwrap_err();
        let fields: Vec<&str> = err.violations().iter().map(|v| v.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "id",
                "sources[1].azimuthDeg",
                "global.beamWidthDeg",
                "sources[0].url",
                "sources[0].azimuthDeg",
            ]
        );
        assert_eq!(
            err.violations()[4].constraint,
            Constraint::Range { min: -180.0, max: 180.0, actual: 200.0 }
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = Scene::builder("s", "n")
            .source(AudioSource::new("a", "https://x.test/a.ogg", 0.0, 0.0))
            .source(AudioSource::new("a", "https://x.test/b.ogg", 10.0, 0.0))
            .build()
            .unwrap_err();
        assert_eq!(
            err.violations(),
            &[Violation {
                field: "sources[1].id".into(),
                constraint: Constraint::DuplicateId("a".into()),
            }]
        );
    }

    #[test]
    fn empty_and_missing_sources() {
        let err = Scene::from_json_str(r#"{"id":"s","name":"n","sources":[]}"#).unwrap_err();
        assert_eq!(err.violations()[0].constraint, Constraint::NotEmpty);

        let err = Scene::from_json_str(r#"{"id":"s","name":"n"}"#).unwrap_err();
        assert_eq!(err.violations()[0].constraint, Constraint::Required);
    }

    #[test]
    fn non_finite_values_are_caught_in_code_built_scenes() {
        let err = Scene::builder("s", "n")
            .source(AudioSource::new("a", "https://x.test/a.ogg", f32::NAN, 0.0))
            .build()
            .unwrap_err();
        assert_eq!(err.violations()[0].constraint, Constraint::NotFinite);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = Scene::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, SceneError::Json(_)));
        assert!(err.violations().is_empty());
    }

    #[test]
    fn urls_are_deduplicated_in_order() {
        let scene = Scene::builder("s", "n")
            .source(AudioSource::new("a", "https://x.test/1.ogg", 0.0, 0.0))
            .source(AudioSource::new("b", "https://x.test/2.ogg", 0.0, 0.0))
            .source(AudioSource::new("c", "https://x.test/1.ogg", 0.0, 0.0))
            .build()
            .unwrap();
        let urls: Vec<&str> = scene.urls().collect();
        assert_eq!(urls, vec!["https://x.test/1.ogg", "https://x.test/2.ogg"]);
    }
}
