//! Logical model ids to concrete upstream models
//!
//! Clients name models through a family (`family-gpt-5.1`, or an alias the
//! operator configured). The family maps every such id onto one canonical
//! model. When the upstream catalog lacks it, a fallback is chosen
//! deterministically: the configured priority list first, then any catalog
//! entry that looks like a model of the family.

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use tollgate_config::{FamilyConfig, ModelFamilies};
use tollgate_core::Feature;

use crate::error::ResolveError;

/// The model a request will be served by
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub resolved_model: String,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug)]
struct Family {
    prefix: String,
    default_model: String,
    aliases: IndexMap<String, String>,
    fallback_priority: Vec<String>,
    naming_pattern: Regex,
    exclude: Vec<String>,
}

impl Family {
    fn compile(feature: Feature, config: &FamilyConfig) -> Result<Self, ResolveError> {
        let naming_pattern =
            Regex::new(&config.naming_pattern).map_err(|source| ResolveError::InvalidPattern { feature, source })?;

        Ok(Self {
            prefix: config.prefix.clone(),
            default_model: config.default_model.clone(),
            aliases: config.aliases.clone(),
            fallback_priority: config.fallback_priority.clone(),
            naming_pattern,
            exclude: config.exclude.iter().map(|e| e.to_ascii_lowercase()).collect(),
        })
    }

    fn canonical(&self, logical: Option<&str>) -> Result<&str, ResolveError> {
        let Some(logical) = logical.map(str::trim).filter(|id| !id.is_empty()) else {
            return Ok(&self.default_model);
        };

        if let Some(target) = self.aliases.get(logical) {
            return Ok(target);
        }

        if logical.starts_with(&self.prefix) {
            return Ok(&self.default_model);
        }

        Err(ResolveError::WrongProvider {
            model: logical.to_owned(),
        })
    }

    fn is_candidate(&self, model: &str) -> bool {
        let lowered = model.to_ascii_lowercase();
        self.naming_pattern.is_match(model) && !self.exclude.iter().any(|marker| lowered.contains(marker.as_str()))
    }
}

/// Per-feature family tables
#[derive(Debug)]
pub struct ModelResolver {
    chat: Family,
    image: Family,
    video: Family,
}

impl ModelResolver {
    pub fn new(families: &ModelFamilies) -> Result<Self, ResolveError> {
        Ok(Self {
            chat: Family::compile(Feature::Chat, &families.chat)?,
            image: Family::compile(Feature::Image, &families.image)?,
            video: Family::compile(Feature::Video, &families.video)?,
        })
    }

    const fn family(&self, feature: Feature) -> &Family {
        match feature {
            Feature::Chat => &self.chat,
            Feature::Image => &self.image,
            Feature::Video => &self.video,
        }
    }

    /// Resolve `logical` for `feature` against the upstream catalog
    ///
    /// `available = None` means the catalog is not known yet; the canonical
    /// model is used as is.
    pub fn resolve(
        &self,
        feature: Feature,
        logical: Option<&str>,
        available: Option<&[String]>,
    ) -> Result<Resolution, ResolveError> {
        let family = self.family(feature);
        let canonical = family.canonical(logical)?;

        let Some(available) = available else {
            return Ok(Resolution {
                resolved_model: canonical.to_owned(),
                used_fallback: false,
                fallback_reason: None,
            });
        };

        if available.iter().any(|m| m == canonical) {
            return Ok(Resolution {
                resolved_model: canonical.to_owned(),
                used_fallback: false,
                fallback_reason: None,
            });
        }

        if let Some(model) = family
            .fallback_priority
            .iter()
            .find(|candidate| available.contains(*candidate))
        {
            return Ok(Resolution {
                resolved_model: model.clone(),
                used_fallback: true,
                fallback_reason: Some(format!("{canonical} unavailable, using priority fallback {model}")),
            });
        }

        let newest = available
            .iter()
            .filter(|model| family.is_candidate(model))
            .min_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        if let Some(model) = newest {
            return Ok(Resolution {
                resolved_model: model.clone(),
                used_fallback: true,
                fallback_reason: Some(format!("{canonical} unavailable, using catalog model {model}")),
            });
        }

        Err(ResolveError::NoUsableModel {
            feature,
            canonical: canonical.to_owned(),
        })
    }
}
