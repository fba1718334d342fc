//! Phenotype definitions: the data that turns the generic engine into one classifier.
//!
//! A definition names its collector filters, its criteria table, its tier priority order
//! and the rules that map satisfied criteria onto tiers. Definitions are JSON, validated
//! once at load time; a definition that loads is internally consistent.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::collector::Collector;
use super::types::{Tier, TierRank};
use super::window::WindowBuilder;
use crate::config;
use crate::models::Certainty;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Failed to read phenotype definition {0}: {1}")]
    Load(String, String),

    #[error("Failed to parse phenotype definition {0}: {1}")]
    Parse(String, String),

    #[error("Unknown phenotype '{0}'")]
    UnknownPhenotype(String),

    #[error("Invalid criterion name '{0}'")]
    InvalidName(String),

    #[error("Criterion '{0}' is defined more than once")]
    DuplicateCriterion(String),

    #[error("Criterion '{criterion}' references '{reference}', which is not defined before it")]
    UnknownReference { criterion: String, reference: String },

    #[error("Criterion '{criterion}' needs a per-date criterion but '{reference}' is not one")]
    NotDateLocal { criterion: String, reference: String },

    #[error("Criterion '{0}' has an empty concept selector")]
    EmptySelector(String),

    #[error("Criterion '{0}' has an invalid day interval")]
    InvalidInterval(String),

    #[error("Criterion '{0}' has an invalid minimum count")]
    InvalidCount(String),

    #[error("Definition has no tiers")]
    NoTiers,

    #[error("Tier '{0}' is defined more than once")]
    DuplicateTier(String),

    #[error("Rule '{rule}' targets unknown tier '{tier}'")]
    UnknownTier { rule: String, tier: String },

    #[error("Rule '{0}' requires no criteria")]
    EmptyRule(String),

    #[error("Rule '{rule}' references undefined criterion '{criterion}'")]
    UnknownRuleCriterion { rule: String, criterion: String },

    #[error("Rule '{rule}' dates on '{criterion}', which it does not require")]
    IndexNotRequired { rule: String, criterion: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

// ---------------------------------------------------------------------------
// Collector and window settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertaintyPolicy {
    /// Keep Positive mentions only (unless the negation override matches).
    #[default]
    RequirePositive,
    /// Keep every certainty; criteria select on certainty themselves.
    Any,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum HistoryPolicy {
    #[default]
    Exclude,
    AllowCodes {
        codes: Vec<String>,
    },
    AllowAll,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub excluded_sections: Vec<String>,
    /// Codes kept even inside excluded sections.
    #[serde(default)]
    pub exempt_codes: Vec<String>,
    #[serde(default)]
    pub certainty: CertaintyPolicy,
    /// Regex over the sentence text that keeps a non-positive mention.
    #[serde(default)]
    pub negation_override: Option<String>,
    #[serde(default)]
    pub history: HistoryPolicy,
    /// Regexes over the whole sentence text; a match drops every mention in the sentence.
    #[serde(default)]
    pub sentence_exclusions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPatientPolicy {
    #[default]
    Keep,
    Skip,
    Reject,
}

/// How the optional reference-date table cuts a patient's notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutoffPolicy {
    /// Drop notes on the reference date as well as after it.
    #[serde(default = "default_true")]
    pub inclusive: bool,
    #[serde(default)]
    pub missing_patient: MissingPatientPolicy,
    #[serde(default = "default_id_width")]
    pub patient_id_width: usize,
}

impl Default for CutoffPolicy {
    fn default() -> Self {
        Self {
            inclusive: true,
            missing_patient: MissingPatientPolicy::Keep,
            patient_id_width: config::DEFAULT_PATIENT_ID_WIDTH,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Anchor texts that shrink any window to their own sentence; `*` suffix is a prefix match.
    #[serde(default)]
    pub same_sentence_terms: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationScope {
    /// Each date is classified from its own notes.
    #[default]
    Date,
    /// Each date is classified from all notes up to and including it.
    History,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportGranularity {
    #[default]
    Patient,
    Date,
}

// ---------------------------------------------------------------------------
// Criteria
// ---------------------------------------------------------------------------

/// Numeric value carried in the normalized code, e.g. `TEMPERATURE-101.2` or `ABI~0.8~0.7`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementSpec {
    pub prefix: String,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub at_least: Option<f64>,
    #[serde(default)]
    pub at_most: Option<f64>,
}

/// A regular expression kept in its compiled form, written as its source string.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Self)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source)
            .map_err(|e| serde::de::Error::custom(format!("invalid pattern '{source}': {e}")))
    }
}

/// Rejects a match by the text that follows it, e.g. a list answer `"Amputation. No"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextExclusion {
    /// Covered texts (case-insensitive) the check applies to; empty means every text.
    #[serde(default)]
    pub texts: Vec<String>,
    /// Tested against the mention's following text; anchor with `^` to match right after it.
    pub following: Pattern,
}

/// Selects mentions by code and optional constraints. A selector list matches a mention
/// when any of its entries does.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConceptMatch {
    #[serde(default)]
    pub codes: Vec<String>,
    /// Match every normalized code; the other constraints still apply.
    #[serde(default)]
    pub any_code: bool,
    #[serde(default)]
    pub measurement: Option<MeasurementSpec>,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub certainty: Option<Certainty>,
    /// Covered texts (case-insensitive) that never match.
    #[serde(default)]
    pub excluded_texts: Vec<String>,
    #[serde(default)]
    pub excluded_contexts: Vec<ContextExclusion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Locality {
    SameDate,
    SameDocument,
    SameSection,
    SameSentence,
    Window {
        sentence_distance: u32,
        #[serde(default)]
        forward_only: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyScope {
    #[default]
    Document,
    Window,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncertaintySpec {
    #[serde(rename = "match")]
    pub matcher: Vec<ConceptMatch>,
    #[serde(default)]
    pub scope: UncertaintyScope,
    /// Name of the criterion that receives demoted pairings.
    pub demoted: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximitySpec {
    pub anchor: Vec<ConceptMatch>,
    pub modifier: Vec<ConceptMatch>,
    pub locality: Locality,
    /// Any match on the date vetoes the date.
    #[serde(default)]
    pub unless: Vec<ConceptMatch>,
    #[serde(default)]
    pub uncertainty: Option<UncertaintySpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    #[default]
    Earliest,
    Listed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CriterionKind {
    Concept {
        #[serde(rename = "match")]
        matcher: Vec<ConceptMatch>,
    },
    Proximity(ProximitySpec),
    Recurrence {
        of: String,
        min_interval_days: i64,
        max_interval_days: i64,
    },
    AtLeast {
        of: Vec<String>,
        min: usize,
    },
    AnyOf {
        of: Vec<String>,
        #[serde(default)]
        prefer: Preference,
    },
}

impl CriterionKind {
    /// Concept and proximity criteria are evaluated per date; the rest combine dates.
    pub fn is_date_local(&self) -> bool {
        matches!(self, Self::Concept { .. } | Self::Proximity(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: CriterionKind,
}

impl CriterionSpec {
    /// Criterion names this entry produces (a proximity criterion with an uncertainty
    /// clause also produces its demoted criterion).
    pub fn outputs(&self) -> Vec<&str> {
        match &self.kind {
            CriterionKind::Proximity(ProximitySpec {
                uncertainty: Some(u),
                ..
            }) => vec![self.name.as_str(), u.demoted.as_str()],
            _ => vec![self.name.as_str()],
        }
    }

    fn references(&self) -> Vec<&str> {
        match &self.kind {
            CriterionKind::Recurrence { of, .. } => vec![of.as_str()],
            CriterionKind::AtLeast { of, .. } | CriterionKind::AnyOf { of, .. } => {
                of.iter().map(String::as_str).collect()
            }
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tiers and rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TierSpec {
    Name(String),
    Labeled { name: String, label: String },
}

impl TierSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Labeled { name, .. } => name,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Labeled { label, .. } => label,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexDateMode {
    /// All criteria must co-occur: the latest qualifying date.
    #[default]
    Latest,
    /// Any one criterion suffices: the earliest qualifying date.
    Earliest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub tier: String,
    pub requires: Vec<String>,
    #[serde(default)]
    pub absent: Vec<String>,
    /// Criteria the index date is taken from; defaults to `requires`.
    #[serde(default)]
    pub index_criteria: Vec<String>,
    #[serde(default)]
    pub index_date: IndexDateMode,
}

impl RuleSpec {
    /// Explicit name, else the required criteria joined with `:`.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.requires.join(":"))
    }

    pub fn dating_criteria(&self) -> &[String] {
        if self.index_criteria.is_empty() {
            &self.requires
        } else {
            &self.index_criteria
        }
    }
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhenotypeDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub cutoff: CutoffPolicy,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub scope: EvaluationScope,
    #[serde(default)]
    pub report: ReportGranularity,
    pub criteria: Vec<CriterionSpec>,
    /// Highest priority first; the last tier is the bottom tier.
    pub tiers: Vec<TierSpec>,
    pub rules: Vec<RuleSpec>,
}

/// A validated definition with its compiled collector and window settings.
#[derive(Debug)]
pub struct Phenotype {
    pub definition: PhenotypeDefinition,
    pub collector: Collector,
    pub windows: WindowBuilder,
    tiers: Vec<Tier>,
    rules_by_tier: Vec<Vec<usize>>,
}

const BUILTIN_PHENOTYPES: &[(&str, &str)] = &[
    ("asthma", include_str!("../../resources/phenotypes/asthma.json")),
    ("asthma_api", include_str!("../../resources/phenotypes/asthma_api.json")),
    ("pad", include_str!("../../resources/phenotypes/pad.json")),
    ("pad_note", include_str!("../../resources/phenotypes/pad_note.json")),
    ("tha_fixation", include_str!("../../resources/phenotypes/tha_fixation.json")),
    ("tha_bearing", include_str!("../../resources/phenotypes/tha_bearing.json")),
    ("tha_fracture", include_str!("../../resources/phenotypes/tha_fracture.json")),
    ("heart_failure", include_str!("../../resources/phenotypes/heart_failure.json")),
];

impl Phenotype {
    pub fn from_definition(definition: PhenotypeDefinition) -> Result<Self, DefinitionError> {
        validate_criteria(&definition.criteria)?;
        let (tiers, rules_by_tier) = resolve_tiers(&definition)?;
        let collector = Collector::from_config(&definition.collector)?;
        let windows = WindowBuilder::from_config(&definition.window);
        Ok(Self {
            definition,
            collector,
            windows,
            tiers,
            rules_by_tier,
        })
    }

    pub fn from_json(origin: &str, json: &str) -> Result<Self, DefinitionError> {
        let definition: PhenotypeDefinition = serde_json::from_str(json)
            .map_err(|e| DefinitionError::Parse(origin.to_string(), e.to_string()))?;
        Self::from_definition(definition)
    }

    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| DefinitionError::Load(path.display().to_string(), e.to_string()))?;
        Self::from_json(&path.display().to_string(), &json)
    }

    pub fn builtin(name: &str) -> Result<Self, DefinitionError> {
        let (_, json) = BUILTIN_PHENOTYPES
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .ok_or_else(|| DefinitionError::UnknownPhenotype(name.to_string()))?;
        Self::from_json(name, json)
    }

    pub fn builtin_names() -> impl Iterator<Item = &'static str> {
        BUILTIN_PHENOTYPES.iter().map(|(name, _)| *name)
    }

    /// An existing file path, then `<name>.json` in the user phenotype directory, then a
    /// built-in definition.
    pub fn resolve(name_or_path: &str) -> Result<Self, DefinitionError> {
        let path = Path::new(name_or_path);
        if path.is_file() {
            return Self::load(path);
        }
        if let Some(dir) = config::phenotypes_dir() {
            let candidate = dir
                .join(name_or_path)
                .with_extension(config::DEFINITION_EXTENSION);
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }
        Self::builtin(name_or_path)
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn tier(&self, rank: TierRank) -> &Tier {
        &self.tiers[rank.0.min(self.tiers.len() - 1)]
    }

    pub fn bottom(&self) -> &Tier {
        &self.tiers[self.tiers.len() - 1]
    }

    pub fn rules(&self) -> &[RuleSpec] {
        &self.definition.rules
    }

    /// Indices of the rules targeting a tier, in definition order.
    pub fn rules_for(&self, rank: TierRank) -> &[usize] {
        self.rules_by_tier
            .get(rank.0)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn criteria(&self) -> &[CriterionSpec] {
        &self.definition.criteria
    }

    pub fn scope(&self) -> EvaluationScope {
        self.definition.scope
    }

    pub fn report(&self) -> ReportGranularity {
        self.definition.report
    }

    pub fn cutoff(&self) -> &CutoffPolicy {
        &self.definition.cutoff
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_criteria(criteria: &[CriterionSpec]) -> Result<(), DefinitionError> {
    // name -> is the output per-date
    let mut defined: HashMap<&str, bool> = HashMap::new();

    for spec in criteria {
        for reference in spec.references() {
            match defined.get(reference) {
                None => {
                    return Err(DefinitionError::UnknownReference {
                        criterion: spec.name.clone(),
                        reference: reference.to_string(),
                    })
                }
                Some(false)
                    if matches!(
                        spec.kind,
                        CriterionKind::Recurrence { .. } | CriterionKind::AtLeast { .. }
                    ) =>
                {
                    return Err(DefinitionError::NotDateLocal {
                        criterion: spec.name.clone(),
                        reference: reference.to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        match &spec.kind {
            CriterionKind::Concept { matcher } => check_selector(&spec.name, matcher, false)?,
            CriterionKind::Proximity(p) => {
                check_selector(&spec.name, &p.anchor, false)?;
                check_selector(&spec.name, &p.modifier, false)?;
                check_selector(&spec.name, &p.unless, true)?;
                if let Some(u) = &p.uncertainty {
                    check_selector(&spec.name, &u.matcher, false)?;
                }
            }
            CriterionKind::Recurrence {
                min_interval_days,
                max_interval_days,
                ..
            } => {
                if *min_interval_days < 0 || max_interval_days <= min_interval_days {
                    return Err(DefinitionError::InvalidInterval(spec.name.clone()));
                }
            }
            CriterionKind::AtLeast { of, min } => {
                if *min == 0 || *min > of.len() {
                    return Err(DefinitionError::InvalidCount(spec.name.clone()));
                }
            }
            CriterionKind::AnyOf { of, .. } => {
                if of.is_empty() {
                    return Err(DefinitionError::InvalidCount(spec.name.clone()));
                }
            }
        }

        for output in spec.outputs() {
            if !is_valid_name(output) {
                return Err(DefinitionError::InvalidName(output.to_string()));
            }
            if defined
                .insert(output, spec.kind.is_date_local())
                .is_some()
            {
                return Err(DefinitionError::DuplicateCriterion(output.to_string()));
            }
        }
    }
    Ok(())
}

fn check_selector(
    criterion: &str,
    selector: &[ConceptMatch],
    allow_empty: bool,
) -> Result<(), DefinitionError> {
    if selector.is_empty() && !allow_empty {
        return Err(DefinitionError::EmptySelector(criterion.to_string()));
    }
    if selector
        .iter()
        .any(|m| !m.any_code && m.codes.is_empty() && m.measurement.is_none())
    {
        return Err(DefinitionError::EmptySelector(criterion.to_string()));
    }
    Ok(())
}

fn resolve_tiers(
    definition: &PhenotypeDefinition,
) -> Result<(Vec<Tier>, Vec<Vec<usize>>), DefinitionError> {
    if definition.tiers.is_empty() {
        return Err(DefinitionError::NoTiers);
    }

    let mut ranks: HashMap<&str, TierRank> = HashMap::new();
    let mut tiers = Vec::with_capacity(definition.tiers.len());
    for (idx, spec) in definition.tiers.iter().enumerate() {
        if ranks.insert(spec.name(), TierRank(idx)).is_some() {
            return Err(DefinitionError::DuplicateTier(spec.name().to_string()));
        }
        tiers.push(Tier {
            rank: TierRank(idx),
            name: spec.name().to_string(),
            label: spec.label().to_string(),
        });
    }

    let known: HashSet<&str> = definition
        .criteria
        .iter()
        .flat_map(|c| c.outputs())
        .collect();

    let mut rules_by_tier = vec![Vec::new(); tiers.len()];
    for (idx, rule) in definition.rules.iter().enumerate() {
        let label = rule.label();
        let rank = ranks
            .get(rule.tier.as_str())
            .ok_or_else(|| DefinitionError::UnknownTier {
                rule: label.clone(),
                tier: rule.tier.clone(),
            })?;
        if rule.requires.is_empty() {
            return Err(DefinitionError::EmptyRule(label));
        }
        for name in rule.requires.iter().chain(&rule.absent) {
            if !known.contains(name.as_str()) {
                return Err(DefinitionError::UnknownRuleCriterion {
                    rule: label,
                    criterion: name.clone(),
                });
            }
        }
        if let Some(stray) = rule
            .index_criteria
            .iter()
            .find(|name| !rule.requires.contains(name))
        {
            return Err(DefinitionError::IndexNotRequired {
                rule: label,
                criterion: stray.clone(),
            });
        }
        rules_by_tier[rank.0].push(idx);
    }

    Ok((tiers, rules_by_tier))
}

/// Names appear inside evidence text, so they are restricted to characters that cannot
/// collide with its separators.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn default_true() -> bool {
    true
}

fn default_id_width() -> usize {
    config::DEFAULT_PATIENT_ID_WIDTH
}

fn default_separator() -> String {
    "-".to_string()
}
