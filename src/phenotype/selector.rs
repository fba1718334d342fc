use super::definition::{ConceptMatch, MeasurementSpec};
use crate::models::Mention;

/// True when any entry of the selector matches.
pub fn any_match(selector: &[ConceptMatch], mention: &Mention) -> bool {
    selector.iter().any(|m| m.matches(mention))
}

impl ConceptMatch {
    pub fn matches(&self, mention: &Mention) -> bool {
        let code_hit = self.any_code
            || self.codes.iter().any(|c| *c == mention.normalized_code)
            || self
                .measurement
                .as_ref()
                .is_some_and(|spec| spec.matches(&mention.normalized_code));
        if !code_hit {
            return false;
        }
        if !self.sections.is_empty() && !self.sections.contains(&mention.section_id) {
            return false;
        }
        if self.certainty.is_some_and(|c| c != mention.certainty) {
            return false;
        }
        let text = mention.covered_text.trim();
        if self
            .excluded_texts
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(text))
        {
            return false;
        }
        !self.excluded_contexts.iter().any(|context| {
            (context.texts.is_empty() || context.texts.iter().any(|t| t.eq_ignore_ascii_case(text)))
                && context.following.is_match(&mention.following_text)
        })
    }
}

impl MeasurementSpec {
    /// Compares the largest value carried after the prefix against the thresholds.
    pub fn matches(&self, code: &str) -> bool {
        let Some(rest) = code
            .strip_prefix(self.prefix.as_str())
            .and_then(|r| r.strip_prefix(self.separator.as_str()))
        else {
            return false;
        };

        let mut max: Option<f64> = None;
        for raw in rest.split(self.separator.as_str()) {
            match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => max = Some(max.map_or(v, |m| m.max(v))),
                _ => {
                    tracing::warn!(code = %code, "Unparseable measurement value");
                    return false;
                }
            }
        }

        let Some(value) = max else {
            return false;
        };
        self.at_least.map_or(true, |min| value >= min) && self.at_most.map_or(true, |max| value <= max)
    }
}
