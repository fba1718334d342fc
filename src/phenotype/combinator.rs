//! Criteria table to tier, by an ordered rule table.

use chrono::NaiveDate;

use super::definition::{IndexDateMode, Phenotype, RuleSpec};
use super::types::{Classification, CriteriaTable, Criterion, PhenotypeError};

pub struct Combinator<'a> {
    phenotype: &'a Phenotype,
}

impl<'a> Combinator<'a> {
    pub fn new(phenotype: &'a Phenotype) -> Self {
        Self { phenotype }
    }

    /// Highest tier with a firing rule, dated by the earliest candidate among that tier's
    /// firing rules. On equal candidates the rule listed last wins. No firing rule yields
    /// the bottom tier with no evidence.
    pub fn classify(
        &self,
        table: &CriteriaTable,
        patient_id: &str,
        date: NaiveDate,
    ) -> Result<Classification, PhenotypeError> {
        let rules = self.phenotype.rules();
        for tier in self.phenotype.tiers() {
            let mut best: Option<(NaiveDate, usize)> = None;
            for &idx in self.phenotype.rules_for(tier.rank) {
                let rule = &rules[idx];
                let lookup = |name: &str| criterion(table, name, rule, patient_id, date);

                let mut fires = true;
                for name in &rule.requires {
                    fires &= lookup(name.as_str())?.satisfied();
                }
                for name in &rule.absent {
                    fires &= !lookup(name.as_str())?.satisfied();
                }
                if !fires {
                    continue;
                }

                let mut dates = Vec::with_capacity(rule.dating_criteria().len());
                for name in rule.dating_criteria() {
                    dates.extend(lookup(name.as_str())?.qualifying_date());
                }
                let candidate = match rule.index_date {
                    IndexDateMode::Latest => dates.into_iter().max(),
                    IndexDateMode::Earliest => dates.into_iter().min(),
                };
                let Some(candidate) = candidate else {
                    continue;
                };
                if best.map_or(true, |(current, _)| candidate <= current) {
                    best = Some((candidate, idx));
                }
            }

            if let Some((index_date, idx)) = best {
                let rule = &rules[idx];
                let evidence = rule
                    .requires
                    .iter()
                    .map(|name| criterion(table, name, rule, patient_id, date).cloned())
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Classification {
                    tier: tier.rank,
                    index_date: Some(index_date),
                    rule: Some(idx),
                    evidence,
                });
            }
        }
        Ok(Classification::bottom(self.phenotype.bottom().rank))
    }
}

fn criterion<'t>(
    table: &'t CriteriaTable,
    name: &str,
    rule: &RuleSpec,
    patient_id: &str,
    date: NaiveDate,
) -> Result<&'t Criterion, PhenotypeError> {
    table.get(name).ok_or_else(|| PhenotypeError::MissingCriterion {
        patient_id: patient_id.to_string(),
        date,
        rule: rule.label(),
        criterion: name.to_string(),
    })
}
