//! Anchor/modifier co-occurrence within a date bucket.

use std::sync::Arc;

use super::definition::{Locality, ProximitySpec, UncertaintyScope};
use super::selector::any_match;
use super::store::{BucketDocument, DateBucket};
use super::window::{Window, WindowBuilder, WindowError};
use crate::models::Mention;

/// Modifiers found in the same sentence as the anchor.
pub fn same_sentence(anchor: &Mention, modifier: &Mention) -> bool {
    anchor.same_sentence(modifier)
}

/// Modifiers found in the same section as the anchor.
pub fn same_section(anchor: &Mention, modifier: &Mention) -> bool {
    anchor.same_section(modifier)
}

/// Every (anchor, modifier) pair whose modifier lies inside the anchor's window.
pub fn matches<F>(
    anchors: &[Arc<Mention>],
    modifiers: &[Arc<Mention>],
    mut window_of: F,
) -> Result<Vec<(Arc<Mention>, Arc<Mention>)>, WindowError>
where
    F: FnMut(&Mention) -> Result<Window, WindowError>,
{
    let mut pairs = Vec::new();
    for anchor in anchors {
        let window = window_of(anchor)?;
        for modifier in modifiers {
            if !Arc::ptr_eq(anchor, modifier)
                && anchor.same_document(modifier)
                && window.contains(modifier)
            {
                pairs.push((Arc::clone(anchor), Arc::clone(modifier)));
            }
        }
    }
    Ok(pairs)
}

/// One anchor group with the modifiers (and uncertainty mentions) found around it.
#[derive(Debug, Clone, PartialEq)]
pub struct Pairing {
    pub anchors: Vec<Arc<Mention>>,
    pub modifiers: Vec<Arc<Mention>>,
    pub uncertain: Vec<Arc<Mention>>,
}

impl Pairing {
    pub fn is_uncertain(&self) -> bool {
        !self.uncertain.is_empty()
    }

    /// Anchors, then modifiers, then uncertainty mentions, each in discovery order.
    pub fn evidence(&self) -> impl Iterator<Item = &Arc<Mention>> {
        self.anchors
            .iter()
            .chain(&self.modifiers)
            .chain(&self.uncertain)
    }
}

/// Pairings of one bucket split by whether an uncertainty modifier demoted them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProximityEvidence {
    pub confirmed: Vec<Arc<Mention>>,
    pub demoted: Vec<Arc<Mention>>,
}

enum Reach {
    Document,
    Section,
    Sentence,
    Window(Window),
}

impl Reach {
    fn admits(&self, anchor: &Mention, other: &Mention) -> bool {
        match self {
            Self::Document => anchor.same_document(other),
            Self::Section => anchor.same_section(other),
            Self::Sentence => anchor.same_sentence(other),
            Self::Window(window) => anchor.same_document(other) && window.contains(other),
        }
    }
}

pub struct ProximityMatcher<'a> {
    windows: &'a WindowBuilder,
}

impl<'a> ProximityMatcher<'a> {
    pub fn new(windows: &'a WindowBuilder) -> Self {
        Self { windows }
    }

    pub fn pairings(
        &self,
        bucket: &DateBucket,
        spec: &ProximitySpec,
    ) -> Result<Vec<Pairing>, WindowError> {
        if !spec.unless.is_empty() && bucket.mentions().any(|m| any_match(&spec.unless, m)) {
            return Ok(Vec::new());
        }

        if spec.locality == Locality::SameDate {
            return Ok(self.same_date(bucket, spec).into_iter().collect());
        }

        let mut pairings = Vec::new();
        for document in bucket.documents() {
            self.document_pairings(document, spec, &mut pairings)?;
        }
        Ok(pairings)
    }

    /// Pair and split into confirmed and demoted evidence.
    pub fn evaluate(
        &self,
        bucket: &DateBucket,
        spec: &ProximitySpec,
    ) -> Result<ProximityEvidence, WindowError> {
        let mut result = ProximityEvidence::default();
        for pairing in self.pairings(bucket, spec)? {
            let target = if spec.uncertainty.is_some() && pairing.is_uncertain() {
                &mut result.demoted
            } else {
                &mut result.confirmed
            };
            target.extend(pairing.evidence().cloned());
        }
        Ok(result)
    }

    // Whole-date pairing: every anchor and every modifier of the date form one group.
    fn same_date(&self, bucket: &DateBucket, spec: &ProximitySpec) -> Option<Pairing> {
        let anchors: Vec<Arc<Mention>> = bucket
            .mentions()
            .filter(|m| any_match(&spec.anchor, m))
            .cloned()
            .collect();
        let modifiers: Vec<Arc<Mention>> = bucket
            .mentions()
            .filter(|m| any_match(&spec.modifier, m))
            .filter(|m| !anchors.iter().any(|a| Arc::ptr_eq(a, *m)))
            .cloned()
            .collect();
        if anchors.is_empty() || modifiers.is_empty() {
            return None;
        }
        let uncertain = spec
            .uncertainty
            .as_ref()
            .map(|u| {
                bucket
                    .mentions()
                    .filter(|m| any_match(&u.matcher, m))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Some(Pairing {
            anchors,
            modifiers,
            uncertain,
        })
    }

    fn document_pairings(
        &self,
        document: &BucketDocument,
        spec: &ProximitySpec,
        out: &mut Vec<Pairing>,
    ) -> Result<(), WindowError> {
        let uncertain_in_document: Vec<&Arc<Mention>> = match &spec.uncertainty {
            Some(u) => document
                .mentions
                .iter()
                .filter(|m| any_match(&u.matcher, m))
                .collect(),
            None => Vec::new(),
        };

        for anchor in document.mentions.iter().filter(|m| any_match(&spec.anchor, m)) {
            let reach = match &spec.locality {
                Locality::SameDate | Locality::SameDocument => Reach::Document,
                Locality::SameSection => Reach::Section,
                Locality::SameSentence => Reach::Sentence,
                Locality::Window {
                    sentence_distance,
                    forward_only,
                } => {
                    let before = if *forward_only { 0 } else { *sentence_distance };
                    Reach::Window(self.windows.directed(
                        anchor,
                        &document.layout,
                        before,
                        *sentence_distance,
                    )?)
                }
            };

            let modifiers: Vec<Arc<Mention>> = document
                .mentions
                .iter()
                .filter(|m| !Arc::ptr_eq(anchor, *m))
                .filter(|m| any_match(&spec.modifier, m) && reach.admits(anchor, m))
                .cloned()
                .collect();
            if modifiers.is_empty() {
                continue;
            }

            let uncertain = match spec.uncertainty.as_ref().map(|u| u.scope) {
                Some(UncertaintyScope::Document) => {
                    uncertain_in_document.iter().map(|m| Arc::clone(*m)).collect()
                }
                Some(UncertaintyScope::Window) => uncertain_in_document
                    .iter()
                    .filter(|m| !Arc::ptr_eq(anchor, **m) && reach.admits(anchor, m))
                    .map(|m| Arc::clone(*m))
                    .collect(),
                None => Vec::new(),
            };

            out.push(Pairing {
                anchors: vec![Arc::clone(anchor)],
                modifiers,
                uncertain,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phenotype::definition::{ConceptMatch, UncertaintySpec, WindowConfig};
    use crate::phenotype::fixtures::{bucket_of, codes, date, layout_with_sentences, MentionBuilder};
    use crate::models::Span;

    fn sel(list: &[&str]) -> Vec<ConceptMatch> {
        vec![ConceptMatch {
            codes: codes(list),
            ..Default::default()
        }]
    }

    fn spec(anchor: &[&str], modifier: &[&str], locality: Locality) -> ProximitySpec {
        ProximitySpec {
            anchor: sel(anchor),
            modifier: sel(modifier),
            locality,
            unless: Vec::new(),
            uncertainty: None,
        }
    }

    // Mention in sentence `ordinal` of a 10-sentence section 20113 spanning 100..400.
    fn at(code: &str, doc: &str, ordinal: usize) -> Mention {
        let begin = 100 + ordinal * 30 + 2;
        MentionBuilder::new(code)
            .doc(doc)
            .sentence(&format!("20113:{ordinal}"))
            .offsets(begin, begin + 5)
            .section_span(Span::new(100, 400))
            .build()
    }

    fn pad_bucket(mentions: Vec<Mention>) -> DateBucket {
        bucket_of(
            date(2010, 4, 1),
            vec![(layout_with_sentences("n1", "20113", Span::new(100, 400), 10), mentions)],
        )
    }

    #[test]
    fn no_modifier_means_no_pairing() {
        let windows = WindowBuilder::default();
        let matcher = ProximityMatcher::new(&windows);
        let bucket = pad_bucket(vec![at("FirstDiag", "n1", 1)]);
        let window = Locality::Window {
            sentence_distance: 2,
            forward_only: false,
        };
        let result = matcher
            .evaluate(&bucket, &spec(&["FirstDiag"], &["Location"], window))
            .unwrap();
        assert!(result.confirmed.is_empty());
        assert!(result.demoted.is_empty());
    }

    #[test]
    fn window_pairs_anchor_with_all_modifiers_in_order() {
        let windows = WindowBuilder::default();
        let matcher = ProximityMatcher::new(&windows);
        let bucket = pad_bucket(vec![
            at("FirstDiag", "n1", 4),
            at("Location", "n1", 2),
            at("Location", "n1", 6),
            at("Location", "n1", 8),
        ]);
        let window = Locality::Window {
            sentence_distance: 2,
            forward_only: false,
        };
        let pairings = matcher
            .pairings(&bucket, &spec(&["FirstDiag"], &["Location"], window))
            .unwrap();
        assert_eq!(pairings.len(), 1);
        let ordinals: Vec<_> = pairings[0]
            .modifiers
            .iter()
            .map(|m| m.sentence_id.ordinal)
            .collect();
        assert_eq!(ordinals, vec![2, 6]);
        let evidence: Vec<_> = pairings[0].evidence().map(|m| m.normalized_code.as_str()).collect();
        assert_eq!(evidence, vec!["FirstDiag", "Location", "Location"]);
    }

    #[test]
    fn document_uncertainty_demotes_pairing() {
        let windows = WindowBuilder::default();
        let matcher = ProximityMatcher::new(&windows);
        let bucket = pad_bucket(vec![
            at("FirstDiag", "n1", 1),
            at("Location", "n1", 1),
            at("Uncertain", "n1", 9),
        ]);
        let mut s = spec(
            &["FirstDiag"],
            &["Location"],
            Locality::Window {
                sentence_distance: 2,
                forward_only: false,
            },
        );
        s.uncertainty = Some(UncertaintySpec {
            matcher: sel(&["Uncertain"]),
            scope: UncertaintyScope::Document,
            demoted: "DX_POSSIBLE".into(),
        });
        let result = matcher.evaluate(&bucket, &s).unwrap();
        assert!(result.confirmed.is_empty());
        assert_eq!(result.demoted.len(), 3);

        // window scope ignores the distant uncertainty mention
        s.uncertainty.as_mut().unwrap().scope = UncertaintyScope::Window;
        let result = matcher.evaluate(&bucket, &s).unwrap();
        assert_eq!(result.confirmed.len(), 2);
        assert!(result.demoted.is_empty());
    }

    #[test]
    fn same_date_groups_across_documents() {
        let windows = WindowBuilder::default();
        let matcher = ProximityMatcher::new(&windows);
        let d = date(2004, 7, 27);
        let bucket = bucket_of(
            d,
            vec![
                (
                    layout_with_sentences("n1", "20113", Span::new(100, 400), 10),
                    vec![at("WHEEZE", "n1", 0)],
                ),
                (
                    layout_with_sentences("n2", "20113", Span::new(100, 400), 10),
                    vec![at("COUGH", "n2", 3), at("DYSPNEA", "n2", 4)],
                ),
            ],
        );
        let result = matcher
            .evaluate(&bucket, &spec(&["WHEEZE"], &["COUGH", "DYSPNEA"], Locality::SameDate))
            .unwrap();
        let codes: Vec<_> = result.confirmed.iter().map(|m| m.normalized_code.as_str()).collect();
        assert_eq!(codes, vec!["WHEEZE", "COUGH", "DYSPNEA"]);
    }

    #[test]
    fn unless_vetoes_the_date() {
        let windows = WindowBuilder::default();
        let matcher = ProximityMatcher::new(&windows);
        let bucket = pad_bucket(vec![
            at("WHEEZE", "n1", 0),
            at("COUGH", "n1", 1),
            at("COLD", "n1", 5),
        ]);
        let mut s = spec(&["WHEEZE"], &["COUGH"], Locality::SameDate);
        s.unless = sel(&["COLD"]);
        assert!(matcher.pairings(&bucket, &s).unwrap().is_empty());
    }

    #[test]
    fn same_sentence_and_same_section() {
        let windows = WindowBuilder::default();
        let matcher = ProximityMatcher::new(&windows);
        let bucket = pad_bucket(vec![
            at("EXPOSURE_TO_ANTIGEN", "n1", 2),
            at("COUGH", "n1", 3),
        ]);
        let sentence = spec(&["EXPOSURE_TO_ANTIGEN"], &["COUGH"], Locality::SameSentence);
        assert!(matcher.pairings(&bucket, &sentence).unwrap().is_empty());
        let section = spec(&["EXPOSURE_TO_ANTIGEN"], &["COUGH"], Locality::SameSection);
        assert_eq!(matcher.pairings(&bucket, &section).unwrap().len(), 1);
    }

    #[test]
    fn forward_only_ignores_preceding_sentences() {
        let windows = WindowBuilder::from_config(&WindowConfig::default());
        let matcher = ProximityMatcher::new(&windows);
        let forward = Locality::Window {
            sentence_distance: 1,
            forward_only: true,
        };
        let before = pad_bucket(vec![at("cement", "n1", 2), at("stem", "n1", 3)]);
        assert!(matcher
            .pairings(&before, &spec(&["stem"], &["cement"], forward.clone()))
            .unwrap()
            .is_empty());
        let after = pad_bucket(vec![at("stem", "n1", 3), at("cement", "n1", 4)]);
        assert_eq!(
            matcher
                .pairings(&after, &spec(&["stem"], &["cement"], forward))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn matches_pairs_within_window() {
        let windows = WindowBuilder::default();
        let layout = layout_with_sentences("n1", "20113", Span::new(100, 400), 10);
        let anchors = vec![Arc::new(at("FirstDiag", "n1", 0))];
        let modifiers = vec![
            Arc::new(at("Location", "n1", 2)),
            Arc::new(at("Location", "n1", 3)),
        ];
        let pairs = matches(&anchors, &modifiers, |a| windows.window(a, &layout, 2)).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1.sentence_id.ordinal, 2);
        assert!(same_section(&pairs[0].0, &pairs[0].1));
        assert!(!same_sentence(&pairs[0].0, &pairs[0].1));
    }
}
