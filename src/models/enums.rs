use serde::{Deserialize, Serialize};

use crate::ingest::IngestError;

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = IngestError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(IngestError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

// Values follow the ConText-style assertion labels emitted by the upstream annotator.

str_enum!(Certainty {
    Positive => "Positive",
    Negated => "Negated",
    Possible => "Possible",
    Hypothetical => "Hypothetical",
});

str_enum!(AssertionStatus {
    Present => "Present",
    HistoryOf => "HistoryOf",
    FamilyHistoryOf => "FamilyHistoryOf",
    Hypothetical => "Hypothetical",
});

str_enum!(Experiencer {
    Patient => "Patient",
    Other => "Other",
});
