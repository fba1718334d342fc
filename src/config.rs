use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Phenotyper";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Width numeric patient identifiers are zero-padded to (medical record numbers are 8 digits).
pub const DEFAULT_PATIENT_ID_WIDTH: usize = 8;

/// Extension of user-supplied phenotype definition files.
pub const DEFINITION_EXTENSION: &str = "json";

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> &'static str {
    "phenotyper=info,phenotyper_lib=info"
}

/// Get the application data directory
/// ~/.phenotyper/ on all platforms, None when no home directory can be determined.
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".phenotyper"))
}

/// Directory searched for user phenotype definitions (`<name>.json`) before the built-in set.
pub fn phenotypes_dir() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join("phenotypes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phenotypes_dir_under_app_data() {
        if let (Some(phenotypes), Some(app)) = (phenotypes_dir(), app_data_dir()) {
            assert!(phenotypes.starts_with(app));
            assert!(phenotypes.ends_with("phenotypes"));
        }
    }

    #[test]
    fn app_name_is_phenotyper() {
        assert_eq!(APP_NAME, "Phenotyper");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn log_filter_targets_both_crates() {
        assert!(default_log_filter().contains("phenotyper_lib"));
    }
}
