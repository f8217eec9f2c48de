//! Consistency checker for channel labels.
//!
//! Compares the quality a channel name advertises ("4K", "FHD", "HD") with
//! the resolution actually measured, and flags low frame rates.

use crate::media::ResolutionClass;

/// Name tokens that promise a 4K stream.
const UHD_KEYWORDS: &[&str] = &["4k", "uhd"];

/// Name tokens that promise a 1080p stream.
const FHD_KEYWORDS: &[&str] = &["1080p", "fhd"];

/// Name tokens that promise an HD (720p or 1080p) stream.
const HD_KEYWORDS: &[&str] = &["hd"];

/// Frame rates at or below this are reported by default.
pub const DEFAULT_LOW_FRAMERATE_THRESHOLD: u32 = 30;

/// Quality a channel name advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLabel {
    Uhd,
    FullHd,
    Hd,
    Unlabeled,
}

impl QualityLabel {
    /// Classifies a display name. Rules are checked in priority order and the
    /// first match wins; matching is case-insensitive on substrings.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if contains_any_keyword(&lower, UHD_KEYWORDS) {
            QualityLabel::Uhd
        } else if contains_any_keyword(&lower, FHD_KEYWORDS) {
            QualityLabel::FullHd
        } else if contains_any_keyword(&lower, HD_KEYWORDS) {
            QualityLabel::Hd
        } else {
            QualityLabel::Unlabeled
        }
    }

    /// Resolutions consistent with this label, or `None` when any is fine.
    fn expected(self) -> Option<&'static [ResolutionClass]> {
        match self {
            QualityLabel::Uhd => Some(&[ResolutionClass::Uhd4k]),
            QualityLabel::FullHd => Some(&[ResolutionClass::Hd1080]),
            QualityLabel::Hd => Some(&[ResolutionClass::Hd1080, ResolutionClass::Hd720]),
            QualityLabel::Unlabeled => None,
        }
    }
}

/// Checks if the string contains any of the given keywords.
fn contains_any_keyword(s: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| s.contains(kw))
}

/// Returns one finding when `display_name` and `measured` disagree.
///
/// - "4k"/"uhd" in the name expects 4K
/// - else "1080p"/"fhd" expects 1080p
/// - else "hd" expects 1080p or 720p
/// - else a measured 4K stream is flagged as unlabeled
pub fn check_label(display_name: &str, measured: ResolutionClass) -> Vec<String> {
    let label = QualityLabel::from_name(display_name);

    match label.expected() {
        Some(expected) if !expected.contains(&measured) => {
            let wanted: Vec<String> = expected.iter().map(|r| r.to_string()).collect();
            vec![format!(
                "{}: expected {}, measured {}",
                display_name,
                wanted.join(" or "),
                measured
            )]
        }
        Some(_) => Vec::new(),
        None if measured == ResolutionClass::Uhd4k => {
            vec![format!("{}: unlabeled 4K stream", display_name)]
        }
        None => Vec::new(),
    }
}

/// Whether a measured frame rate is low enough to report.
pub fn check_frame_rate(frame_rate: Option<u32>, threshold: u32) -> Option<u32> {
    frame_rate.filter(|fps| *fps <= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [ResolutionClass; 5] = [
        ResolutionClass::Sd,
        ResolutionClass::Hd720,
        ResolutionClass::Hd1080,
        ResolutionClass::Uhd4k,
        ResolutionClass::Unknown,
    ];

    #[test]
    fn test_4k_label_with_1080p_measurement() {
        let findings = check_label("News 4K Channel", ResolutionClass::Hd1080);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].contains("expected 4K"), "{}", findings[0]);
    }

    #[test]
    fn test_local_sd_is_consistent() {
        assert!(check_label("Local SD", ResolutionClass::Sd).is_empty());
    }

    #[test]
    fn test_uhd_keyword_takes_priority_over_hd() {
        assert_eq!(QualityLabel::from_name("Sports UHD"), QualityLabel::Uhd);
        assert!(check_label("Sports UHD", ResolutionClass::Uhd4k).is_empty());
    }

    #[test]
    fn test_fhd_expects_exactly_1080p() {
        assert_eq!(QualityLabel::from_name("Movies FHD"), QualityLabel::FullHd);
        assert_eq!(check_label("Movies FHD", ResolutionClass::Hd720).len(), 1);
        assert!(check_label("Movies 1080P", ResolutionClass::Hd1080).is_empty());
    }

    #[test]
    fn test_hd_accepts_720p_and_1080p() {
        assert!(check_label("BBC One HD", ResolutionClass::Hd720).is_empty());
        assert!(check_label("BBC One HD", ResolutionClass::Hd1080).is_empty());

        let findings = check_label("BBC One HD", ResolutionClass::Sd);
        assert_eq!(findings, vec!["BBC One HD: expected 1080p or 720p, measured SD"]);
    }

    #[test]
    fn test_unlabeled_4k_is_flagged() {
        let findings = check_label("Nature Channel", ResolutionClass::Uhd4k);
        assert_eq!(findings, vec!["Nature Channel: unlabeled 4K stream"]);
        assert!(check_label("Nature Channel", ResolutionClass::Hd1080).is_empty());
    }

    #[test]
    fn test_unknown_measurement_contradicts_label() {
        assert_eq!(check_label("Cinema 4K", ResolutionClass::Unknown).len(), 1);
        assert!(check_label("Cinema", ResolutionClass::Unknown).is_empty());
    }

    #[test]
    fn test_check_frame_rate() {
        assert_eq!(check_frame_rate(Some(25), 30), Some(25));
        assert_eq!(check_frame_rate(Some(30), 30), Some(30));
        assert_eq!(check_frame_rate(Some(50), 30), None);
        assert_eq!(check_frame_rate(None, 30), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_at_most_one_finding(name in "[A-Za-z0-9 ]{0,30}", idx in 0usize..5) {
            let findings = check_label(&name, ALL[idx]);
            prop_assert!(findings.len() <= 1);
        }

        #[test]
        fn prop_label_is_case_insensitive(name in "[A-Za-z0-9 ]{0,30}") {
            prop_assert_eq!(
                QualityLabel::from_name(&name.to_uppercase()),
                QualityLabel::from_name(&name.to_lowercase())
            );
        }
    }
}
