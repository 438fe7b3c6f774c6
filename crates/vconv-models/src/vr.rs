//! VR detection from filenames.
//!
//! VR videos are pooled separately because only CPU encoders handle them
//! acceptably. Detection is purely lexical: a fixed set of studio codes in
//! the filename marks a video as VR unless an exclusion code also matches.

/// Studio codes that mark a filename as VR.
const VR_CODES: &[&str] = &[
    "SIVR", "IPVR", "DSVR", "KAVR", "MDVR", "RSRVR", "SSR", "VR", "FSVSS",
];

/// Codes that look like VR markers but are not.
const VR_EXCLUSIONS: &[&str] = &["DVRT"];

/// Whether a file name (not a full path) denotes a VR video.
pub fn is_vr_filename(file_name: &str) -> bool {
    let upper = file_name.to_uppercase();
    let mut is_vr = VR_CODES.iter().any(|code| upper.contains(code));
    if VR_EXCLUSIONS.iter().any(|code| upper.contains(code)) {
        is_vr = false;
    }
    is_vr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vr_codes_match() {
        assert!(is_vr_filename("SIVR-123.mp4"));
        assert!(is_vr_filename("dsvr-042-part1.mkv"));
        assert!(is_vr_filename("Some.Title.VR.180.mp4"));
    }

    #[test]
    fn test_exclusion_wins() {
        // DVRT contains "VR" but is explicitly excluded
        assert!(!is_vr_filename("DVRT-001.mp4"));
        assert!(!is_vr_filename("dvrt-055.mkv"));
    }

    #[test]
    fn test_plain_names_are_not_vr() {
        assert!(!is_vr_filename("movie-1080p.mp4"));
        assert!(!is_vr_filename("holiday_2024.mkv"));
    }
}
