// FormatSelector - maps (format, quality tier) onto the tool's selectors
//
// Handles:
// - Height-band selectors per tier (90%..110% of nominal height)
// - Nearest-lower degradation ladder (1080p -> 720p -> 480p -> 360p)
// - Container/extraction arguments per output variant

use super::models::{MediaFormat, Quality};

/// Selector plus post-processing arguments for one rung of the ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPlan {
    pub quality: Quality,
    pub selector: String,
    pub args: Vec<String>,
}

pub struct FormatSelector;

impl FormatSelector {
    /// Tiers to try for a request, requested tier first
    pub fn ladder(format: MediaFormat, quality: Quality) -> Vec<Quality> {
        if format.is_audio() {
            return vec![quality];
        }
        let mut tiers = vec![quality];
        let mut current = quality;
        while let Some(lower) = current.lower() {
            tiers.push(lower);
            current = lower;
        }
        tiers
    }

    /// Full argument set for one rung
    pub fn plan(format: MediaFormat, quality: Quality) -> FormatPlan {
        let selector = Self::selector(format, quality);
        let mut args = vec!["-f".to_string(), selector.clone()];

        match format {
            MediaFormat::Combined => {
                args.push("--merge-output-format".to_string());
                args.push(format.extension().to_string());
            }
            MediaFormat::VideoOnly => {
                args.push("--remux-video".to_string());
                args.push(format.extension().to_string());
            }
            MediaFormat::AudioOnly => {
                args.extend([
                    "-x".to_string(),
                    "--audio-format".to_string(),
                    format.extension().to_string(),
                    "--audio-quality".to_string(),
                    "0".to_string(),
                ]);
            }
        }

        FormatPlan {
            quality,
            selector,
            args,
        }
    }

    /// Format selector for one tier. Tiers other than `best` are bounded on
    /// both sides, so an unavailable tier fails instead of silently
    /// returning something else; the ladder handles degradation.
    pub fn selector(format: MediaFormat, quality: Quality) -> String {
        let band = quality.height().map(Self::height_band);

        match (format, band) {
            (MediaFormat::AudioOnly, _) => "ba/b".to_string(),
            (MediaFormat::Combined, None) => "bv*+ba/b".to_string(),
            (MediaFormat::Combined, Some(band)) => {
                format!("bv*{band}+ba/b{band}", band = band)
            }
            (MediaFormat::VideoOnly, None) => "bv[ext=mp4]/bv".to_string(),
            (MediaFormat::VideoOnly, Some(band)) => {
                format!("bv[ext=mp4]{band}/bv{band}", band = band)
            }
        }
    }

    fn height_band(height: u32) -> String {
        let min_height = height * 9 / 10;
        let max_height = height * 11 / 10;
        format!("[height>={}][height<={}]", min_height, max_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_descends_from_requested_tier() {
        assert_eq!(
            FormatSelector::ladder(MediaFormat::Combined, Quality::P1080),
            vec![Quality::P1080, Quality::P720, Quality::P480, Quality::P360]
        );
        assert_eq!(
            FormatSelector::ladder(MediaFormat::Combined, Quality::Best),
            vec![Quality::Best]
        );
        assert_eq!(
            FormatSelector::ladder(MediaFormat::AudioOnly, Quality::P720),
            vec![Quality::P720]
        );
    }

    #[test]
    fn tier_selectors_are_height_bounded() {
        let selector = FormatSelector::selector(MediaFormat::Combined, Quality::P720);
        assert_eq!(
            selector,
            "bv*[height>=648][height<=792]+ba/b[height>=648][height<=792]"
        );
        assert!(!selector.contains("/best"));
    }

    #[test]
    fn audio_plan_extracts_audio() {
        let plan = FormatSelector::plan(MediaFormat::AudioOnly, Quality::Best);
        assert_eq!(plan.selector, "ba/b");
        assert!(plan.args.contains(&"-x".to_string()));
        assert!(plan.args.contains(&"mp3".to_string()));
    }

    #[test]
    fn video_only_plan_remuxes() {
        let plan = FormatSelector::plan(MediaFormat::VideoOnly, Quality::P480);
        assert!(plan.selector.starts_with("bv[ext=mp4][height>=432]"));
        assert!(plan.args.contains(&"--remux-video".to_string()));
    }
}
