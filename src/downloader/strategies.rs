// Strategy catalog - ordered client-identity configurations
//
// Each entry is one way of presenting ourselves to the source. The order is
// a preference ranking: most likely to succeed first, heavier disguises later.
// New bypass ideas become catalog entries, never new code paths.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DESKTOP_CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";
const DESKTOP_SAFARI_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15";
const ANDROID_APP_UA: &str = "com.google.android.youtube/19.09.37 (Linux; U; Android 14) gzip";
const IOS_APP_UA: &str = "com.google.ios.youtube/19.09.3 (iPhone16,2; U; CPU iOS 17_4 like Mac OS X)";
const SMART_TV_UA: &str = "Mozilla/5.0 (SMART-TV; Linux; Tizen 6.0) AppleWebKit/538.1 (KHTML, like Gecko) Version/6.0 TV Safari/538.1";
const MOBILE_SAFARI_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";

/// One named configuration applied to a single attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Unique within a catalog
    pub name: String,
    /// Client identity tag (e.g. "web", "android")
    pub client: String,
    pub user_agent: String,
    pub referer: Option<String>,
    /// Extra HTTP headers, in order
    pub headers: Vec<(String, String)>,
    /// Passed verbatim as `--extractor-args`
    pub extractor_hint: Option<String>,
    /// Minimum delay between the tool's own requests
    #[serde(with = "duration_secs")]
    pub min_request_delay: Duration,
}

impl StrategyConfig {
    pub fn new(name: &str, client: &str, user_agent: &str) -> Self {
        Self {
            name: name.to_string(),
            client: client.to_string(),
            user_agent: user_agent.to_string(),
            referer: None,
            headers: Vec::new(),
            extractor_hint: None,
            min_request_delay: Duration::ZERO,
        }
    }

    pub fn with_referer(mut self, referer: &str) -> Self {
        self.referer = Some(referer.to_string());
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_extractor_hint(mut self, hint: &str) -> Self {
        self.extractor_hint = Some(hint.to_string());
        self
    }

    pub fn with_min_request_delay(mut self, delay: Duration) -> Self {
        self.min_request_delay = delay;
        self
    }
}

/// Ordered, restartable list of strategies. Pure data, no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyCatalog {
    strategies: Vec<StrategyConfig>,
}

impl StrategyCatalog {
    /// Build a catalog, dropping later entries whose name repeats an
    /// earlier one.
    pub fn new(strategies: Vec<StrategyConfig>) -> Self {
        let mut unique: Vec<StrategyConfig> = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            if unique.iter().any(|s| s.name == strategy.name) {
                tracing::warn!(strategy = %strategy.name, "Duplicate strategy name ignored");
                continue;
            }
            unique.push(strategy);
        }
        Self { strategies: unique }
    }

    /// Same order on every call
    pub fn list_strategies(&self) -> &[StrategyConfig] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&StrategyConfig> {
        self.strategies.iter().find(|s| s.name == name)
    }
}

impl Default for StrategyCatalog {
    fn default() -> Self {
        Self::new(vec![
            // Multi-client web first: best format coverage when it works
            StrategyConfig::new("web-multi", "web", DESKTOP_CHROME_UA)
                .with_referer("https://www.youtube.com/")
                .with_header("Accept-Language", "en-US,en;q=0.9")
                .with_extractor_hint("youtube:player_client=web,web_safari"),
            StrategyConfig::new("android-app", "android", ANDROID_APP_UA)
                .with_header("X-YouTube-Client-Name", "3")
                .with_extractor_hint("youtube:player_client=android"),
            StrategyConfig::new("ios-app", "ios", IOS_APP_UA)
                .with_header("X-YouTube-Client-Name", "5")
                .with_extractor_hint("youtube:player_client=ios"),
            StrategyConfig::new("tv-embedded", "tv_embedded", SMART_TV_UA)
                .with_referer("https://www.youtube.com/tv")
                .with_extractor_hint("youtube:player_client=tv_embedded")
                .with_min_request_delay(Duration::from_secs(1)),
            StrategyConfig::new("mobile-web", "mweb", MOBILE_SAFARI_UA)
                .with_referer("https://m.youtube.com/")
                .with_header("Accept-Language", "en-US,en;q=0.8")
                .with_extractor_hint("youtube:player_client=mweb")
                .with_min_request_delay(Duration::from_secs(2)),
            StrategyConfig::new("safari-desktop", "web_safari", DESKTOP_SAFARI_UA)
                .with_referer("https://www.google.com/")
                .with_min_request_delay(Duration::from_secs(3)),
        ])
    }
}

mod duration_secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs.max(0.0)).map_err(D::Error::custom)
    }
}
