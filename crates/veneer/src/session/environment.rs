//! Browser environment facts derived from a user agent string.

use serde::{Deserialize, Serialize};

/// Rendering engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Chrome,
    Firefox,
    Safari,
    Edge,
    Ie,
    Unknown,
}

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    Ios,
    Android,
    Unknown,
}

/// Engine and platform of the browser hosting a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub engine: Engine,
    /// Major version of the engine, 0 when unknown.
    pub version: u32,
    pub platform: Platform,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            engine: Engine::Unknown,
            version: 0,
            platform: Platform::Unknown,
        }
    }
}

impl Environment {
    /// Detect engine, major version and platform.
    ///
    /// Order matters: Edge and Chrome user agents also mention Safari, and
    /// iPad user agents mention Mac OS X.
    #[must_use]
    pub fn from_user_agent(user_agent: &str) -> Self {
        let (engine, version) = if let Some(v) = version_after(user_agent, &["Edg/", "Edge/", "EdgA/", "EdgiOS/"]) {
            (Engine::Edge, v)
        } else if user_agent.contains("Trident/") || user_agent.contains("MSIE ") {
            (Engine::Ie, version_after(user_agent, &["MSIE ", "rv:"]).unwrap_or(0))
        } else if let Some(v) = version_after(user_agent, &["Firefox/", "FxiOS/"]) {
            (Engine::Firefox, v)
        } else if let Some(v) = version_after(user_agent, &["Chrome/", "CriOS/"]) {
            (Engine::Chrome, v)
        } else if user_agent.contains("Safari/") {
            (Engine::Safari, version_after(user_agent, &["Version/"]).unwrap_or(0))
        } else {
            (Engine::Unknown, 0)
        };

        Self {
            engine,
            version,
            platform: detect_platform(user_agent),
        }
    }

    #[must_use]
    pub fn is_mobile(&self) -> bool {
        matches!(self.platform, Platform::Ios | Platform::Android)
    }
}

fn detect_platform(user_agent: &str) -> Platform {
    if user_agent.contains("iPhone") || user_agent.contains("iPad") || user_agent.contains("iPod") {
        Platform::Ios
    } else if user_agent.contains("Android") {
        Platform::Android
    } else if user_agent.contains("Windows") {
        Platform::Windows
    } else if user_agent.contains("Mac OS X") || user_agent.contains("Macintosh") {
        Platform::MacOs
    } else if user_agent.contains("Linux") || user_agent.contains("X11") {
        Platform::Linux
    } else {
        Platform::Unknown
    }
}

/// Major version following the first of `markers` present in `user_agent`.
fn version_after(user_agent: &str, markers: &[&str]) -> Option<u32> {
    markers.iter().find_map(|marker| {
        let start = user_agent.find(marker)? + marker.len();
        let digits: String = user_agent[start..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/120.0.6099.71 Safari/537.36";
    const EDGE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.61";
    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const SAFARI_IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 17_1 like Mac OS X) AppleWebKit/605.1.15 \
        (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1";
    const SAFARI_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
        (KHTML, like Gecko) Version/16.6 Safari/605.1.15";
    const IE11: &str = "Mozilla/5.0 (Windows NT 6.1; Trident/7.0; rv:11.0) like Gecko";
    const CHROME_ANDROID: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/119.0.6045.163 Mobile Safari/537.36";

    #[test]
    fn test_detects_engines() {
        let cases = [
            (CHROME_WINDOWS, Engine::Chrome, 120),
            (EDGE, Engine::Edge, 120),
            (FIREFOX_LINUX, Engine::Firefox, 121),
            (SAFARI_MAC, Engine::Safari, 16),
            (IE11, Engine::Ie, 11),
            (CHROME_ANDROID, Engine::Chrome, 119),
        ];
        for (ua, engine, version) in cases {
            let env = Environment::from_user_agent(ua);
            assert_eq!(env.engine, engine, "{}", ua);
            assert_eq!(env.version, version, "{}", ua);
        }
    }

    #[test]
    fn test_detects_platforms() {
        assert_eq!(Environment::from_user_agent(CHROME_WINDOWS).platform, Platform::Windows);
        assert_eq!(Environment::from_user_agent(FIREFOX_LINUX).platform, Platform::Linux);
        assert_eq!(Environment::from_user_agent(SAFARI_MAC).platform, Platform::MacOs);
        assert_eq!(Environment::from_user_agent(SAFARI_IPAD).platform, Platform::Ios);
        assert_eq!(Environment::from_user_agent(CHROME_ANDROID).platform, Platform::Android);
        assert!(Environment::from_user_agent(CHROME_ANDROID).is_mobile());
    }

    #[test]
    fn test_unknown_user_agent() {
        assert_eq!(Environment::from_user_agent("curl/8.4.0"), Environment::default());
    }
}
