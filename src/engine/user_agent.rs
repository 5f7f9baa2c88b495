//! Third-party cookie heuristic based on the user agent.
//!
//! Only browsers that reliably send third-party cookies by default are trusted. Anything
//! else (including agents we cannot identify) goes through the redirect flow.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Chrome,
    Edge,
    Opera,
    SamsungInternet,
    Brave,
    Firefox,
    Safari,
    /// Any browser on iOS/iPadOS, all of them use WebKit.
    Ios,
}

impl Browser {
    pub fn supports_third_party_cookies(self) -> bool {
        matches!(
            self,
            Browser::Chrome | Browser::Edge | Browser::Opera | Browser::SamsungInternet
        )
    }
}

/// Identifies the browser family from a user agent string.
pub fn detect_browser(user_agent: &str) -> Option<Browser> {
    let ua = user_agent;
    if ["iPhone", "iPad", "iPod"].iter().any(|t| ua.contains(t)) {
        return Some(Browser::Ios);
    }
    if ua.contains("Edg/") || ua.contains("Edge/") {
        return Some(Browser::Edge);
    }
    if ua.contains("OPR/") || ua.contains("Opera") {
        return Some(Browser::Opera);
    }
    if ua.contains("SamsungBrowser/") {
        return Some(Browser::SamsungInternet);
    }
    if ua.contains("Brave") {
        return Some(Browser::Brave);
    }
    if ua.contains("Firefox/") {
        return Some(Browser::Firefox);
    }
    if ua.contains("Chrome/") || ua.contains("Chromium/") {
        return Some(Browser::Chrome);
    }
    if ua.contains("Safari/") {
        return Some(Browser::Safari);
    }
    None
}

pub fn is_browser_known_to_support_3pc(user_agent: &str) -> bool {
    detect_browser(user_agent).is_some_and(Browser::supports_third_party_cookies)
}
