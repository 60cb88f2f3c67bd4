//! Navigation history and address normalization.

use parking_lot::Mutex;
use url::Url;

use super::SessionError;
use crate::engine::BLANK_URL;

/// History model shared by the command worker, the page listener and the
/// frame streamer.
///
/// `history` is most-recent-last and never holds the blank placeholder or
/// two identical neighbours. `forward` is only filled by a completed `back`
/// and emptied by every fresh navigation. Stacks move only once the engine
/// has landed, so a failed step leaves them untouched.
#[derive(Debug, Default)]
pub struct NavigationState {
    current_url: Option<String>,
    history: Vec<String>,
    forward: Vec<String>,
    navigating: bool,
    epoch: u64,
}

/// Which way a commanded navigation moves the history stacks once it lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    Fresh,
    Back,
    Forward,
    Reload,
}

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh navigation (address input or start page).
    pub fn begin_navigate(&mut self) {
        self.forward.clear();
        self.open();
    }

    /// Target of a step back, or `None` when history is too shallow.
    pub fn begin_back(&mut self) -> Option<String> {
        if self.history.len() <= 1 {
            return None;
        }
        let target = self.history[self.history.len() - 2].clone();
        self.open();
        Some(target)
    }

    /// Target of a step forward, or `None` when nothing is ahead.
    pub fn begin_forward(&mut self) -> Option<String> {
        let next = self.forward.last().cloned()?;
        self.open();
        Some(next)
    }

    pub fn begin_refresh(&mut self) {
        self.open();
    }

    /// Apply a navigation that reached `landed_url`.
    pub fn land(&mut self, landing: Landing, landed_url: &str) {
        match landing {
            Landing::Fresh | Landing::Reload => {
                self.push_history(landed_url);
            }
            Landing::Back => {
                if let Some(current) = self.history.pop() {
                    self.forward.push(current);
                }
            }
            Landing::Forward => {
                if let Some(next) = self.forward.pop() {
                    self.push_history(&next);
                }
            }
        }
        self.current_url = Some(landed_url.to_string());
    }

    pub fn finish(&mut self) {
        self.navigating = false;
        self.epoch += 1;
    }

    fn open(&mut self) {
        self.navigating = true;
        self.epoch += 1;
    }

    /// Record a main-frame navigation observed on the page.
    ///
    /// Returns true when the URL was appended to history.
    pub fn record_visit(&mut self, url: &str) -> bool {
        self.current_url = Some(url.to_string());
        self.push_history(url)
    }

    pub fn set_current_url(&mut self, url: &str) {
        self.current_url = Some(url.to_string());
    }

    fn push_history(&mut self, url: &str) -> bool {
        if url == BLANK_URL || self.history.last().map(String::as_str) == Some(url) {
            return false;
        }
        self.history.push(url.to_string());
        true
    }

    pub fn is_navigating(&self) -> bool {
        self.navigating
    }

    /// Bumped whenever a navigation opens or closes.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn forward(&self) -> &[String] {
        &self.forward
    }
}

/// Clears the in-flight flag when dropped, whatever way the navigation ended.
pub struct NavigationGate<'a> {
    state: &'a Mutex<NavigationState>,
}

impl<'a> NavigationGate<'a> {
    /// Wrap a navigation that has already been started on `state`.
    pub fn opened(state: &'a Mutex<NavigationState>) -> Self {
        Self { state }
    }
}

impl Drop for NavigationGate<'_> {
    fn drop(&mut self) {
        self.state.lock().finish();
    }
}

/// Turn free-text address input into a navigable URL.
///
/// Absolute http(s) URLs pass through, bare host names get `https://`, and
/// anything else becomes a query against `search_url`.
pub fn normalize_url(input: &str, start_url: &str, search_url: &str) -> Result<Url, SessionError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Url::parse(start_url).map_err(|e| SessionError::InvalidUrl(format!("{start_url}: {e}")));
    }

    let lower = trimmed.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        Url::parse(trimmed)
    } else if looks_like_host(trimmed) {
        Url::parse(&format!("https://{trimmed}"))
    } else {
        Url::parse_with_params(search_url, &[("q", trimmed)])
    };

    let url = candidate.map_err(|e| SessionError::InvalidUrl(format!("{trimmed}: {e}")))?;
    if url.host_str().is_none() {
        return Err(SessionError::InvalidUrl(trimmed.to_string()));
    }
    Ok(url)
}

/// `word.tld`: word characters, dots and dashes, ending in a dot and two or more letters.
fn looks_like_host(input: &str) -> bool {
    let valid_chars = input
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-');
    if !valid_chars {
        return false;
    }
    match input.rsplit_once('.') {
        Some((head, tld)) => {
            !head.is_empty() && tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}

/// True when `url` points back at the session's own public address.
pub fn is_self_target(url: &Url, public_host: &str) -> bool {
    let Ok(own) = Url::parse(&format!("http://{public_host}")) else {
        return false;
    };
    let same_host = match (url.host_str(), own.host_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    };
    same_host && own.port().map_or(true, |port| url.port_or_known_default() == Some(port))
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "https://www.google.com";
    const SEARCH: &str = "https://www.google.com/search";

    fn normalize(input: &str) -> String {
        normalize_url(input, START, SEARCH).unwrap().to_string()
    }

    #[test]
    fn test_absolute_urls_pass_through() {
        assert_eq!(normalize("https://example.com/a?b=1"), "https://example.com/a?b=1");
        assert_eq!(normalize("HTTP://example.com"), "http://example.com/");
    }

    #[test]
    fn test_bare_host_gets_secure_scheme() {
        assert_eq!(normalize("example.com"), "https://example.com/");
        assert_eq!(normalize("  docs.rs  "), "https://docs.rs/");
    }

    #[test]
    fn test_free_text_becomes_search() {
        let url = normalize("openai");
        assert!(url.starts_with("https://www.google.com/search?q="));
        assert!(url.contains("openai"));

        let url = normalize("rust async book");
        assert_eq!(url, "https://www.google.com/search?q=rust+async+book");
    }

    #[test]
    fn test_host_with_port_or_numeric_tld_is_searched() {
        assert!(normalize("localhost:3000").contains("/search?q="));
        assert!(normalize("10.0.0.1").contains("/search?q="));
    }

    #[test]
    fn test_empty_input_loads_start_page() {
        assert_eq!(normalize("   "), "https://www.google.com/");
    }

    #[test]
    fn test_self_target_detection() {
        let own = Url::parse("http://localhost:3000/index.html").unwrap();
        assert!(is_self_target(&own, "localhost:3000"));

        let other_port = Url::parse("http://localhost:8080/").unwrap();
        assert!(!is_self_target(&other_port, "localhost:3000"));

        let elsewhere = Url::parse("https://example.com/").unwrap();
        assert!(!is_self_target(&elsewhere, "localhost:3000"));

        let any_port = Url::parse("https://cobrowse.example.org/").unwrap();
        assert!(is_self_target(&any_port, "cobrowse.example.org"));
    }

    #[test]
    fn test_back_requires_depth_two() {
        let mut nav = NavigationState::new();
        assert_eq!(nav.begin_back(), None);
        nav.record_visit("https://a.test/");
        assert_eq!(nav.begin_back(), None);
        assert!(!nav.is_navigating());
    }

    #[test]
    fn test_back_and_forward_are_symmetric() {
        let mut nav = NavigationState::new();
        nav.record_visit("https://a.test/");
        nav.record_visit("https://b.test/");

        assert_eq!(nav.begin_back().as_deref(), Some("https://a.test/"));
        nav.land(Landing::Back, "https://a.test/");
        nav.finish();
        assert_eq!(nav.history(), ["https://a.test/"]);
        assert_eq!(nav.forward(), ["https://b.test/"]);

        assert_eq!(nav.begin_forward().as_deref(), Some("https://b.test/"));
        nav.land(Landing::Forward, "https://b.test/");
        nav.finish();
        assert_eq!(nav.history(), ["https://a.test/", "https://b.test/"]);
        assert!(nav.forward().is_empty());
        assert_eq!(nav.begin_forward(), None);
        assert_eq!(nav.current_url(), Some("https://b.test/"));
    }

    #[test]
    fn test_unlanded_steps_leave_stacks_alone() {
        let mut nav = NavigationState::new();
        nav.record_visit("https://a.test/");
        nav.record_visit("https://b.test/");

        assert!(nav.begin_back().is_some());
        nav.finish();
        assert_eq!(nav.history(), ["https://a.test/", "https://b.test/"]);
        assert!(nav.forward().is_empty());
        assert_eq!(nav.begin_forward(), None);
    }

    #[test]
    fn test_fresh_navigation_clears_forward() {
        let mut nav = NavigationState::new();
        nav.record_visit("https://a.test/");
        nav.record_visit("https://b.test/");
        nav.begin_back();
        nav.land(Landing::Back, "https://a.test/");
        nav.finish();
        assert!(!nav.forward().is_empty());

        nav.begin_navigate();
        assert!(nav.forward().is_empty());
        assert!(nav.is_navigating());
        nav.land(Landing::Fresh, "https://c.test/");
        nav.finish();
        assert_eq!(nav.history(), ["https://a.test/", "https://c.test/"]);
    }

    #[test]
    fn test_epoch_moves_on_open_and_close() {
        let mut nav = NavigationState::new();
        let before = nav.epoch();
        nav.begin_refresh();
        assert_ne!(nav.epoch(), before);
        let during = nav.epoch();
        nav.finish();
        assert_ne!(nav.epoch(), during);
    }

    #[test]
    fn test_history_skips_blank_and_repeats() {
        let mut nav = NavigationState::new();
        assert!(!nav.record_visit(BLANK_URL));
        assert!(nav.record_visit("https://a.test/"));
        assert!(!nav.record_visit("https://a.test/"));
        assert!(nav.record_visit("https://b.test/"));
        assert!(nav.record_visit("https://a.test/"));
        assert_eq!(nav.history().len(), 3);
        assert_eq!(nav.current_url(), Some("https://a.test/"));
    }

    #[test]
    fn test_gate_clears_flag_on_drop() {
        let state = Mutex::new(NavigationState::new());
        state.lock().begin_refresh();
        {
            let _gate = NavigationGate::opened(&state);
            assert!(state.lock().is_navigating());
        }
        assert!(!state.lock().is_navigating());
    }
}
