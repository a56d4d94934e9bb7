// station_number.rs
use once_cell::sync::Lazy;
use regex::Regex;

static SLASH_JOINED: Lazy<Regex> = Lazy::new(|| Regex::new(r"№([0-9]+)/([0-9]+)").unwrap());
static FIRST_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());

/// Ways of reading a station number out of a commission name or column label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberStrategy {
    /// `№<a>/<b>` read as the digits of `a` followed by those of `b`
    /// (Udmurtia numbers its stations this way).
    SlashJoined,
    /// First run of digits anywhere in the text.
    FirstDigits,
}

/// Strategies in the order they are tried.
pub const STRATEGIES: [NumberStrategy; 2] =
    [NumberStrategy::SlashJoined, NumberStrategy::FirstDigits];

impl NumberStrategy {
    pub fn extract(self, text: &str) -> Option<u64> {
        match self {
            NumberStrategy::SlashJoined => {
                let caps = SLASH_JOINED.captures(text)?;
                format!("{}{}", &caps[1], &caps[2]).parse().ok()
            }
            NumberStrategy::FirstDigits => FIRST_DIGITS.find(text)?.as_str().parse().ok(),
        }
    }
}

/// Station number from the first strategy that matches; `None` for names
/// without digits (placeholder commissions and the like). Zero is never a
/// station number.
pub fn station_number(text: &str) -> Option<u64> {
    STRATEGIES
        .iter()
        .find_map(|strategy| strategy.extract(text))
        .filter(|number| *number != 0)
}
