//! Wire vocabulary of the protocol.

pub const CLASS: &str = "C";
pub const VALUE: &str = "v";
pub const ID: &str = "id";
pub const ADDRESS: &str = "_";
pub const MATCH_CHILDREN: &str = "*";
pub const MATCH_DESCENDANTS: &str = "**";
pub const DEFAULTS: &str = "df";
pub const REQUEST: &str = "R";
pub const QUEUE: &str = "Q";
pub const INDEX: &str = "i";
pub const CAPTURE: &str = "on";
pub const REQUIRE: &str = "require";
pub const ERROR: &str = "!";
pub const TIMESTAMP: &str = "u";
pub const SESSION: &str = "session";

pub const NAME: &str = "T";
pub const DELAY: &str = "Td";
pub const DELAY_UNTIL: &str = "Tu";
pub const INTERVAL: &str = "Ti";
pub const TRIGGER: &str = "Tr";
pub const CANCEL: &str = "Tc";

/// Prefix of a velocity property (`+x` animates `x`).
pub const VELOCITY_PREFIX: char = '+';
/// Suffix of an animation options property (`+x~`).
pub const OPTIONS_SUFFIX: char = '~';

/// Keys that steer the dispatcher and never land in a property map or a
/// defaults fill.
pub const DIRECTIVES: &[&str] = &[
    CLASS,
    ADDRESS,
    MATCH_CHILDREN,
    MATCH_DESCENDANTS,
    DEFAULTS,
    REQUEST,
    QUEUE,
    NAME,
    DELAY,
    DELAY_UNTIL,
    INTERVAL,
    TRIGGER,
    CANCEL,
];

pub fn is_directive(name: &str) -> bool {
    DIRECTIVES.contains(&name)
}

/// `+P~` → `Some("P")`.
pub fn options_target(name: &str) -> Option<&str> {
    name.strip_prefix(VELOCITY_PREFIX)?
        .strip_suffix(OPTIONS_SUFFIX)
        .filter(|p| !p.is_empty())
}

/// `+P` → `Some("P")`; `+P~` is not a velocity.
pub fn velocity_target(name: &str) -> Option<&str> {
    let target = name.strip_prefix(VELOCITY_PREFIX)?;
    if target.is_empty() || target.ends_with(OPTIONS_SUFFIX) {
        None
    } else {
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_and_options_names() {
        assert_eq!(velocity_target("+x"), Some("x"));
        assert_eq!(velocity_target("+x~"), None);
        assert_eq!(velocity_target("x"), None);
        assert_eq!(velocity_target("+"), None);
        assert_eq!(options_target("+v~"), Some("v"));
        assert_eq!(options_target("+v"), None);
        assert_eq!(options_target("+~"), None);
    }
}
