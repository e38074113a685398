//! Command-line parsing and the static verb → arity table.
//!
//! The table itself is pure data (verb plus argument-arity rule); handler
//! dispatch lives in [`crate::session`] so that the arity rule — which
//! spec.md calls out as "data, not code" — stays independent of how a verb
//! is ultimately executed.

/// Whether a command accepts, requires, or forbids a trailing argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// The argument string must be empty.
    None,
    /// The argument string must be non-empty.
    Required,
    /// The argument string may be empty or non-empty.
    Optional,
}

/// One row of the static command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Uppercase ASCII verb, e.g. `"RETR"`.
    pub verb: &'static str,
    /// Argument arity rule for this verb.
    pub arity: Arity,
    /// Whether this verb is admitted before authentication completes.
    pub pre_auth: bool,
}

/// The full set of recognized verbs in spec.md §6, in no particular order
/// (lookup is by linear scan, matching the reference's ~30-entry table).
pub const COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec { verb: "USER", arity: Arity::Required, pre_auth: true },
    CommandSpec { verb: "PASS", arity: Arity::Optional, pre_auth: true },
    CommandSpec { verb: "QUIT", arity: Arity::None, pre_auth: true },
    CommandSpec { verb: "NOOP", arity: Arity::None, pre_auth: true },
    CommandSpec { verb: "FEAT", arity: Arity::None, pre_auth: true },
    CommandSpec { verb: "SYST", arity: Arity::None, pre_auth: true },
    CommandSpec { verb: "CDUP", arity: Arity::None, pre_auth: false },
    CommandSpec { verb: "PWD", arity: Arity::None, pre_auth: false },
    CommandSpec { verb: "PASV", arity: Arity::None, pre_auth: false },
    CommandSpec { verb: "CWD", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "RETR", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "STOR", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "APPE", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "REST", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "DELE", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "RMD", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "MKD", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "RNFR", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "RNTO", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "PORT", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "SIZE", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "MDTM", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "TYPE", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "MODE", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "STRU", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "AUTH", arity: Arity::Required, pre_auth: false },
    CommandSpec { verb: "LIST", arity: Arity::Optional, pre_auth: false },
    CommandSpec { verb: "NLST", arity: Arity::Optional, pre_auth: false },
    CommandSpec { verb: "MLSD", arity: Arity::Optional, pre_auth: false },
    CommandSpec { verb: "MLST", arity: Arity::Optional, pre_auth: false },
    CommandSpec { verb: "STAT", arity: Arity::Optional, pre_auth: false },
    CommandSpec { verb: "HELP", arity: Arity::Optional, pre_auth: false },
];

/// Find a command by verb (case-sensitive; callers must uppercase first).
pub fn find(verb: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|c| c.verb == verb)
}

/// Split a command line into `(verb, args)`. The verb is uppercased; the
/// argument string is whitespace-trimmed and may be empty.
pub fn parse_line(line: &str) -> (String, String) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb.to_ascii_uppercase(), rest.trim().to_string()),
        None => (line.to_ascii_uppercase(), String::new()),
    }
}

/// Validate `args` against `spec`'s arity rule.
pub fn validate_arity(spec: &CommandSpec, args: &str) -> bool {
    match spec.arity {
        Arity::None => args.is_empty(),
        Arity::Required => !args.is_empty(),
        Arity::Optional => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_splits_on_first_whitespace() {
        assert_eq!(parse_line("USER anonymous"), ("USER".into(), "anonymous".into()));
        assert_eq!(parse_line("pwd"), ("PWD".into(), String::new()));
        assert_eq!(parse_line("CWD   /a/b  "), ("CWD".into(), "/a/b".into()));
    }

    #[test]
    fn find_is_case_sensitive_uppercase_only() {
        assert!(find("USER").is_some());
        assert!(find("user").is_none());
        assert!(find("BOGUS").is_none());
    }

    #[test]
    fn arity_rules_match_spec_table() {
        let user = find("USER").unwrap();
        assert!(validate_arity(user, "anonymous"));
        assert!(!validate_arity(user, ""));

        let quit = find("QUIT").unwrap();
        assert!(validate_arity(quit, ""));
        assert!(!validate_arity(quit, "x"));

        let list = find("LIST").unwrap();
        assert!(validate_arity(list, ""));
        assert!(validate_arity(list, "/some/dir"));
    }

    #[test]
    fn pre_auth_subset_matches_spec() {
        let admitted: Vec<&str> =
            COMMAND_TABLE.iter().filter(|c| c.pre_auth).map(|c| c.verb).collect();
        for v in ["USER", "PASS", "QUIT", "NOOP", "FEAT", "SYST"] {
            assert!(admitted.contains(&v), "{v} should be pre-auth admitted");
        }
        assert!(!admitted.contains(&"PWD"));
    }
}
