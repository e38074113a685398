//! RFC 959 reply-line formatting and default reply text.

/// Format a single-line reply: `"NNN message\r\n"`.
pub fn format_single(code: u16, message: &str) -> String {
    format!("{code} {message}\r\n")
}

/// Format a multi-line reply: every line but the last uses `"NNN-message"`,
/// the final line uses `"NNN message"`. `lines` must be non-empty.
pub fn format_multi(code: u16, lines: &[&str]) -> String {
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i + 1 == lines.len() {
            out.push_str(&format!("{code} {line}\r\n"));
        } else {
            out.push_str(&format!("{code}-{line}\r\n"));
        }
    }
    out
}

/// Format `code` with its built-in default message.
pub fn format_default(code: u16) -> String {
    format_single(code, default_message(code))
}

/// The canned message text for a reply code, matching the reference
/// server's defaults. Falls back to a generic phrase for codes that carry
/// no fixed text (e.g. 227/257, whose bodies are always handler-supplied).
pub fn default_message(code: u16) -> &'static str {
    match code {
        150 => "File status okay; about to open data connection.",
        200 => "Command okay.",
        211 => "System status.",
        212 => "Directory status.",
        213 => "File status.",
        214 => "Help message.",
        215 => "UNIX Type: L8",
        220 => "Service ready for new user.",
        221 => "Service closing control connection.",
        225 => "Data connection open; no transfer in progress.",
        226 => "Closing data connection. Transfer complete.",
        227 => "Entering Passive Mode.",
        230 => "User logged in, proceed.",
        234 => "Security data exchange complete.",
        250 => "Requested file action okay, completed.",
        257 => "Path created.",
        331 => "User name okay, need password.",
        350 => "Requested file action pending further information.",
        421 => "Service not available, closing control connection.",
        425 => "Can't open data connection.",
        426 => "Connection closed; transfer aborted.",
        450 => "Requested file action not taken.",
        451 => "Requested action aborted: local error.",
        452 => "Requested action not taken. Insufficient storage space.",
        500 => "Syntax error, command unrecognized.",
        501 => "Syntax error in parameters or arguments.",
        502 => "Command not implemented.",
        503 => "Bad sequence of commands.",
        504 => "Command not implemented for that parameter.",
        530 => "Not logged in.",
        532 => "Need account for storing files.",
        550 => "Requested action not taken. File unavailable.",
        551 => "Requested action aborted: page type unknown.",
        552 => "Requested file action aborted. Storage allocation exceeded.",
        553 => "Requested action not taken. File name not allowed.",
        _ => "Unknown reply code.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_has_space_separator_and_crlf() {
        assert_eq!(format_single(220, "hi"), "220 hi\r\n");
    }

    #[test]
    fn multi_line_uses_dash_except_last() {
        let out = format_multi(211, &["a", "b", "c"]);
        assert_eq!(out, "211-a\r\n211-b\r\n211 c\r\n");
    }

    #[test]
    fn default_message_known_code() {
        assert_eq!(default_message(230), "User logged in, proceed.");
    }

    #[test]
    fn default_message_unknown_code_is_generic() {
        assert_eq!(default_message(999), "Unknown reply code.");
    }
}
