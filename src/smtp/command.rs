use core::fmt::{self, Display, Formatter};

use thiserror::Error;

use super::status::Status;

/// One parsed command line: the first whitespace-delimited token uppercased
/// selects the variant, the remainder is preserved verbatim where the
/// dispatcher still needs it (MAIL/RCPT paths are only interpreted after
/// the ordering checks have passed, so those carry their raw arguments).
#[derive(Eq, PartialEq, Debug)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    Mail(String),
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Vrfy,
    Quit,
    StartTls,
    Auth {
        mechanism: String,
        initial: Option<String>,
    },
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(host) => write!(fmt, "HELO {host}"),
            Self::Ehlo(host) => write!(fmt, "EHLO {host}"),
            Self::Mail(args) => write!(fmt, "MAIL {args}"),
            Self::Rcpt(args) => write!(fmt, "RCPT {args}"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Vrfy => fmt.write_str("VRFY"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::StartTls => fmt.write_str("STARTTLS"),
            // Never log credential material
            Self::Auth { mechanism, .. } => write!(fmt, "AUTH {mechanism}"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Syntax: HELO hostname")]
    HeloHostname,
    #[error("Syntax: EHLO hostname")]
    EhloHostname,
    #[error("Error: command not recognized")]
    Unrecognized(String),
}

impl ParseError {
    pub(crate) fn reply(&self) -> String {
        match self {
            Self::HeloHostname | Self::EhloHostname => {
                format!("{} {self}", Status::ParameterError)
            }
            Self::Unrecognized(_) => format!("{} 5.5.2 {self}", Status::NotImplemented),
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = ParseError;

    fn try_from(line: &str) -> Result<Self, Self::Error> {
        let line = line.trim();
        let (verb, args) = match line.split_once(char::is_whitespace) {
            Some((verb, args)) => (verb, args.trim_start()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" if args.is_empty() => Err(ParseError::HeloHostname),
            "HELO" => Ok(Self::Helo(args.to_string())),
            "EHLO" if args.is_empty() => Err(ParseError::EhloHostname),
            "EHLO" => Ok(Self::Ehlo(args.to_string())),
            "MAIL" => Ok(Self::Mail(args.to_string())),
            "RCPT" => Ok(Self::Rcpt(args.to_string())),
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "VRFY" => Ok(Self::Vrfy),
            "QUIT" => Ok(Self::Quit),
            "STARTTLS" => Ok(Self::StartTls),
            "AUTH" => {
                let mut parts = args.split_whitespace();
                Ok(Self::Auth {
                    mechanism: parts.next().unwrap_or_default().to_ascii_uppercase(),
                    initial: parts.next().map(str::to_string),
                })
            }
            _ => Err(ParseError::Unrecognized(line.to_string())),
        }
    }
}

/// The reverse-path argument of MAIL.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReversePath {
    /// `<>`, the bounce sender.
    Null,
    Mailbox { local: String, domain: String },
}

/// Parse `FROM:<local@domain>( params)?` or `FROM:<>( params)?`, returning
/// the path and the declared SIZE when one was given. The grammar is the
/// permissive one this server has always spoken: the local part may be
/// anything free of `@` and `>`; stricter RFC 5321 parsing is not wanted
/// here.
pub(crate) fn parse_reverse_path(args: &str) -> Option<(ReversePath, Option<usize>)> {
    let (inside, tail) = parse_angle_path(args, "FROM:")?;

    if !tail.is_empty() && !tail.starts_with(' ') {
        return None;
    }
    let size = declared_size(tail);

    if inside.is_empty() {
        return Some((ReversePath::Null, size));
    }

    let (local, domain) = split_mailbox(inside)?;
    Some((ReversePath::Mailbox { local, domain }, size))
}

/// Parse `TO:<local@domain>`. No null path, no trailing parameters.
pub(crate) fn parse_forward_path(args: &str) -> Option<(String, String)> {
    let (inside, tail) = parse_angle_path(args, "TO:")?;

    if !tail.trim().is_empty() {
        return None;
    }

    split_mailbox(inside)
}

fn parse_angle_path<'a>(args: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    if args.len() < prefix.len() || !args[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return None;
    }

    let rest = args[prefix.len()..].trim_start();
    let rest = rest.strip_prefix('<')?;
    let end = rest.find('>')?;

    Some((&rest[..end], &rest[end + 1..]))
}

fn split_mailbox(inside: &str) -> Option<(String, String)> {
    let (local, domain) = inside.split_once('@')?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }

    Some((local.to_string(), domain.to_string()))
}

/// `SIZE=n` from the MAIL parameter list (RFC 1870). Malformed values are
/// ignored rather than rejected.
fn declared_size(tail: &str) -> Option<usize> {
    tail.split_whitespace().find_map(|param| {
        param
            .get(..5)
            .filter(|prefix| prefix.eq_ignore_ascii_case("SIZE="))
            .and_then(|_| param[5..].parse().ok())
    })
}
