use core::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::options::AuthMethod;

/// Capabilities advertised in the EHLO response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Extension {
    EightBitMime,
    EnhancedStatusCodes,
    Size(usize),
    Auth(Vec<AuthMethod>),
    Starttls,
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::EightBitMime => fmt.write_str("8BITMIME"),
            Self::EnhancedStatusCodes => fmt.write_str("ENHANCEDSTATUSCODES"),
            Self::Size(limit) => write!(fmt, "SIZE {limit}"),
            Self::Auth(methods) => {
                fmt.write_str("AUTH")?;
                for method in methods {
                    write!(fmt, " {method}")?;
                }
                Ok(())
            }
            Self::Starttls => fmt.write_str("STARTTLS"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn renders_capability_lines() {
        assert_eq!(Extension::EightBitMime.to_string(), "8BITMIME");
        assert_eq!(Extension::Size(10_485_760).to_string(), "SIZE 10485760");
        assert_eq!(
            Extension::Auth(vec![AuthMethod::Plain, AuthMethod::Login]).to_string(),
            "AUTH PLAIN LOGIN"
        );
        assert_eq!(Extension::Starttls.to_string(), "STARTTLS");
    }
}
