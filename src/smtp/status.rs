use core::fmt::{self, Display, Formatter};

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    ServiceReady = 220,
    GoodBye = 221,
    AuthSuccessful = 235,
    Ok = 250,
    CannotVerify = 252,
    AuthContinue = 334,
    StartMailInput = 354,
    Unavailable = 421,
    MailboxUnavailable = 450,
    SyntaxError = 500,
    ParameterError = 501,
    NotImplemented = 502,
    InvalidCommandSequence = 503,
    AuthRequired = 530,
    AuthFailed = 535,
    Error = 550,
    TransactionFailed = 554,
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", *self as i32)
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn displays_as_bare_code() {
        assert_eq!(Status::ServiceReady.to_string(), "220");
        assert_eq!(Status::AuthContinue.to_string(), "334");
        assert_eq!(Status::InvalidCommandSequence.to_string(), "503");
        assert_eq!(Status::TransactionFailed.to_string(), "554");
    }
}
