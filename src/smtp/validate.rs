use std::sync::OnceLock;

use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

use crate::{error::Rejection, events::Events, options::Options, smtp::envelope::Envelope};

use super::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressKind {
    Sender,
    Recipient,
}

impl AddressKind {
    const fn title(self) -> &'static str {
        match self {
            Self::Sender => "Sender",
            Self::Recipient => "Recipient",
        }
    }

    const fn lower(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Recipient => "recipient",
        }
    }
}

/// Run the full validation pipeline for one MAIL/RCPT address: the
/// MX-lookup hook (unless DNS validation is disabled), then the embedder's
/// validator for this kind of address. `Err` carries the complete reply
/// line to send.
pub(crate) async fn validate_address(
    options: &Options,
    events: &dyn Events,
    envelope: &Envelope,
    kind: AddressKind,
    local: &str,
    domain: &str,
) -> Result<(), String> {
    let email = format!("{local}@{}", domain.to_lowercase());

    if !options.disable_dns_validation {
        let lookup = events.resolve_mx(domain).await;
        let empty = matches!(&lookup, Ok(records) if records.is_empty());

        if empty || lookup.is_err() {
            match kind {
                AddressKind::Sender => events.on_sender_validation_failed(&email).await,
                AddressKind::Recipient => events.on_recipient_validation_failed(&email).await,
            }

            let default = format!(
                "{} 4.1.8 <{email}>: {} address rejected: Domain not found",
                Status::MailboxUnavailable,
                kind.title(),
            );

            return Err(match lookup {
                Err(rejection) => rejection.reply_or(default),
                Ok(_) => default,
            });
        }
    }

    let verdict = match kind {
        AddressKind::Sender => events.validate_sender(envelope, &email).await,
        AddressKind::Recipient => events.validate_recipient(envelope, &email).await,
    };

    verdict.map_err(|rejection| {
        rejection.reply_or(format!(
            "{} 5.1.1 <{email}>: {} address rejected: User unknown in local {} table",
            Status::Error,
            kind.title(),
            kind.lower(),
        ))
    })
}

/// MX lookup against the system resolver; the default body of the
/// [`Events::resolve_mx`] hook.
pub async fn system_mx_lookup(domain: &str) -> Result<Vec<String>, Rejection> {
    static RESOLVER: OnceLock<TokioAsyncResolver> = OnceLock::new();

    let resolver = RESOLVER.get_or_init(|| {
        TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
    });

    let lookup = resolver
        .mx_lookup(domain)
        .await
        .map_err(|err| Rejection::new(err.to_string()))?;

    Ok(lookup.iter().map(|mx| mx.exchange().to_utf8()).collect())
}

#[cfg(test)]
mod test {
    use std::net::IpAddr;

    use async_trait::async_trait;

    use super::*;

    struct NoHooks;
    impl Events for NoHooks {}

    struct DeadDomain;

    #[async_trait]
    impl Events for DeadDomain {
        async fn resolve_mx(&self, _domain: &str) -> Result<Vec<String>, Rejection> {
            Ok(Vec::new())
        }
    }

    struct VetoingResolver;

    #[async_trait]
    impl Events for VetoingResolver {
        async fn resolve_mx(&self, _domain: &str) -> Result<Vec<String>, Rejection> {
            Err(Rejection::new("blocklisted").with_response("554 5.7.1 Access denied"))
        }
    }

    struct UnknownUser;

    #[async_trait]
    impl Events for UnknownUser {
        async fn validate_recipient(
            &self,
            _envelope: &Envelope,
            _email: &str,
        ) -> Result<(), Rejection> {
            Err(Rejection::new("who?"))
        }
    }

    fn envelope() -> Envelope {
        Envelope::new(IpAddr::from([127, 0, 0, 1]))
    }

    fn options() -> Options {
        Options {
            disable_dns_validation: true,
            ..Options::default()
        }
    }

    #[tokio::test]
    async fn accepts_when_nothing_is_registered() {
        let verdict = validate_address(
            &options(),
            &NoHooks,
            &envelope(),
            AddressKind::Sender,
            "a",
            "b.com",
        )
        .await;

        assert_eq!(verdict, Ok(()));
    }

    #[tokio::test]
    async fn empty_mx_result_rejects_with_domain_not_found() {
        let dns_enabled = Options::default();
        let verdict = validate_address(
            &dns_enabled,
            &DeadDomain,
            &envelope(),
            AddressKind::Recipient,
            "c",
            "D.example",
        )
        .await;

        assert_eq!(
            verdict,
            Err(
                "450 4.1.8 <c@d.example>: Recipient address rejected: Domain not found"
                    .to_string()
            )
        );
    }

    #[tokio::test]
    async fn resolver_rejection_reply_wins() {
        let dns_enabled = Options::default();
        let verdict = validate_address(
            &dns_enabled,
            &VetoingResolver,
            &envelope(),
            AddressKind::Sender,
            "a",
            "b.com",
        )
        .await;

        assert_eq!(verdict, Err("554 5.7.1 Access denied".to_string()));
    }

    #[tokio::test]
    async fn embedder_veto_uses_default_text() {
        let verdict = validate_address(
            &options(),
            &UnknownUser,
            &envelope(),
            AddressKind::Recipient,
            "ghost",
            "example.com",
        )
        .await;

        assert_eq!(
            verdict,
            Err(
                "550 5.1.1 <ghost@example.com>: Recipient address rejected: User unknown in local recipient table"
                    .to_string()
            )
        );
    }
}
