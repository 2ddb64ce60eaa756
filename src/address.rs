use std::str::FromStr;

#[derive(thiserror::Error, Debug, PartialEq)]
pub(crate) enum AddrError {
    #[error("missing port: {0}")]
    MissingPort(String),
    #[error("port invalid: {0}")]
    InvalidPort(String),
    #[error("missing ']': {0}")]
    MissingBracket(String),
    #[error("too many colons: {0}")]
    TooManyColons(String),
    #[error("unexpected '[': {0}")]
    UnexpectedOpenBracket(String),
    #[error("unexpected ']': {0}")]
    UnexpectedCloseBracket(String),
}

/// A `host:port` pair. The host may be empty (`:80`) and keeps IPv6 literals without brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HostPort {
    pub(crate) host: String,
    pub(crate) port: u16,
}

impl FromStr for HostPort {
    type Err = AddrError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (host, port) = split_host_port(value)?;

        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }
}

/// Splits `host:port` or `[ipv6]:port`.
///
/// A bracketed host must be followed directly by the last colon, an unbracketed host must
/// not contain any colon, and no stray bracket may appear anywhere else. Only then is the
/// port after the last colon read; it must be a decimal number in `1..=65535`.
pub(crate) fn split_host_port(hostport: &str) -> Result<(&str, u16), AddrError> {
    let colon = hostport
        .rfind(':')
        .ok_or_else(|| AddrError::MissingPort(hostport.to_owned()))?;

    let (host, open_from, close_from) = if hostport.starts_with('[') {
        let end = hostport[1..]
            .find(']')
            .map(|i| i + 1)
            .ok_or_else(|| AddrError::MissingBracket(hostport.to_owned()))?;

        if end + 1 == hostport.len() {
            return Err(AddrError::MissingPort(hostport.to_owned()));
        }

        if end + 1 != colon {
            // Either ']' isn't followed by a colon, or that colon is not the last one.
            return Err(if hostport.as_bytes()[end + 1] == b':' {
                AddrError::TooManyColons(hostport.to_owned())
            } else {
                AddrError::MissingPort(hostport.to_owned())
            });
        }

        (&hostport[1..end], 1, end + 1)
    } else {
        let host = &hostport[..colon];

        if host.contains(':') {
            return Err(AddrError::TooManyColons(hostport.to_owned()));
        }

        (host, 0, 0)
    };

    let port = parse_port(&hostport[colon + 1..])
        .ok_or_else(|| AddrError::InvalidPort(hostport.to_owned()))?;

    if hostport[open_from..].contains('[') {
        return Err(AddrError::UnexpectedOpenBracket(hostport.to_owned()));
    }

    if hostport[close_from..].contains(']') {
        return Err(AddrError::UnexpectedCloseBracket(hostport.to_owned()));
    }

    Ok((host, port))
}

fn parse_port(value: &str) -> Option<u16> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    value.parse::<u16>().ok().filter(|port| *port != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::Ipv6Addr;

    #[test]
    fn plain_host_and_port() {
        let result = split_host_port("bing.com:443");

        assert_eq!(result, Ok(("bing.com", 443)));
    }

    #[test]
    fn empty_host() {
        let result = split_host_port(":80");

        assert_eq!(result, Ok(("", 80)));
    }

    #[test]
    fn bracketed_ipv6() {
        assert_eq!(split_host_port("[::1]:80"), Ok(("::1", 80)));
        assert_eq!(split_host_port("[::]:443"), Ok(("::", 443)));
    }

    #[test]
    fn missing_port() {
        let result = split_host_port("bing.com");

        assert_eq!(result, Err(AddrError::MissingPort("bing.com".to_owned())));

        let result = split_host_port("[::1]x:80");

        assert_eq!(result, Err(AddrError::MissingPort("[::1]x:80".to_owned())));

        let result = split_host_port("[::1]80");

        assert_eq!(result, Err(AddrError::MissingPort("[::1]80".to_owned())));

        let result = split_host_port("[::1]");

        assert_eq!(result, Err(AddrError::MissingPort("[::1]".to_owned())));
    }

    #[test]
    fn port_out_of_range() {
        assert_eq!(
            split_host_port("a:0"),
            Err(AddrError::InvalidPort("a:0".to_owned()))
        );
        assert_eq!(
            split_host_port("a:65536"),
            Err(AddrError::InvalidPort("a:65536".to_owned()))
        );
        assert_eq!(split_host_port("a:65535"), Ok(("a", 65535)));
    }

    #[test]
    fn port_not_numeric() {
        assert!(matches!(
            split_host_port("a:http"),
            Err(AddrError::InvalidPort(_))
        ));
        assert!(matches!(
            split_host_port("a:+80"),
            Err(AddrError::InvalidPort(_))
        ));
        assert!(matches!(split_host_port("a:"), Err(AddrError::InvalidPort(_))));
    }

    #[test]
    fn unbracketed_ipv6_has_too_many_colons() {
        let result = split_host_port("::1:80");

        assert_eq!(result, Err(AddrError::TooManyColons("::1:80".to_owned())));
    }

    #[test]
    fn colon_after_bracket_is_not_the_last_one() {
        let result = split_host_port("[::1]:80:90");

        assert_eq!(
            result,
            Err(AddrError::TooManyColons("[::1]:80:90".to_owned()))
        );
    }

    #[test]
    fn stray_brackets() {
        assert_eq!(
            split_host_port("[::1:80"),
            Err(AddrError::MissingBracket("[::1:80".to_owned()))
        );
        assert_eq!(
            split_host_port("a[b:80"),
            Err(AddrError::UnexpectedOpenBracket("a[b:80".to_owned()))
        );
        assert_eq!(
            split_host_port("a]b:80"),
            Err(AddrError::UnexpectedCloseBracket("a]b:80".to_owned()))
        );
        assert_eq!(
            split_host_port("[a[b]:80"),
            Err(AddrError::UnexpectedOpenBracket("[a[b]:80".to_owned()))
        );
    }

    #[test]
    fn host_port_from_str() {
        let addr = HostPort::from_str("[2001:db8::1]:8443").unwrap();

        assert_eq!(addr.host, "2001:db8::1");
        assert_eq!(addr.port, 8443);
    }

    proptest! {
        #[test]
        fn valid_host_and_port(host in "[a-z0-9.\\-]{0,24}", port in 1u16..=65535) {
            let input = format!("{host}:{port}");

            prop_assert_eq!(split_host_port(&input), Ok((host.as_str(), port)));
        }

        #[test]
        fn valid_ipv6_and_port(segments in any::<[u16; 8]>(), port in 1u16..=65535) {
            let ip = Ipv6Addr::from(segments).to_string();
            let input = format!("[{ip}]:{port}");

            prop_assert_eq!(split_host_port(&input), Ok((ip.as_str(), port)));
        }

        #[test]
        fn out_of_range_port(host in "[a-z0-9.]{1,24}", port in 65536u32..10_000_000) {
            let input = format!("{host}:{port}");

            prop_assert_eq!(split_host_port(&input), Err(AddrError::InvalidPort(input.clone())));
        }

        #[test]
        fn no_colon_means_missing_port(host in "[a-z0-9.\\-]{0,24}") {
            prop_assert_eq!(split_host_port(&host), Err(AddrError::MissingPort(host.clone())));
        }

        #[test]
        fn non_numeric_port(host in "[a-z0-9.]{1,24}", port in "[0-9]{0,3}[a-z]{1,4}") {
            let input = format!("{host}:{port}");

            prop_assert_eq!(split_host_port(&input), Err(AddrError::InvalidPort(input.clone())));
        }
    }
}
