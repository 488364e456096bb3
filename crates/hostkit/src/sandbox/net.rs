//! Syntax checks for hosts, networks, port lists and user names.

use std::net::IpAddr;

use crate::error::Rejection;

/// Longest DNS name.
pub const MAX_HOST_LEN: usize = 253;

/// Most comma-separated entries accepted in a port list.
pub const MAX_PORT_ENTRIES: usize = 64;

/// Smallest IPv4 prefix accepted for network sweeps (/16 = 65k hosts).
pub const MIN_IPV4_PREFIX: u8 = 16;

/// Smallest IPv6 prefix accepted for network sweeps.
pub const MIN_IPV6_PREFIX: u8 = 112;

const MAX_USERNAME_LEN: usize = 64;

pub fn check_host(param: &str, host: &str) -> Result<(), Rejection> {
    if host.is_empty() {
        return Err(Rejection::out_of_range(param, "host must not be empty"));
    }
    if host.len() > MAX_HOST_LEN {
        return Err(Rejection::out_of_range(
            param,
            format!("host is {} characters, limit is {MAX_HOST_LEN}", host.len()),
        ));
    }
    if host.starts_with('-') {
        return Err(Rejection::dangerous(param, "host must not start with '-'"));
    }
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if let Some(c) = host
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':')))
    {
        return Err(Rejection::dangerous(
            param,
            format!("character {c:?} is not allowed in a host name"),
        ));
    }
    Ok(())
}

/// A CIDR network like `192.168.1.0/24`.
pub fn check_network(param: &str, network: &str) -> Result<(), Rejection> {
    if network.starts_with('-') {
        return Err(Rejection::dangerous(param, "network must not start with '-'"));
    }
    let Some((addr, prefix)) = network.split_once('/') else {
        return Err(Rejection::out_of_range(
            param,
            "network must be in CIDR notation, e.g. 192.168.1.0/24",
        ));
    };
    check_host(param, addr)?;
    let addr: IpAddr = addr.parse().map_err(|_| {
        Rejection::out_of_range(param, format!("'{addr}' is not an IP address"))
    })?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Rejection::dangerous(
            param,
            format!("prefix length '{prefix}' is not a number"),
        ));
    }
    let prefix: u32 = prefix
        .parse()
        .map_err(|_| Rejection::out_of_range(param, "prefix length is too large"))?;

    let (min, max) = match addr {
        IpAddr::V4(_) => (MIN_IPV4_PREFIX, 32u8),
        IpAddr::V6(_) => (MIN_IPV6_PREFIX, 128u8),
    };
    if prefix < u32::from(min) || prefix > u32::from(max) {
        return Err(Rejection::out_of_range(
            param,
            format!("prefix length must be between /{min} and /{max}, got /{prefix}"),
        ));
    }
    Ok(())
}

/// A host or a CIDR network.
pub fn check_target(param: &str, target: &str) -> Result<(), Rejection> {
    if target.contains('/') {
        check_network(param, target)
    } else {
        check_host(param, target)
    }
}

/// Parse a port list like `22,80,443` or `1-1024`. Returns inclusive
/// ranges in request order.
pub fn parse_port_list(param: &str, spec: &str) -> Result<Vec<(u16, u16)>, Rejection> {
    let entries: Vec<&str> = spec.split(',').map(str::trim).collect();
    if entries.iter().all(|e| e.is_empty()) {
        return Err(Rejection::out_of_range(param, "port list must not be empty"));
    }
    if entries.len() > MAX_PORT_ENTRIES {
        return Err(Rejection::out_of_range(
            param,
            format!("{} port entries, limit is {MAX_PORT_ENTRIES}", entries.len()),
        ));
    }

    entries
        .into_iter()
        .map(|entry| match entry.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_port(param, lo.trim())?;
                let hi = parse_port(param, hi.trim())?;
                if lo > hi {
                    return Err(Rejection::out_of_range(
                        param,
                        format!("port range {lo}-{hi} is descending"),
                    ));
                }
                Ok((lo, hi))
            }
            None => parse_port(param, entry).map(|p| (p, p)),
        })
        .collect()
}

fn parse_port(param: &str, text: &str) -> Result<u16, Rejection> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Rejection::type_mismatch(
            param,
            format!("'{text}' is not a port number"),
        ));
    }
    let out_of_range =
        || Rejection::out_of_range(param, format!("port {text} is outside 1-65535"));
    let port: u64 = text.parse().map_err(|_| out_of_range())?;
    match u16::try_from(port) {
        Ok(p) if p >= 1 => Ok(p),
        _ => Err(out_of_range()),
    }
}

/// Login name for ssh/scp/ftp.
pub fn check_username(param: &str, user: &str) -> Result<(), Rejection> {
    if user.is_empty() {
        return Err(Rejection::out_of_range(param, "user name must not be empty"));
    }
    if user.len() > MAX_USERNAME_LEN {
        return Err(Rejection::out_of_range(
            param,
            format!("user name longer than {MAX_USERNAME_LEN} characters"),
        ));
    }
    if user.starts_with('-') {
        return Err(Rejection::dangerous(param, "user name must not start with '-'"));
    }
    if let Some(c) = user
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@')))
    {
        return Err(Rejection::dangerous(
            param,
            format!("character {c:?} is not allowed in a user name"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn kind<T>(r: Result<T, Rejection>) -> ErrorKind {
        r.err().map(|e| e.kind()).unwrap()
    }

    #[test]
    fn hosts() {
        assert!(check_host("host", "example.org").is_ok());
        assert!(check_host("host", "10.0.0.1").is_ok());
        assert!(check_host("host", "fe80::1").is_ok());
        assert_eq!(kind(check_host("host", "")), ErrorKind::OutOfRange);
        assert_eq!(kind(check_host("host", &"a".repeat(254))), ErrorKind::OutOfRange);
        assert_eq!(kind(check_host("host", "-oProxyCommand")), ErrorKind::DangerousOperation);
        assert_eq!(kind(check_host("host", "a.org;id")), ErrorKind::DangerousOperation);
    }

    #[test]
    fn networks() {
        assert!(check_network("network", "192.168.1.0/24").is_ok());
        assert!(check_network("network", "10.0.0.0/16").is_ok());
        assert_eq!(kind(check_network("network", "10.0.0.0/8")), ErrorKind::OutOfRange);
        assert_eq!(kind(check_network("network", "10.0.0.0/33")), ErrorKind::OutOfRange);
        assert_eq!(kind(check_network("network", "10.0.0.0")), ErrorKind::OutOfRange);
        assert_eq!(kind(check_network("network", "example.org/24")), ErrorKind::OutOfRange);
        assert_eq!(kind(check_network("network", "10.0.0.0/2x")), ErrorKind::DangerousOperation);
    }

    #[test]
    fn prefix_bounds_per_family() {
        assert!(check_network("network", "10.0.0.1/32").is_ok());
        assert!(check_network("network", "fd00::/112").is_ok());
        assert!(check_network("network", "fd00::1/128").is_ok());
        assert_eq!(kind(check_network("network", "fd00::/64")), ErrorKind::OutOfRange);
        assert_eq!(kind(check_network("network", "fd00::/129")), ErrorKind::OutOfRange);
        let err = check_network("network", "10.0.0.0/40").unwrap_err();
        assert!(err.to_string().contains("/16 and /32"), "{err}");
    }

    #[test]
    fn port_lists() {
        assert_eq!(parse_port_list("ports", "22").unwrap(), vec![(22, 22)]);
        assert_eq!(
            parse_port_list("ports", "22, 80,1000-2000").unwrap(),
            vec![(22, 22), (80, 80), (1000, 2000)]
        );
        assert_eq!(kind(parse_port_list("ports", "65536")), ErrorKind::OutOfRange);
        assert_eq!(kind(parse_port_list("ports", "0")), ErrorKind::OutOfRange);
        assert_eq!(kind(parse_port_list("ports", "99999999999999999999")), ErrorKind::OutOfRange);
        assert_eq!(kind(parse_port_list("ports", "90-80")), ErrorKind::OutOfRange);
        assert_eq!(kind(parse_port_list("ports", "http")), ErrorKind::TypeMismatch);
        assert_eq!(kind(parse_port_list("ports", "")), ErrorKind::OutOfRange);
    }

    #[test]
    fn port_list_entry_limit() {
        let many = (1..=65).map(|p| p.to_string()).collect::<Vec<_>>().join(",");
        assert_eq!(kind(parse_port_list("ports", &many)), ErrorKind::OutOfRange);
    }

    #[test]
    fn usernames() {
        assert!(check_username("username", "deploy").is_ok());
        assert!(check_username("username", "first.last").is_ok());
        assert_eq!(kind(check_username("username", "")), ErrorKind::OutOfRange);
        assert_eq!(kind(check_username("username", "-l")), ErrorKind::DangerousOperation);
        assert_eq!(kind(check_username("username", "a b")), ErrorKind::DangerousOperation);
    }
}
