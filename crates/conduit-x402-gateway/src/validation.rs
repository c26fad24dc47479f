//! Upstream endpoint vetting.
//!
//! A PROXY service points the gateway at an arbitrary URL, and every settled
//! payment triggers a server-side fetch of it. Registration is therefore
//! where request forgery gets stopped: an endpoint must be HTTPS, must name a
//! fully qualified public host, and must not point back at the gateway
//! itself (a self-referential endpoint would settle a payment and then
//! re-enter `/gateway`, demanding a second one). Hosts are resolved again at
//! fulfillment time because a registered domain can be re-pointed at an
//! internal address afterwards.

use std::net::IpAddr;

use url::Url;

use crate::error::GatewayError;

fn invalid(message: &str) -> GatewayError {
    GatewayError::InvalidRequest(message.to_string())
}

/// Fold IPv4-mapped IPv6 down to IPv4 before classification.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// True when an address is routable on the public internet.
///
/// The proxy must never fetch from loopback, RFC 1918, link-local, CGNAT,
/// documentation or unique-local space; those are where cloud metadata
/// endpoints and internal services live.
pub fn ip_is_public(ip: IpAddr) -> bool {
    match canonical(ip) {
        IpAddr::V4(v4) => {
            let [a, b, _, _] = v4.octets();
            let cgnat = a == 100 && (64..128).contains(&b); // 100.64.0.0/10
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || cgnat)
        }
        IpAddr::V6(v6) => {
            let head = v6.segments()[0];
            let unique_local = (head & 0xfe00) == 0xfc00; // fc00::/7
            let link_local = (head & 0xffc0) == 0xfe80; // fe80::/10
            !(v6.is_unspecified() || v6.is_loopback() || unique_local || link_local)
        }
    }
}

/// Vet a PROXY endpoint at registration time.
///
/// Single-label hosts (`localhost`, bare intranet names) are refused outright
/// by requiring a dot in the domain; IP literals are classified directly.
pub fn vet_upstream_url(raw: &str, gateway_base: &str) -> Result<Url, GatewayError> {
    let url = Url::parse(raw).map_err(|_| invalid("endpoint is not a valid URL"))?;

    if url.scheme() != "https" {
        return Err(invalid("endpoint must be https"));
    }

    match url.host() {
        None => return Err(invalid("endpoint URL has no host")),
        Some(url::Host::Ipv4(ip)) if !ip_is_public(IpAddr::V4(ip)) => {
            return Err(invalid("endpoint address is not publicly routable"));
        }
        Some(url::Host::Ipv6(ip)) if !ip_is_public(IpAddr::V6(ip)) => {
            return Err(invalid("endpoint address is not publicly routable"));
        }
        Some(url::Host::Domain(name)) if !name.contains('.') => {
            return Err(invalid("endpoint host must be a fully qualified domain"));
        }
        Some(_) => {}
    }

    // A paid endpoint pointing back at this gateway would recurse through
    // /gateway on every fulfillment.
    let own_host = Url::parse(gateway_base)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
    if let (Some(own), Some(theirs)) = (own_host, url.host_str()) {
        if own == theirs.to_ascii_lowercase() {
            return Err(invalid("endpoint must not point back at this gateway"));
        }
    }

    Ok(url)
}

/// Resolve a host immediately before fetching and refuse non-public answers.
/// This is the DNS-rebinding half of the check in [`vet_upstream_url`].
pub async fn ensure_public_host(host: &str) -> Result<(), GatewayError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return if ip_is_public(ip) {
            Ok(())
        } else {
            Err(invalid("endpoint address is not publicly routable"))
        };
    }

    let resolved = tokio::net::lookup_host((host, 443u16))
        .await
        .map_err(|e| GatewayError::Internal(format!("could not resolve {host}: {e}")))?;

    for addr in resolved {
        if !ip_is_public(addr.ip()) {
            return Err(invalid("endpoint resolves into a non-public network"));
        }
    }
    Ok(())
}

/// Service ids double as URL path segments and registry hash preimages:
/// kebab slugs only, 3 to 64 characters, no doubled or edge hyphens.
pub fn validate_service_id(id: &str) -> Result<(), GatewayError> {
    if !(3..=64).contains(&id.len()) {
        return Err(invalid("service id must be 3 to 64 characters"));
    }
    let well_formed = id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !id.starts_with('-')
        && !id.ends_with('-')
        && !id.contains("--");
    if !well_formed {
        return Err(invalid(
            "service id must be a kebab slug: letters, digits, single hyphens",
        ));
    }
    Ok(())
}
