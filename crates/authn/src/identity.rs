//! Session subjects and client addresses.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Identity payload stored behind a session token.
///
/// The full payload is written at issue time. [`desensitize`](Self::desensitize)
/// runs on every read so secrets never leave the authority.
pub trait SessionSubject: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Id of the user this identity belongs to. Must not contain `:`.
    fn user_id(&self) -> &str;

    /// Clears credential and other secret fields.
    fn desensitize(&mut self);

    /// Human-readable name, if the identity carries one.
    fn display_name(&self) -> Option<&str> {
        None
    }

    /// Contact email, if the identity carries one.
    fn email(&self) -> Option<&str> {
        None
    }
}

/// Default session subject: a logged-in user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    /// User id.
    #[builder(into)]
    pub id: String,
    /// Display name.
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Credential hash. Cleared by [`SessionSubject::desensitize`].
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwd: Option<String>,
    /// Contact email.
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Contact phone.
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Free-form note.
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

impl SessionSubject for UserIdentity {
    fn user_id(&self) -> &str {
        &self.id
    }

    fn desensitize(&mut self) {
        self.pwd = None;
    }

    fn display_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

/// Headers consulted for the caller's address, in priority order.
pub const CLIENT_IP_HEADERS: [&str; 6] = [
    "X-Forwarded-For",
    "Proxy-Client-IP",
    "WL-Proxy-Client-IP",
    "HTTP_CLIENT_IP",
    "HTTP_X_FORWARDED_FOR",
    "X-Real-IP",
];

/// Address of the caller behind a request.
///
/// An IPv4-mapped IPv6 address fills both fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIp {
    /// IPv4 form of the address.
    pub ipv4: Option<Ipv4Addr>,
    /// IPv6 form of the address.
    pub ipv6: Option<Ipv6Addr>,
}

impl ClientIp {
    /// Resolves the caller's address from proxy headers.
    ///
    /// Headers are checked in [`CLIENT_IP_HEADERS`] order, matched without
    /// regard to case. Within a comma-separated chain the first entry that
    /// parses as an address wins; `unknown` entries are skipped. When no
    /// header yields an address, `remote` (the socket peer) is used.
    pub fn from_headers<'a, I>(headers: I, remote: Option<IpAddr>) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let headers: Vec<(&str, &str)> = headers.into_iter().collect();
        CLIENT_IP_HEADERS
            .iter()
            .flat_map(|wanted| {
                headers
                    .iter()
                    .filter(move |(name, _)| name.eq_ignore_ascii_case(wanted))
                    .map(|(_, value)| *value)
            })
            .find_map(first_valid_entry)
            .or(remote)
            .map(Self::from)
    }

    /// The address, preferring its IPv4 form.
    #[must_use]
    pub fn addr(&self) -> Option<IpAddr> {
        self.ipv4.map(IpAddr::V4).or(self.ipv6.map(IpAddr::V6))
    }
}

fn first_valid_entry(chain: &str) -> Option<IpAddr> {
    chain
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.eq_ignore_ascii_case("unknown"))
        .find_map(|entry| entry.parse().ok())
}

impl From<IpAddr> for ClientIp {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self { ipv4: Some(v4), ipv6: None },
            IpAddr::V6(v6) => Self { ipv4: v6.to_ipv4_mapped(), ipv6: Some(v6) },
        }
    }
}

impl fmt::Display for ClientIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr() {
            Some(addr) => write!(f, "{addr}"),
            None => write!(f, "-"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_desensitize_clears_password_only() {
        let mut user = UserIdentity::builder()
            .id("7")
            .name("Ada")
            .pwd("$2b$10$hash")
            .email("ada@example.com")
            .build();
        user.desensitize();

        assert_eq!(user.pwd, None);
        assert_eq!(user.display_name(), Some("Ada"));
        assert_eq!(SessionSubject::email(&user), Some("ada@example.com"));
    }

    #[test]
    fn test_user_identity_wire_names() {
        let user = UserIdentity::builder().id("7").pwd("secret").build();
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json, serde_json::json!({ "id": "7", "pwd": "secret" }));
    }

    #[rstest]
    #[case::forwarded_chain(&[("X-Forwarded-For", "unknown, 10.0.0.7, 10.0.0.1")], "10.0.0.7")]
    #[case::case_insensitive(&[("x-real-ip", "192.168.1.20")], "192.168.1.20")]
    #[case::priority(&[("X-Real-IP", "10.0.0.2"), ("Proxy-Client-IP", "10.0.0.3")], "10.0.0.3")]
    #[case::skips_garbage(&[("X-Forwarded-For", "not-an-ip"), ("X-Real-IP", "10.0.0.4")], "10.0.0.4")]
    #[case::ipv6(&[("HTTP_CLIENT_IP", "2001:db8::1")], "2001:db8::1")]
    fn test_from_headers(#[case] headers: &[(&str, &str)], #[case] expected: &str) {
        let ip = ClientIp::from_headers(headers.iter().copied(), None).unwrap();
        assert_eq!(ip.addr(), Some(expected.parse().unwrap()));
    }

    #[test]
    fn test_falls_back_to_remote_address() {
        let remote: IpAddr = "172.16.0.9".parse().unwrap();
        let ip = ClientIp::from_headers([("X-Forwarded-For", "unknown")], Some(remote)).unwrap();
        assert_eq!(ip.to_string(), "172.16.0.9");

        assert_eq!(ClientIp::from_headers(std::iter::empty(), None), None);
    }

    #[test]
    fn test_mapped_ipv6_fills_both_forms() {
        let ip = ClientIp::from("::ffff:10.1.2.3".parse::<IpAddr>().unwrap());
        assert_eq!(ip.ipv4, Some(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(ip.ipv6.is_some());
        assert_eq!(ip.to_string(), "10.1.2.3");
    }
}
