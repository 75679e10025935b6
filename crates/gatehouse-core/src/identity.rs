//! Client identity resolution.
//!
//! Maps the transport-level facts about a request to the key its token
//! bucket is stored under. Resolution is a pure function and never fails;
//! an empty key means "could not identify the caller".

use std::net::IpAddr;

use crate::config::Strategy;

/// Key used by [`Strategy::Global`].
pub const GLOBAL_KEY: &str = "global";

/// Key shared by callers whose identity resolved to an empty string.
pub const ANONYMOUS_KEY: &str = "anonymous";

/// The request metadata identity resolution looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMeta<'a> {
    /// Raw `X-Forwarded-For` header value.
    pub forwarded_for: Option<&'a str>,
    /// Peer address of the connection.
    pub remote_ip: Option<IpAddr>,
    /// Raw `Authorization` header value.
    pub credential: Option<&'a str>,
}

/// Derives the rate-limit key for a request under `strategy`.
pub fn resolve(strategy: Strategy, meta: &ClientMeta<'_>) -> String {
    match strategy {
        Strategy::Ip => {
            let forwarded = meta
                .forwarded_for
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            match forwarded {
                Some(addr) => addr.to_string(),
                None => meta.remote_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            }
        }
        Strategy::Token => meta.credential.unwrap_or_default().to_string(),
        Strategy::Global => GLOBAL_KEY.to_string(),
    }
}
