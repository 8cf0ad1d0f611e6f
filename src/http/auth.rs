//! Authentication challenge bookkeeping.
//!
//! The engine never builds scheme messages itself. It hands the raw
//! `WWW-Authenticate`/`Proxy-Authenticate` values to a [`ChallengeResolver`]
//! and stores the returned header verbatim. The only scheme it knows by name
//! is `NTLM`, whose rounds must stay on one connection.

use crate::base::neterror::NetError;
use base64::{engine::general_purpose, Engine as _};
use http::header::{
    HeaderName, AUTHORIZATION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, WWW_AUTHENTICATE,
};
use http::{Method, StatusCode};
use std::fmt;
use url::Url;
use zeroize::Zeroizing;

/// Username and password, with an optional Windows domain.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: Zeroizing<String>,
    pub domain: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Identity used to match NTLM-authenticated connections.
    pub fn id(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}\\{}", domain.to_ascii_lowercase(), self.username),
            None => self.username.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// Which party issued a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTarget {
    Server,
    Proxy,
}

impl AuthTarget {
    pub fn from_status(status: StatusCode) -> Option<Self> {
        match status {
            StatusCode::UNAUTHORIZED => Some(AuthTarget::Server),
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => Some(AuthTarget::Proxy),
            _ => None,
        }
    }

    pub fn challenge_header(self) -> HeaderName {
        match self {
            AuthTarget::Server => WWW_AUTHENTICATE,
            AuthTarget::Proxy => PROXY_AUTHENTICATE,
        }
    }

    pub fn authorization_header(self) -> HeaderName {
        match self {
            AuthTarget::Server => AUTHORIZATION,
            AuthTarget::Proxy => PROXY_AUTHORIZATION,
        }
    }
}

/// Progress through an NTLM handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NtlmRound {
    #[default]
    None,
    /// Negotiate message sent, waiting for the server challenge.
    Challenge,
    /// Challenge answered.
    Response,
}

/// Context handed to the resolver alongside the challenge values.
#[derive(Debug, Clone, Copy)]
pub struct ChallengeRequest<'a> {
    pub method: &'a Method,
    pub url: &'a Url,
    pub target: AuthTarget,
    pub round: NtlmRound,
}

/// What a resolver produced for one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResolution {
    /// Sent verbatim as the next `Authorization`/`Proxy-Authorization`.
    pub header_value: String,
    /// No further challenge is expected for this scheme.
    pub complete: bool,
    pub scheme: String,
}

impl ChallengeResolution {
    pub fn is_ntlm(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("NTLM")
    }
}

/// Turns challenge header values into an authorization header value.
///
/// `Ok(None)` means no offered scheme is supported; the response is then
/// treated like any other error status.
pub trait ChallengeResolver: Send + Sync {
    fn resolve(
        &self,
        challenges: &[String],
        request: &ChallengeRequest<'_>,
        credentials: &Credentials,
    ) -> Result<Option<ChallengeResolution>, NetError>;
}

/// Answers `Basic` challenges; ignores every other scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicResolver;

impl BasicResolver {
    pub fn header_value(credentials: &Credentials) -> String {
        let raw = Zeroizing::new(format!("{}:{}", credentials.username, credentials.password()));
        format!("Basic {}", general_purpose::STANDARD.encode(raw.as_bytes()))
    }
}

impl ChallengeResolver for BasicResolver {
    fn resolve(
        &self,
        challenges: &[String],
        _request: &ChallengeRequest<'_>,
        credentials: &Credentials,
    ) -> Result<Option<ChallengeResolution>, NetError> {
        let offered = challenges
            .iter()
            .any(|c| scheme_of(c).eq_ignore_ascii_case("basic"));
        if !offered {
            return Ok(None);
        }
        Ok(Some(ChallengeResolution {
            header_value: Self::header_value(credentials),
            complete: true,
            scheme: "Basic".to_string(),
        }))
    }
}

/// First token of a challenge value (`Basic realm="x"` → `Basic`).
pub fn scheme_of(challenge: &str) -> &str {
    challenge.split_whitespace().next().unwrap_or_default()
}

/// Per-request authorization state for one target (origin or proxy).
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    completed: bool,
    ntlm_round: NtlmRound,
    header: Option<String>,
    scheme: Option<String>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header value to attach to the next attempt.
    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn ntlm_round(&self) -> NtlmRound {
        self.ntlm_round
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// An NTLM handshake has started and has not finished.
    pub fn ntlm_in_progress(&self) -> bool {
        self.ntlm_round != NtlmRound::None && !self.completed
    }

    /// Store a resolution; `NTLM` advances the round.
    pub fn apply(&mut self, resolution: ChallengeResolution) {
        if resolution.is_ntlm() {
            self.ntlm_round = match self.ntlm_round {
                NtlmRound::None => NtlmRound::Challenge,
                NtlmRound::Challenge | NtlmRound::Response => NtlmRound::Response,
            };
        }
        tracing::debug!(
            scheme = %resolution.scheme,
            complete = resolution.complete,
            round = ?self.ntlm_round,
            "authorization updated"
        );
        self.completed = resolution.complete;
        self.scheme = Some(resolution.scheme);
        self.header = Some(resolution.header_value);
    }

    /// Seed with a preemptive header, e.g. proxy credentials known up front.
    pub fn preset(&mut self, header_value: String) {
        self.header = Some(header_value);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(method: &'a Method, url: &'a Url) -> ChallengeRequest<'a> {
        ChallengeRequest {
            method,
            url,
            target: AuthTarget::Server,
            round: NtlmRound::None,
        }
    }

    #[test]
    fn test_basic_resolver() {
        let url = Url::parse("http://example.com/").unwrap();
        let creds = Credentials::new("user", "pass");
        let resolution = BasicResolver
            .resolve(&["Basic realm=\"x\"".to_string()], &request(&Method::GET, &url), &creds)
            .unwrap()
            .unwrap();
        assert_eq!(resolution.header_value, "Basic dXNlcjpwYXNz");
        assert!(resolution.complete);
        assert!(!resolution.is_ntlm());
    }

    #[test]
    fn test_basic_resolver_ignores_other_schemes() {
        let url = Url::parse("http://example.com/").unwrap();
        let creds = Credentials::new("user", "pass");
        let resolution = BasicResolver
            .resolve(
                &["Negotiate".to_string(), "NTLM".to_string()],
                &request(&Method::GET, &url),
                &creds,
            )
            .unwrap();
        assert!(resolution.is_none());
    }

    #[test]
    fn test_ntlm_round_progression() {
        let mut state = AuthState::new();
        let step = |complete| ChallengeResolution {
            header_value: "NTLM token".into(),
            complete,
            scheme: "NTLM".into(),
        };
        state.apply(step(false));
        assert_eq!(state.ntlm_round(), NtlmRound::Challenge);
        assert!(state.ntlm_in_progress());
        state.apply(step(true));
        assert_eq!(state.ntlm_round(), NtlmRound::Response);
        assert!(state.is_completed());
        assert!(!state.ntlm_in_progress());

        state.reset();
        assert_eq!(state.ntlm_round(), NtlmRound::None);
        assert!(state.header().is_none());
    }

    #[test]
    fn test_credentials_id_and_debug() {
        let creds = Credentials::new("alice", "secret").with_domain("CORP");
        assert_eq!(creds.id(), "corp\\alice");
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[test]
    fn test_target_headers() {
        assert_eq!(AuthTarget::from_status(StatusCode::UNAUTHORIZED), Some(AuthTarget::Server));
        assert_eq!(AuthTarget::Proxy.authorization_header(), PROXY_AUTHORIZATION);
        assert_eq!(AuthTarget::Server.challenge_header(), WWW_AUTHENTICATE);
        assert_eq!(scheme_of("Digest realm=\"r\""), "Digest");
    }
}
