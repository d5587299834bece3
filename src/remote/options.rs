use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

// -----------------------------------------------------------------------------
// ----- ConnectOptions --------------------------------------------------------

/// Everything the remote API needs to authenticate and target a connect.
///
/// The pool does not check that callers sharing a key pass identical options;
/// whichever caller creates the entry decides what the connect uses.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub api_key: SecretString,
    pub domain: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into().into_boxed_str()),
            domain: None,
            request_timeout: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn api_key_exposed(&self) -> &str {
        self.api_key.expose_secret()
    }
}

// -----------------------------------------------------------------------------
// ----- WatchOptions ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub recursive: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { recursive: true }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
