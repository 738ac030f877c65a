use std::fmt;
use std::str::FromStr;

use url::Url;

/// Public URL of a broker
///
/// Doubles as the audience of every attestation token minted for it, so a
/// token issued for one broker is useless at another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerEndpoint(Url);

impl BrokerEndpoint {
    pub fn new(url: Url) -> Self {
        Self(url)
    }

    /// The endpoint of a broker deployed to Cloud Run in `region`.
    pub fn cloud_run(project_number: &str, region: &str) -> Result<Self, url::ParseError> {
        Url::parse(&format!(
            "https://broker-{}.{}.run.app/",
            project_number, region
        ))
        .map(Self)
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn audience(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for BrokerEndpoint {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Url::parse(s).map(Self)
    }
}
