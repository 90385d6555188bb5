use crate::browser::{BrowserDriver, UnconfiguredDriver};
use scouter_fabric::{AsnDatabase, Resolver};
use std::path::Path;
use std::sync::Arc;

/// Shared collaborators handed to every probe run.
#[derive(Clone)]
pub struct ProbeContext {
    pub resolver: Resolver,
    pub asn: Arc<AsnDatabase>,
    pub browser: Arc<dyn BrowserDriver>,
}

impl ProbeContext {
    /// System resolver, the ASN database at `asn_database`, and no browser backend.
    pub fn new<P: AsRef<Path>>(asn_database: P) -> Self {
        Self {
            resolver: Resolver::from_system(),
            asn: Arc::new(AsnDatabase::open(asn_database)),
            browser: Arc::new(UnconfiguredDriver),
        }
    }

    #[must_use]
    pub fn with_browser(mut self, driver: Arc<dyn BrowserDriver>) -> Self {
        self.browser = driver;
        self
    }
}
