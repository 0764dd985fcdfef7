use email_address_parser::EmailAddress;
use rcgen::{DistinguishedName, DnType};
use tracing::{debug, info};

use crate::{
    cnf::Cnf,
    error::{Error, Result},
    store::{artifacts::CSR_CONFIG, ArtifactStore},
};

/// Fixed organizational unit written into every template.
pub const ORGANIZATIONAL_UNIT: &str = "Test Domain";

const OPENSSL_SPECIAL: [char; 3] = ['$', '#', '\\'];

const EMAIL_ADDRESS_OID: [u64; 7] = [1, 2, 840, 113549, 1, 9, 1];

/// Subject fields of both the CA and the leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedNameConfig {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub email_address: String,
    /// The hostname the leaf certificate is issued for.
    pub common_name: String,
}

impl Default for DistinguishedNameConfig {
    fn default() -> Self {
        Self {
            country: "US".into(),
            state: "California".into(),
            locality: "San Francisco".into(),
            organization: "My Organization".into(),
            email_address: "devcert-user@example.com".into(),
            common_name: "localhost.ssl".into(),
        }
    }
}

impl DistinguishedNameConfig {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("C", &self.country),
            ("ST", &self.state),
            ("L", &self.locality),
            ("O", &self.organization),
            ("emailAddress", &self.email_address),
            ("CN", &self.common_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!("{field} must not be empty")));
            }
            if value.chars().any(char::is_control) {
                return Err(Error::Configuration(format!(
                    "{field} must not contain control characters"
                )));
            }
            // OpenSSL reads `$` as a variable reference and `#` as a comment.
            if let Some(c) = value.chars().find(|c| OPENSSL_SPECIAL.contains(c)) {
                return Err(Error::Configuration(format!(
                    "{field} must not contain '{c}'"
                )));
            }
        }
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::Configuration(format!(
                "C must be a two-letter country code, got '{}'",
                self.country
            )));
        }
        if !EmailAddress::is_valid(&self.email_address, None) {
            return Err(Error::Configuration(format!(
                "'{}' is not a valid email address",
                self.email_address
            )));
        }
        if !self.common_name.is_ascii() || self.common_name.contains(char::is_whitespace) {
            return Err(Error::Configuration(format!(
                "'{}' is not a valid hostname",
                self.common_name
            )));
        }
        Ok(())
    }

    fn to_cnf(&self) -> String {
        format!(
            "[req]\n\
             default_bits = 2048\n\
             prompt = no\n\
             default_md = sha256\n\
             distinguished_name = dn\n\
             \n\
             [dn]\n\
             C={}\n\
             ST={}\n\
             L={}\n\
             O={}\n\
             OU={ORGANIZATIONAL_UNIT}\n\
             emailAddress={}\n\
             CN={}\n",
            self.country,
            self.state,
            self.locality,
            self.organization,
            self.email_address,
            self.common_name,
        )
    }
}

/// User-supplied values, from prompts or flags. Blank values count as absent.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DnOverrides {
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub organization: Option<String>,
    pub email_address: Option<String>,
    pub common_name: Option<String>,
}

fn pick(value: &Option<String>, default: String) -> String {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => value.to_owned(),
        _ => default,
    }
}

/// Reads and writes the `[dn]` block of `server.csr.cnf`.
pub struct ConfigStore<'a> {
    store: &'a dyn ArtifactStore,
}

impl<'a> ConfigStore<'a> {
    pub fn new(store: &'a dyn ArtifactStore) -> Self {
        Self { store }
    }

    pub fn exists(&self) -> bool {
        self.store.exists(CSR_CONFIG)
    }

    /// The persisted configuration if there is one, otherwise `overrides`
    /// merged over the defaults.
    pub fn resolve(&self, overrides: &DnOverrides) -> Result<DistinguishedNameConfig> {
        match self.load()? {
            Some(persisted) => {
                debug!("using persisted {CSR_CONFIG}");
                Ok(persisted)
            }
            None => Ok(Self::merge(overrides)),
        }
    }

    /// `overrides` merged over the defaults, ignoring anything persisted.
    pub fn merge(overrides: &DnOverrides) -> DistinguishedNameConfig {
        let defaults = DistinguishedNameConfig::default();
        DistinguishedNameConfig {
            country: pick(&overrides.country, defaults.country),
            state: pick(&overrides.state, defaults.state),
            locality: pick(&overrides.locality, defaults.locality),
            organization: pick(&overrides.organization, defaults.organization),
            email_address: pick(&overrides.email_address, defaults.email_address),
            common_name: pick(&overrides.common_name, defaults.common_name),
        }
    }

    pub fn load(&self) -> Result<Option<DistinguishedNameConfig>> {
        if !self.exists() {
            return Ok(None);
        }
        let cnf = self.template()?;
        let field = |key| cnf.get("dn", key).map(str::to_owned);
        let overrides = DnOverrides {
            country: field("C"),
            state: field("ST"),
            locality: field("L"),
            organization: field("O"),
            email_address: field("emailAddress"),
            common_name: field("CN"),
        };
        Ok(Some(Self::merge(&overrides)))
    }

    pub fn persist(&self, config: &DistinguishedNameConfig) -> Result<()> {
        config.validate()?;
        info!("*** writing {CSR_CONFIG}");
        self.store.write(CSR_CONFIG, &config.to_cnf())
    }

    /// The parsed template. Fails with `ArtifactMissing` when absent.
    pub fn template(&self) -> Result<Cnf> {
        if !self.exists() {
            return Err(Error::missing_config());
        }
        let text = self.store.read(CSR_CONFIG)?;
        let cnf = Cnf::parse(CSR_CONFIG, &text)?;
        if cnf.section("dn").is_none() {
            return Err(Error::parse(CSR_CONFIG, "no [dn] section"));
        }
        Ok(cnf)
    }

    /// The subject encoded by the template, in template order.
    pub fn distinguished_name(&self) -> Result<DistinguishedName> {
        let cnf = self.template()?;
        let mut dn = DistinguishedName::new();
        for (key, value) in cnf.section("dn").unwrap_or_default() {
            let dn_type = match key.as_str() {
                "C" => DnType::CountryName,
                "ST" => DnType::StateOrProvinceName,
                "L" => DnType::LocalityName,
                "O" => DnType::OrganizationName,
                "OU" => DnType::OrganizationalUnitName,
                "emailAddress" => DnType::CustomDnType(EMAIL_ADDRESS_OID.to_vec()),
                "CN" => DnType::CommonName,
                other => {
                    return Err(Error::parse(
                        CSR_CONFIG,
                        format!("unsupported [dn] field '{other}'"),
                    ))
                }
            };
            dn.push(dn_type, value.as_str());
        }
        Ok(dn)
    }
}
