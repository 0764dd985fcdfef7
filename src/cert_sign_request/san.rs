use std::net::IpAddr;

use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyUsagePurpose, SanType};
use tracing::{debug, info, warn};

use super::dn::ConfigStore;
use crate::{
    cnf::Cnf,
    error::{Error, Result},
    store::{artifacts::V3_EXT, ArtifactStore},
};

const KEY_USAGE_NAMES: [(&str, KeyUsagePurpose); 9] = [
    ("digitalSignature", KeyUsagePurpose::DigitalSignature),
    ("nonRepudiation", KeyUsagePurpose::ContentCommitment),
    ("keyEncipherment", KeyUsagePurpose::KeyEncipherment),
    ("dataEncipherment", KeyUsagePurpose::DataEncipherment),
    ("keyAgreement", KeyUsagePurpose::KeyAgreement),
    ("keyCertSign", KeyUsagePurpose::KeyCertSign),
    ("cRLSign", KeyUsagePurpose::CrlSign),
    ("encipherOnly", KeyUsagePurpose::EncipherOnly),
    ("decipherOnly", KeyUsagePurpose::DecipherOnly),
];

/// The extensions `v3.ext` asks for on the leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanExtensionSpec {
    pub authority_key_identifier: bool,
    pub ca: bool,
    pub key_usages: Vec<KeyUsagePurpose>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

impl SanExtensionSpec {
    /// A server certificate valid for exactly `common_name`.
    pub fn for_common_name(common_name: &str) -> Self {
        Self {
            authority_key_identifier: true,
            ca: false,
            key_usages: vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::ContentCommitment,
                KeyUsagePurpose::KeyEncipherment,
                KeyUsagePurpose::DataEncipherment,
            ],
            dns_names: vec![common_name.to_owned()],
            ip_addresses: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let cnf = Cnf::parse(V3_EXT, text)?;

        let ca = match cnf.get("", "basicConstraints") {
            None => false,
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|part| !part.eq_ignore_ascii_case("critical"))
                .any(|part| part.eq_ignore_ascii_case("CA:TRUE")),
        };

        let mut key_usages = Vec::new();
        for name in list(cnf.get("", "keyUsage").unwrap_or_default()) {
            let usage = KEY_USAGE_NAMES
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, usage)| usage.clone())
                .ok_or_else(|| Error::parse(V3_EXT, format!("unknown keyUsage '{name}'")))?;
            key_usages.push(usage);
        }

        let mut spec = Self {
            authority_key_identifier: cnf.get("", "authorityKeyIdentifier").is_some(),
            ca,
            key_usages,
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
        };

        match cnf.get("", "subjectAltName") {
            None => {}
            Some(reference) if reference.starts_with('@') => {
                let section = cnf.section(&reference[1..]).ok_or_else(|| {
                    Error::parse(V3_EXT, format!("missing section [{}]", &reference[1..]))
                })?;
                for (key, value) in section {
                    let kind = key.split('.').next().unwrap_or_default();
                    spec.push_name(kind, value)?;
                }
            }
            Some(inline) => {
                for entry in list(inline) {
                    let (kind, value) = entry.split_once(':').ok_or_else(|| {
                        Error::parse(V3_EXT, format!("bad subjectAltName entry '{entry}'"))
                    })?;
                    spec.push_name(kind, value)?;
                }
            }
        }

        Ok(spec)
    }

    fn push_name(&mut self, kind: &str, value: &str) -> Result<()> {
        match kind {
            "DNS" => self.dns_names.push(value.to_owned()),
            "IP" => self.ip_addresses.push(value.parse().map_err(|_| {
                Error::parse(V3_EXT, format!("'{value}' is not an IP address"))
            })?),
            other => {
                return Err(Error::parse(
                    V3_EXT,
                    format!("unsupported subjectAltName type '{other}'"),
                ))
            }
        }
        Ok(())
    }

    pub fn to_ext(&self) -> String {
        let mut text = String::new();
        if self.authority_key_identifier {
            text.push_str("authorityKeyIdentifier=keyid,issuer\n");
        }
        text.push_str(if self.ca {
            "basicConstraints=CA:TRUE\n"
        } else {
            "basicConstraints=CA:FALSE\n"
        });
        if !self.key_usages.is_empty() {
            let names: Vec<&str> = self
                .key_usages
                .iter()
                .filter_map(|usage| {
                    KEY_USAGE_NAMES
                        .iter()
                        .find(|(_, known)| known == usage)
                        .map(|(name, _)| *name)
                })
                .collect();
            text.push_str(&format!("keyUsage = {}\n", names.join(", ")));
        }
        text.push_str("subjectAltName = @alt_names\n\n[alt_names]\n");
        for (index, dns) in self.dns_names.iter().enumerate() {
            text.push_str(&format!("DNS.{} = {dns}\n", index + 1));
        }
        for (index, ip) in self.ip_addresses.iter().enumerate() {
            text.push_str(&format!("IP.{} = {ip}\n", index + 1));
        }
        text
    }

    /// Copy the extensions onto leaf certificate parameters.
    pub fn apply(&self, params: &mut CertificateParams) -> Result<()> {
        params.use_authority_key_identifier_extension = self.authority_key_identifier;
        params.is_ca = if self.ca {
            IsCa::Ca(BasicConstraints::Unconstrained)
        } else {
            IsCa::ExplicitNoCa
        };
        params.key_usages = self.key_usages.clone();

        let mut names = Vec::with_capacity(self.dns_names.len() + self.ip_addresses.len());
        for dns in &self.dns_names {
            names.push(SanType::DnsName(dns.clone().try_into().map_err(|_| {
                Error::Configuration(format!("'{dns}' is not a valid DNS name"))
            })?));
        }
        names.extend(self.ip_addresses.iter().copied().map(SanType::IpAddress));
        params.subject_alt_names = names;
        Ok(())
    }
}

fn list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && *part != "critical")
}

/// Maintains `v3.ext`, derived from the CN persisted in `server.csr.cnf`.
pub struct SanExtensionBuilder<'a> {
    store: &'a dyn ArtifactStore,
}

impl<'a> SanExtensionBuilder<'a> {
    pub fn new(store: &'a dyn ArtifactStore) -> Self {
        Self { store }
    }

    /// Build `v3.ext` unless it already exists. An existing file is returned
    /// as-is, even when the template's CN has changed since.
    pub fn ensure(&self) -> Result<SanExtensionSpec> {
        let common_name = self.persisted_common_name()?;
        if !self.store.exists(V3_EXT) {
            return self.write_for(&common_name);
        }

        debug!("{V3_EXT} already exists, keeping it");
        let spec = SanExtensionSpec::parse(&self.store.read(V3_EXT)?)?;
        if !spec.dns_names.contains(&common_name) {
            warn!(
                "{V3_EXT} does not list CN {common_name}; run 'devcert generate-v3-ext-file' to rebuild it"
            );
        }
        Ok(spec)
    }

    /// Rebuild `v3.ext` from the current template.
    pub fn write(&self) -> Result<SanExtensionSpec> {
        let common_name = self.persisted_common_name()?;
        self.write_for(&common_name)
    }

    fn write_for(&self, common_name: &str) -> Result<SanExtensionSpec> {
        info!("*** generating {V3_EXT}");
        let spec = SanExtensionSpec::for_common_name(common_name);
        self.store.write(V3_EXT, &spec.to_ext())?;
        Ok(spec)
    }

    fn persisted_common_name(&self) -> Result<String> {
        let configs = ConfigStore::new(self.store);
        let config = configs.load()?.ok_or_else(Error::missing_config)?;
        Ok(config.common_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cert_sign_request::dn::DnOverrides,
        store::{artifacts::CSR_CONFIG, MemoryStore},
    };

    fn persist(store: &MemoryStore, common_name: &str) {
        let config = ConfigStore::merge(&DnOverrides {
            common_name: Some(common_name.into()),
            ..Default::default()
        });
        ConfigStore::new(store).persist(&config).unwrap();
    }

    #[test]
    fn test_ext_file_layout() {
        assert_eq!(
            SanExtensionSpec::for_common_name("localhost.ssl").to_ext(),
            "authorityKeyIdentifier=keyid,issuer\n\
             basicConstraints=CA:FALSE\n\
             keyUsage = digitalSignature, nonRepudiation, keyEncipherment, dataEncipherment\n\
             subjectAltName = @alt_names\n\
             \n\
             [alt_names]\n\
             DNS.1 = localhost.ssl\n"
        );
    }

    #[test]
    fn test_requires_config() {
        let store = MemoryStore::new();
        let builder = SanExtensionBuilder::new(&store);
        assert!(matches!(builder.ensure(), Err(Error::ArtifactMissing { .. })));
        assert!(matches!(builder.write(), Err(Error::ArtifactMissing { .. })));
        assert!(!store.exists(V3_EXT));
    }

    #[test]
    fn test_dns_entry_matches_persisted_cn() {
        for common_name in ["localhost.ssl", "example.dev", "api.my-app.test"] {
            let store = MemoryStore::new();
            persist(&store, common_name);

            SanExtensionBuilder::new(&store).ensure().unwrap();

            let ext = Cnf::parse(V3_EXT, &store.read(V3_EXT).unwrap()).unwrap();
            let config = Cnf::parse(CSR_CONFIG, &store.read(CSR_CONFIG).unwrap()).unwrap();
            assert_eq!(ext.get("alt_names", "DNS.1"), config.get("dn", "CN"));
            assert_eq!(ext.get("alt_names", "DNS.1"), Some(common_name));
        }
    }

    #[test]
    fn test_ensure_keeps_stale_file_and_write_rebuilds() {
        let store = MemoryStore::new();
        persist(&store, "first.dev");
        let builder = SanExtensionBuilder::new(&store);
        builder.ensure().unwrap();

        // Regenerate the template with another CN
        store.delete(CSR_CONFIG).unwrap();
        persist(&store, "second.dev");

        assert_eq!(builder.ensure().unwrap().dns_names, vec!["first.dev"]);
        assert_eq!(builder.write().unwrap().dns_names, vec!["second.dev"]);
        assert_eq!(builder.ensure().unwrap().dns_names, vec!["second.dev"]);
    }

    #[test]
    fn test_parse_round_trips_builder_output() {
        let spec = SanExtensionSpec::for_common_name("example.dev");
        assert_eq!(SanExtensionSpec::parse(&spec.to_ext()).unwrap(), spec);
    }

    #[test]
    fn test_parse_hand_written_file() {
        let spec = SanExtensionSpec::parse(
            "basicConstraints = critical, CA:FALSE\n\
             keyUsage = critical, digitalSignature\n\
             subjectAltName = DNS:a.test, DNS:b.test, IP:127.0.0.1\n",
        )
        .unwrap();
        assert!(!spec.authority_key_identifier);
        assert!(!spec.ca);
        assert_eq!(spec.key_usages, vec![KeyUsagePurpose::DigitalSignature]);
        assert_eq!(spec.dns_names, vec!["a.test", "b.test"]);
        assert_eq!(spec.ip_addresses, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn test_parse_rejects_unknown_usage() {
        assert!(matches!(
            SanExtensionSpec::parse("keyUsage = teleportation\n"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_apply_sets_leaf_extensions() {
        let mut params = CertificateParams::default();
        SanExtensionSpec::for_common_name("example.dev")
            .apply(&mut params)
            .unwrap();

        assert!(params.use_authority_key_identifier_extension);
        assert!(matches!(params.is_ca, IsCa::ExplicitNoCa));
        assert_eq!(params.key_usages.len(), 4);
        assert_eq!(params.subject_alt_names.len(), 1);
        assert!(matches!(
            &params.subject_alt_names[0],
            SanType::DnsName(name) if name.to_string() == "example.dev"
        ));
    }
}
