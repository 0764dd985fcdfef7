//! Read back issued certificates without shelling out to openssl.

use std::{fmt::Write as _, net::IpAddr};

use x509_parser::{
    extensions::{GeneralName, KeyUsage, ParsedExtension},
    pem::parse_x509_pem,
    prelude::*,
    public_key::PublicKey,
};

use crate::{
    error::{Error, Result},
    store::{
        artifacts::{CA_CERT, SERVER_CERT},
        ArtifactStore,
    },
};

const SECONDS_PER_DAY: i64 = 86_400;

/// The parts of a certificate callers tend to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: Option<String>,
    pub subject_alt_names: Vec<String>,
    pub is_ca: bool,
    pub serial: String,
    pub days_valid: i64,
}

fn with_certificate<T>(pem: &str, f: impl FnOnce(&X509Certificate<'_>) -> T) -> Result<T> {
    let (_, pem) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| Error::parse("certificate", format!("bad PEM: {e}")))?;
    if pem.label != "CERTIFICATE" {
        return Err(Error::parse(
            "certificate",
            format!("expected CERTIFICATE, got {}", pem.label),
        ));
    }
    let cert = pem
        .parse_x509()
        .map_err(|e| Error::parse("certificate", format!("invalid X.509: {e}")))?;
    Ok(f(&cert))
}

pub fn describe(pem: &str) -> Result<CertificateInfo> {
    with_certificate(pem, |cert| {
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(String::from);

        let mut subject_alt_names = Vec::new();
        let mut is_ca = false;
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::SubjectAlternativeName(san) => {
                    subject_alt_names.extend(san.general_names.iter().filter_map(general_name));
                }
                ParsedExtension::BasicConstraints(bc) => is_ca = bc.ca,
                _ => {}
            }
        }

        let validity = cert.validity();
        CertificateInfo {
            common_name,
            subject_alt_names,
            is_ca,
            serial: cert.raw_serial_as_string(),
            days_valid: (validity.not_after.timestamp() - validity.not_before.timestamp())
                / SECONDS_PER_DAY,
        }
    })
}

/// Human-readable dump in the spirit of `openssl x509 -text -noout`.
pub fn render_text(pem: &str) -> Result<String> {
    with_certificate(pem, |cert| {
        let mut out = String::new();
        // Writing into a String can't fail.
        let _ = write_text(&mut out, cert);
        out
    })
}

fn write_text(out: &mut String, cert: &X509Certificate<'_>) -> std::fmt::Result {
    let version = cert.version().0;
    writeln!(out, "Certificate:")?;
    writeln!(out, "    Data:")?;
    writeln!(out, "        Version: {} (0x{version:x})", version + 1)?;
    writeln!(out, "        Serial Number:")?;
    writeln!(out, "            {}", cert.raw_serial_as_string())?;
    writeln!(
        out,
        "        Signature Algorithm: {}",
        algorithm_name(&cert.signature_algorithm.algorithm.to_id_string())
    )?;
    writeln!(out, "        Issuer: {}", cert.issuer())?;
    writeln!(out, "        Validity")?;
    writeln!(out, "            Not Before: {}", cert.validity().not_before)?;
    writeln!(out, "            Not After : {}", cert.validity().not_after)?;
    writeln!(out, "        Subject: {}", cert.subject())?;
    writeln!(out, "        Subject Public Key Info:")?;
    match cert.public_key().parsed() {
        Ok(PublicKey::RSA(rsa)) => {
            writeln!(out, "            Public Key Algorithm: rsaEncryption")?;
            writeln!(out, "                Public-Key: ({} bit)", rsa.key_size())?;
        }
        _ => writeln!(
            out,
            "            Public Key Algorithm: {}",
            algorithm_name(&cert.public_key().algorithm.algorithm.to_id_string())
        )?,
    }

    if !cert.extensions().is_empty() {
        writeln!(out, "        X509v3 extensions:")?;
    }
    for ext in cert.extensions() {
        let critical = if ext.critical { " critical" } else { "" };
        match ext.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => {
                let names: Vec<String> = san
                    .general_names
                    .iter()
                    .filter_map(|name| {
                        let value = general_name(name)?;
                        Some(match name {
                            GeneralName::IPAddress(_) => format!("IP Address:{value}"),
                            _ => format!("DNS:{value}"),
                        })
                    })
                    .collect();
                writeln!(out, "            X509v3 Subject Alternative Name:{critical}")?;
                writeln!(out, "                {}", names.join(", "))?;
            }
            ParsedExtension::BasicConstraints(bc) => {
                writeln!(out, "            X509v3 Basic Constraints:{critical}")?;
                match bc.path_len_constraint {
                    Some(len) => writeln!(
                        out,
                        "                CA:{}, pathlen:{len}",
                        bc.ca.to_string().to_uppercase()
                    )?,
                    None => writeln!(out, "                CA:{}", bc.ca.to_string().to_uppercase())?,
                }
            }
            ParsedExtension::KeyUsage(ku) => {
                writeln!(out, "            X509v3 Key Usage:{critical}")?;
                writeln!(out, "                {}", key_usage_names(ku).join(", "))?;
            }
            ParsedExtension::SubjectKeyIdentifier(kid) => {
                writeln!(out, "            X509v3 Subject Key Identifier:{critical}")?;
                writeln!(out, "                {}", colon_hex(kid.0))?;
            }
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                writeln!(out, "            X509v3 Authority Key Identifier:{critical}")?;
                if let Some(kid) = &aki.key_identifier {
                    writeln!(out, "                {}", colon_hex(kid.0))?;
                }
            }
            _ => writeln!(out, "            {}:{critical}", ext.oid.to_id_string())?,
        }
    }
    Ok(())
}

fn general_name(name: &GeneralName<'_>) -> Option<String> {
    match name {
        GeneralName::DNSName(dns) => Some(dns.to_string()),
        GeneralName::IPAddress(bytes) => match bytes.len() {
            4 => <[u8; 4]>::try_from(*bytes).ok().map(|b| IpAddr::from(b).to_string()),
            16 => <[u8; 16]>::try_from(*bytes).ok().map(|b| IpAddr::from(b).to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn key_usage_names(ku: &KeyUsage) -> Vec<&'static str> {
    [
        (ku.digital_signature(), "Digital Signature"),
        (ku.non_repudiation(), "Non Repudiation"),
        (ku.key_encipherment(), "Key Encipherment"),
        (ku.data_encipherment(), "Data Encipherment"),
        (ku.key_agreement(), "Key Agreement"),
        (ku.key_cert_sign(), "Certificate Sign"),
        (ku.crl_sign(), "CRL Sign"),
        (ku.encipher_only(), "Encipher Only"),
        (ku.decipher_only(), "Decipher Only"),
    ]
    .into_iter()
    .filter_map(|(set, name)| set.then_some(name))
    .collect()
}

fn algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.1" => "rsaEncryption".into(),
        "1.2.840.113549.1.1.11" => "sha256WithRSAEncryption".into(),
        "1.2.840.113549.1.1.12" => "sha384WithRSAEncryption".into(),
        "1.2.840.113549.1.1.13" => "sha512WithRSAEncryption".into(),
        "1.2.840.10045.4.3.2" => "ecdsa-with-SHA256".into(),
        "1.2.840.10045.4.3.3" => "ecdsa-with-SHA384".into(),
        "1.3.101.112" => "ED25519".into(),
        other => other.to_owned(),
    }
}

fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Text dump of `server.crt`, or of `rootCA.pem` when `ca` is set.
pub fn display_certificate(store: &dyn ArtifactStore, ca: bool) -> Result<String> {
    let name = if ca { CA_CERT } else { SERVER_CERT };
    if !store.exists(name) {
        return Err(Error::ArtifactMissing {
            name: name.to_owned(),
            hint: "Have you generated the certificate already?",
        });
    }
    render_text(&store.read(name)?)
}
