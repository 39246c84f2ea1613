//! Certificate material for DTLS endpoints.

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::x509::{X509NameBuilder, X509};

use crate::Error;

/// Certificate and private key pair.
#[derive(Clone)]
pub struct DtlsCertificate {
    /// Certificate in DER format.
    pub certificate: Vec<u8>,
    /// Private key in DER format.
    pub private_key: Vec<u8>,
}

/// Generate a self-signed certificate (ECDSA P-256, SHA-256).
///
/// Suitable for tests and for deployments that authenticate peers by
/// fingerprint rather than by chain validation.
pub fn generate_self_signed_certificate() -> Result<DtlsCertificate, Error> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let ec = EcKey::generate(&group)?;
    let pkey = PKey::from_ec_key(ec)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", "udtls")?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    let not_before = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now(365)?;
    builder.set_not_after(&not_after)?;
    builder.set_pubkey(&pkey)?;
    builder.sign(&pkey, MessageDigest::sha256())?;
    let x509 = builder.build();

    Ok(DtlsCertificate {
        certificate: x509.to_der()?,
        private_key: pkey.private_key_to_der()?,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_certificate_parses_back() {
        let cert = generate_self_signed_certificate().expect("generate certificate");

        let x509 = X509::from_der(&cert.certificate).expect("certificate DER");
        let pkey = PKey::private_key_from_der(&cert.private_key).expect("private key DER");

        // The certificate must carry the public half of the generated key.
        let public = x509.public_key().expect("public key");
        assert!(public.public_eq(&pkey));
    }
}
