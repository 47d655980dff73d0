/*!
Client side of the SCRAM-SHA-256 exchange (RFC 7677, RFC 5802), with
channel binding disabled.
*/

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use sedge_errors::{AuthenticationError, Error, ErrorKind, ProtocolError};

const NONCE_LENGTH: usize = 18;
const GS2_HEADER: &str = "n,,";

pub struct ScramClient {
    password: String,
    client_nonce: String,
    first_bare: String,
}

#[derive(Debug)]
pub struct ScramFinal {
    message: String,
    server_signature: Vec<u8>,
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// The `Hi` function: PBKDF2 with HMAC-SHA-256.
fn salted_password(password: &[u8], salt: &[u8], iterations: usize) -> Vec<u8> {
    let mut salted = [salt, b"\x00\x00\x00\x01"].concat();
    let mut previous = hmac_sha256(password, &salted);
    salted = previous.clone();
    for _ in 1..iterations {
        previous = hmac_sha256(password, &previous);
        for (acc, byte) in salted.iter_mut().zip(&previous) {
            *acc ^= byte;
        }
    }
    salted
}

fn generate_nonce() -> String {
    let bytes: [u8; NONCE_LENGTH] = rand::random();
    BASE64.encode(bytes)
}

/// Attribute values are `name=value` pairs separated by commas.
fn split_attribute<'a>(frame: &'a str, name: &str) -> Result<&'a str, Error> {
    for part in frame.split(',') {
        if let Some(value) = part.strip_prefix(name) {
            if let Some(value) = value.strip_prefix('=') {
                return Ok(value);
            }
        }
    }
    Err(ProtocolError::with_message(format!(
        "missing {name:?} attribute in SASL message"
    )))
}

impl ScramClient {
    pub fn new(user: &str, password: &str) -> ScramClient {
        ScramClient::with_nonce(user, password, generate_nonce())
    }

    fn with_nonce(user: &str, password: &str, client_nonce: String) -> ScramClient {
        // "=" and "," are escaped in the username per RFC 5802.
        let escaped_user = user.replace('=', "=3D").replace(',', "=2C");
        let first_bare = format!("n={escaped_user},r={client_nonce}");
        ScramClient {
            password: password.into(),
            client_nonce,
            first_bare,
        }
    }

    pub fn client_first(&self) -> String {
        format!("{GS2_HEADER}{}", self.first_bare)
    }

    /// Process the server-first message and produce the client-final one.
    pub fn handle_server_first(self, server_first: &str) -> Result<ScramFinal, Error> {
        let server_nonce = split_attribute(server_first, "r")?;
        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(AuthenticationError::with_message(
                "server nonce does not extend the client nonce",
            ));
        }
        let salt = BASE64
            .decode(split_attribute(server_first, "s")?)
            .map_err(|e| ProtocolError::with_source(e).context("invalid SASL salt"))?;
        let iterations: usize = split_attribute(server_first, "i")?
            .parse()
            .map_err(|_| ProtocolError::with_message("invalid SASL iteration count"))?;
        if iterations < 1 {
            return Err(ProtocolError::with_message("invalid SASL iteration count"));
        }

        let salted = salted_password(self.password.as_bytes(), &salt, iterations);
        let client_key = hmac_sha256(&salted, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let server_key = hmac_sha256(&salted, b"Server Key");

        let channel_binding = BASE64.encode(GS2_HEADER.as_bytes());
        let final_without_proof = format!("c={channel_binding},r={server_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.first_bare, server_first, final_without_proof
        );
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(a, b)| a ^ b)
            .collect();

        Ok(ScramFinal {
            message: format!("{final_without_proof},p={}", BASE64.encode(proof)),
            server_signature: hmac_sha256(&server_key, auth_message.as_bytes()),
        })
    }
}

impl ScramFinal {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check the server's signature from the server-final message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), Error> {
        let signature = BASE64
            .decode(split_attribute(server_final, "v")?)
            .map_err(|e| ProtocolError::with_source(e).context("invalid SASL signature"))?;
        if signature != self.server_signature {
            return Err(AuthenticationError::with_message(
                "server signature does not match",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vector from RFC 7677 §3.
    #[test]
    fn rfc7677_exchange() {
        let scram = ScramClient::with_nonce(
            "user",
            "pencil",
            "rOprNGfwEbeRWgbNEkqO".to_string(),
        );
        assert_eq!(scram.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");
        let server_first = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                            s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let last = scram.handle_server_first(server_first).unwrap();
        assert_eq!(
            last.message(),
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );
        last.verify_server_final("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn rejects_foreign_nonce() {
        let scram = ScramClient::with_nonce("user", "pencil", "aaaa".to_string());
        let err = scram
            .handle_server_first("r=bbbbcccc,s=AAAA,i=4096")
            .unwrap_err();
        assert!(err.is::<AuthenticationError>());
    }
}
