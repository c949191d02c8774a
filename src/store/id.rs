use std::fmt::{self, Display};
use std::str::{self, FromStr};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, DecodeError, Engine as _};
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

/// A short, URL-safe, unguessable session identifier.
///
/// Backed by 128 bits of CSPRNG output, well above the spec's 64-bit
/// entropy floor, and rendered the same way the teacher's cookie `Id`
/// renders itself: raw bytes through unpadded URL-safe base64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; 16]);

impl SessionId {
    pub fn generate(rng: &mut ChaCha20Rng) -> Self {
        let mut bytes = [0_u8; 16];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// A fresh random id for use in tests that need a stand-in value rather
    /// than one returned by a live [`crate::store::Store`].
    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::generate(&mut new_rng())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut encoded = [0_u8; 22];
        URL_SAFE_NO_PAD
            .encode_slice(self.0, &mut encoded)
            .expect("encoded session id is exactly 22 bytes");
        let encoded = str::from_utf8(&encoded).expect("base64 output is valid UTF-8");

        f.write_str(encoded)
    }
}

impl FromStr for SessionId {
    type Err = base64::DecodeSliceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut decoded = [0_u8; 16];
        let bytes_decoded = URL_SAFE_NO_PAD.decode_slice(s.as_bytes(), &mut decoded)?;
        if bytes_decoded != 16 {
            return Err(base64::DecodeSliceError::DecodeError(
                DecodeError::InvalidLength(bytes_decoded),
            ));
        }

        Ok(Self(decoded))
    }
}

/// Seeds a fresh CSPRNG the way the teacher's session store seeds its own
/// (`ChaCha20Rng::from_entropy`), shared between id and nonce generation.
pub fn new_rng() -> ChaCha20Rng {
    ChaCha20Rng::from_entropy()
}
