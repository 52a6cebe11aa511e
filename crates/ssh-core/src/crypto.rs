use russh::{Preferred, cipher, kex};
use std::borrow::Cow;

/// Algorithm preferences offered by the tunnel client.
pub fn default_preferred() -> Preferred {
    Preferred::DEFAULT.clone()
}

/// Preferences restricted to modern AEAD ciphers and curve25519 key exchange.
///
/// Useful against hardened servers that reject anything else; the default set
/// already lists these first.
pub fn strict_preferred() -> Preferred {
    Preferred {
        kex: Cow::Owned(vec![kex::CURVE25519, kex::CURVE25519_PRE_RFC_8731, kex::EXTENSION_SUPPORT_AS_CLIENT]),
        cipher: Cow::Owned(vec![cipher::CHACHA20_POLY1305, cipher::AES_256_GCM]),
        ..Preferred::DEFAULT.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_preferences_keep_default_keys() {
        let strict = strict_preferred();
        assert_eq!(strict.key, Preferred::DEFAULT.key);
        assert_eq!(strict.cipher.len(), 2);
        assert_eq!(strict.kex.len(), 3);
    }
}
