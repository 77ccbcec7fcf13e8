mod keys;

pub use keys::{
    address_from_public_key, CryptoError, PublicKey, SecretKey, Signature, PUBLIC_KEY_LEN,
    SIGNATURE_LEN,
};
