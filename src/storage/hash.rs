use sha2::{Digest, Sha256};

/// One-way mapping of hardware addresses, so raw addresses never reach the logs.
#[derive(Debug, Clone, Default)]
pub struct AddressHasher {
    salt: String,
}

impl AddressHasher {
    pub fn new(salt: impl Into<String>) -> Self {
        AddressHasher { salt: salt.into() }
    }

    pub fn hash(&self, address: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(address.to_ascii_uppercase().as_bytes());
        hex::encode(hasher.finalize())
    }
}
