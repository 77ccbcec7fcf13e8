use alloy_primitives::Address;

/// The ordered set of validator addresses eligible to produce the next
/// block. Order matters: it seeds the round-robin proposer rotation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorSet {
    addresses: Vec<Address>,
}

impl ValidatorSet {
    pub fn new(addresses: Vec<Address>) -> Self {
        Self { addresses }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.addresses.iter().position(|a| a == address)
    }

    pub fn get(&self, index: usize) -> Option<Address> {
        self.addresses.get(index).copied()
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }
}
