use crate::error::{CoordinatorError, CoordinatorResult};
use crate::state::Address;

/// The signing identity handed over by the wallet connector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletSession {
    pub address: Address,
    pub chain: String,
    pub is_connected: bool,
}

impl WalletSession {
    pub fn connected(address: Address, chain: impl Into<String>) -> Self {
        Self {
            address,
            chain: chain.into(),
            is_connected: true,
        }
    }

    pub fn disconnected(address: Address, chain: impl Into<String>) -> Self {
        Self {
            address,
            chain: chain.into(),
            is_connected: false,
        }
    }

    /// The address allowed to sign, if the session is still live.
    pub fn signer(&self) -> CoordinatorResult<Address> {
        if self.is_connected {
            Ok(self.address)
        } else {
            Err(CoordinatorError::NoSession)
        }
    }
}
