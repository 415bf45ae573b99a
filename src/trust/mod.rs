//! Trust enforcement: the status lattice, chain validation and the trust
//! model that assigns statuses to the addresses of a message.

pub mod chain;
pub mod model;

pub use chain::TrustChainValidator;
pub use model::{DefaultTrustModel, TrustModel};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Outcome of trust enforcement for one address, totally ordered from
/// weakest to strongest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TrustEnforcementStatus {
    #[default]
    NotEnforced,
    Failed,
    SuccessOffline,
    SuccessThumbprintMismatch,
    Success,
}

impl TrustEnforcementStatus {
    /// The weakest status an agent may accept as its minimum requirement.
    pub const MINIMUM_ACCEPTABLE: TrustEnforcementStatus = TrustEnforcementStatus::SuccessOffline;

    pub fn is_success(self) -> bool {
        self >= Self::MINIMUM_ACCEPTABLE
    }

    pub fn meets(self, minimum: TrustEnforcementStatus) -> bool {
        self >= minimum
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrustEnforcementStatus::NotEnforced => "not_enforced",
            TrustEnforcementStatus::Failed => "failed",
            TrustEnforcementStatus::SuccessOffline => "success_offline",
            TrustEnforcementStatus::SuccessThumbprintMismatch => "success_thumbprint_mismatch",
            TrustEnforcementStatus::Success => "success",
        }
    }
}

impl fmt::Display for TrustEnforcementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TrustEnforcementStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "not_enforced" | "none" => Ok(TrustEnforcementStatus::NotEnforced),
            "failed" => Ok(TrustEnforcementStatus::Failed),
            "success_offline" => Ok(TrustEnforcementStatus::SuccessOffline),
            "success_thumbprint_mismatch" => Ok(TrustEnforcementStatus::SuccessThumbprintMismatch),
            "success" => Ok(TrustEnforcementStatus::Success),
            other => Err(Error::invalid_argument(format!(
                "unknown trust status: {other}"
            ))),
        }
    }
}
