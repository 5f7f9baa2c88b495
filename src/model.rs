//! Data exchanged with the client proxy and the operator.
//!
//! All types serialize to the snake_case JSON shapes used on the wire and in the
//! first-party cookies. Signatures are opaque strings: they are produced and
//! checked remotely, never here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version tag written into every record minted by this crate.
pub const MODEL_VERSION: &str = "0.1";

/// Type tag of the pseudonymous browser identifier.
pub const BROWSER_ID_TYPE: &str = "paf_browser_id";

fn default_version() -> String {
    MODEL_VERSION.to_string()
}

fn default_id_type() -> String {
    BROWSER_ID_TYPE.to_string()
}

/// Transaction id correlating a seed with the ad requests it was created for.
pub type TransactionId = String;

/// Creates a fresh random transaction id.
pub fn new_transaction_id() -> TransactionId {
    Uuid::new_v4().to_string()
}

/// Who signed a record, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub domain: String,
    /// Milliseconds since the epoch.
    pub timestamp: u64,
    pub signature: String,
}

/// A pseudonymous identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(rename = "type", default = "default_id_type")]
    pub id_type: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// `Some(false)` while the operator has minted but not yet stored the id.
    /// A missing flag means persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted: Option<bool>,
}

impl Identifier {
    pub fn is_persisted(&self) -> bool {
        self.persisted != Some(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesData {
    pub use_browsing_for_personalization: bool,
}

/// Preferences before they went through the signing capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedPreferences {
    pub version: String,
    pub data: PreferencesData,
}

impl UnsignedPreferences {
    pub fn new(opt_in: bool) -> Self {
        Self {
            version: MODEL_VERSION.to_string(),
            data: PreferencesData { use_browsing_for_personalization: opt_in },
        }
    }
}

/// A (usually signed) consent preference record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_version")]
    pub version: String,
    pub data: PreferencesData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

impl Preferences {
    pub fn is_signed(&self) -> bool {
        self.source.is_some()
    }

    pub fn consent(&self) -> bool {
        self.data.use_browsing_for_personalization
    }
}

/// A complete identity record: at least one identifier plus preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdsAndPreferences {
    pub identifiers: Vec<Identifier>,
    pub preferences: Preferences,
}

/// Identifiers with preferences that may not have been chosen yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdsAndOptionalPreferences {
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
}

impl IdsAndOptionalPreferences {
    pub fn persisted_identifiers(&self) -> Vec<Identifier> {
        self.identifiers.iter().filter(|i| i.is_persisted()).cloned().collect()
    }

    pub fn consent(&self) -> Option<bool> {
        self.preferences.as_ref().map(Preferences::consent)
    }

    /// True when the operator reports that nothing is stored for this user.
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty() && self.preferences.is_none()
    }

    /// Returns the record only if it carries an identifier and preferences.
    pub fn into_complete(self) -> Option<IdsAndPreferences> {
        match self.preferences {
            Some(preferences) if !self.identifiers.is_empty() => Some(IdsAndPreferences {
                identifiers: self.identifiers,
                preferences,
            }),
            _ => None,
        }
    }
}

impl From<IdsAndPreferences> for IdsAndOptionalPreferences {
    fn from(v: IdsAndPreferences) -> Self {
        Self {
            identifiers: v.identifiers,
            preferences: Some(v.preferences),
        }
    }
}

/// A signed message exchanged with the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage<B> {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub signature: String,
    pub body: B,
}

/// Operator answer to a read, write or delete.
pub type GetIdsPrefsResponse = SignedMessage<IdsAndOptionalPreferences>;

/// Signed write request produced by the proxy.
pub type PostIdsPrefsRequest = SignedMessage<IdsAndPreferences>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdBody {
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
}

pub type GetNewIdResponse = SignedMessage<NewIdBody>;

/// Answer of the third-party cookie probe. Error bodies deserialize as unsupported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThirdPartyCookieCheck {
    #[serde(rename = "3pc", default)]
    pub supported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSignPreferencesRequest {
    pub identifiers: Vec<Identifier>,
    pub unsigned_preferences: UnsignedPreferences,
}

/// A signed token binding identity and preferences to a set of transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default = "default_version")]
    pub version: String,
    pub transaction_ids: Vec<TransactionId>,
    pub publisher: String,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSeedRequest {
    pub transaction_ids: Vec<TransactionId>,
    pub data: IdsAndPreferences,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionContent {
    pub transmission_id: String,
    pub content_id: String,
}

/// Response of a transmission request, with the responses of its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionResponse {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub transaction_id: TransactionId,
    pub receiver: String,
    pub status: String,
    #[serde(default)]
    pub details: String,
    pub source: Source,
    #[serde(default)]
    pub contents: Vec<TransmissionContent>,
    #[serde(default)]
    pub children: Vec<TransmissionResponse>,
}

/// One hop of the transmission chain, as recorded in an audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionResult {
    pub version: String,
    pub receiver: String,
    pub status: String,
    pub details: String,
    pub source: Source,
}

impl From<&TransmissionResponse> for TransmissionResult {
    fn from(r: &TransmissionResponse) -> Self {
        Self {
            version: r.version.clone(),
            receiver: r.receiver.clone(),
            status: r.status.clone(),
            details: r.details.clone(),
            source: r.source.clone(),
        }
    }
}

/// Proof of which identity and consent were used for one rendered placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    pub data: IdsAndPreferences,
    pub seed: Seed,
    pub transaction_id: TransactionId,
    pub transmissions: Vec<TransmissionResult>,
}
