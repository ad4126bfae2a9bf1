use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An externally produced breakout alert for a single symbol.
///
/// Immutable once observed. The feed delivers at-least-once, so the same
/// logical alert may arrive any number of times (including across restarts);
/// [`Signal::fingerprint`] is the stable identity used for deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    /// Alert kind as reported by the feed (e.g. "New High").
    pub kind: String,
    pub description: String,
    pub price: Decimal,
    pub relative_volume: f64,
}

impl Signal {
    /// Computes the dedup fingerprint over the signal's identifying fields.
    ///
    /// Only (timestamp, symbol, description) participate: price and volume
    /// may be re-quoted between deliveries of the same logical event.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(b"|");
        hasher.update(self.symbol.as_bytes());
        hasher.update(b"|");
        hasher.update(self.description.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }
}

/// Hex SHA-256 dedup key derived from a signal's identifying fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
