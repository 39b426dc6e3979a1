/// Deterministic broker message ID suitable for inbox de-dupe. Kept as an
/// opaque string newtype — never derived from wall-clock or rng, always a
/// stable function of the request that produced it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BrokerMessageId(pub String);

impl BrokerMessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}
