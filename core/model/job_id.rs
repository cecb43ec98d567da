use serde::de::Visitor;
use serde::{Deserialize, Serialize};

/// A unique identifier for a job. It should only be constructed via `JobId::next`.
///
#[derive(Copy, Default, Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct JobId(u128);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "Job(".fmt(f)?;
        uuid::Uuid::from_u128_le(self.0).fmt(f)?;
        ")".fmt(f)?;
        Ok(())
    }
}

impl JobId {
    pub(crate) fn next() -> Self {
        Self(uuid::Uuid::new_v4().to_u128_le())
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        uuid::Uuid::from_u128_le(self.0)
    }
}

impl Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_uuid().to_string())
    }
}

struct JobIdVisitor;

impl Visitor<'_> for JobIdVisitor {
    type Value = JobId;

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        uuid::Uuid::parse_str(v)
            .map(|uuid| JobId(uuid.to_u128_le()))
            .map_err(E::custom)
    }

    fn expecting(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str("a job id as a hyphenated uuid string")
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(JobIdVisitor)
    }
}
