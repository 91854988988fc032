use serde::{Deserialize, Serialize};
use std::fmt;

/// External dependency guarded by the resilience layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceIdentity {
    Reddit,
    OpenAi,
    Ghost,
    Database,
    Redis,
    Vault,
}

impl ServiceIdentity {
    pub const ALL: [ServiceIdentity; 6] = [
        Self::Reddit,
        Self::OpenAi,
        Self::Ghost,
        Self::Database,
        Self::Redis,
        Self::Vault,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reddit => "reddit",
            Self::OpenAi => "openai",
            Self::Ghost => "ghost",
            Self::Database => "database",
            Self::Redis => "redis",
            Self::Vault => "vault",
        }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reddit" => Ok(Self::Reddit),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ghost" => Ok(Self::Ghost),
            "database" | "postgres" => Ok(Self::Database),
            "redis" => Ok(Self::Redis),
            "vault" => Ok(Self::Vault),
            _ => Err(format!("Unknown service: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_names_round_trip() {
        for service in ServiceIdentity::ALL {
            assert_eq!(service.as_str().parse::<ServiceIdentity>(), Ok(service));
        }
        assert_eq!("OpenAI".parse::<ServiceIdentity>(), Ok(ServiceIdentity::OpenAi));
        assert!("twitter".parse::<ServiceIdentity>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&ServiceIdentity::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
    }
}
