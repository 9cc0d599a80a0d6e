use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fleet_core::{models::DeploySession, FleetError, FleetResult};

#[derive(Debug, Serialize, Deserialize)]
struct DeployClaims {
    jti: String,
    iat: i64,
    exp: i64,
    project: String,
    source_path: String,
    version: String,
    nodes: Vec<String>,
}

/// 部署令牌的签发与校验（HS256）
#[derive(Clone)]
pub struct DeployTokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_seconds: i64,
}

impl DeployTokenService {
    pub fn new(secret: &str, ttl_seconds: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds: i64::try_from(ttl_seconds).unwrap_or(i64::MAX),
        }
    }

    pub fn issue(&self, session: &DeploySession) -> FleetResult<String> {
        self.issue_at(session, Utc::now())
    }

    fn issue_at(&self, session: &DeploySession, now: DateTime<Utc>) -> FleetResult<String> {
        let claims = DeployClaims {
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: now.timestamp().saturating_add(self.ttl_seconds),
            project: session.project.clone(),
            source_path: session.source_path.to_string_lossy().into_owned(),
            version: session.version.clone(),
            nodes: session.nodes.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| FleetError::Internal(format!("签发部署令牌失败: {e}")))
    }

    pub fn verify(&self, token: &str) -> FleetResult<DeploySession> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<DeployClaims>(token, &self.decoding, &validation)
            .map_err(|e| FleetError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        Ok(DeploySession {
            project: claims.project,
            source_path: claims.source_path.into(),
            version: claims.version,
            nodes: claims.nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> DeploySession {
        DeploySession {
            project: "bookstore".to_string(),
            source_path: "/srv/bookstore/scrapy.cfg".into(),
            version: Uuid::now_v7().to_string(),
            nodes: vec!["node-a".to_string(), "node-b".to_string()],
        }
    }

    #[test]
    fn test_roundtrip_preserves_session() {
        let service = DeployTokenService::new("a-secret-that-is-long-enough-for-hs256!", 600);
        let original = session();
        let token = service.issue(&original).unwrap();
        assert_eq!(service.verify(&token).unwrap(), original);
    }

    #[test]
    fn test_tampered_or_foreign_tokens_are_rejected() {
        let service = DeployTokenService::new("a-secret-that-is-long-enough-for-hs256!", 600);
        let token = service.issue(&session()).unwrap();

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1] = parts[1].chars().rev().collect();
        let tampered = parts.join(".");
        assert!(matches!(service.verify(&tampered), Err(FleetError::InvalidToken(_))));

        let other = DeployTokenService::new("another-secret-that-is-long-enough!!!!", 600);
        assert!(matches!(other.verify(&token), Err(FleetError::InvalidToken(_))));
        assert!(service.verify("not-a-token").is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let service = DeployTokenService::new("a-secret-that-is-long-enough-for-hs256!", 60);
        let stale = service
            .issue_at(&session(), Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert!(matches!(service.verify(&stale), Err(FleetError::InvalidToken(_))));
    }
}
