use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 4 * 60 * 60;

/// The caller's role for a webinar, carried in the access token. Issued by
/// the external registration service; this core only validates it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Viewer,
    Host,
}

impl ActorRole {
    /// Role hierarchy: a host can do anything a viewer can.
    pub fn allows(self, required: ActorRole) -> bool {
        match required {
            ActorRole::Viewer => true,
            ActorRole::Host => self == ActorRole::Host,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    webinar_id: Uuid,
    role: ActorRole,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebinarAccess {
    pub registration_id: Uuid,
    pub webinar_id: Uuid,
    pub role: ActorRole,
}

#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_webinar_token(
        &self,
        registration_id: Uuid,
        webinar_id: Uuid,
        role: ActorRole,
    ) -> anyhow::Result<String> {
        self.issue_webinar_token_at(registration_id, webinar_id, role, current_unix_timestamp()?)
    }

    fn issue_webinar_token_at(
        &self,
        registration_id: Uuid,
        webinar_id: Uuid,
        role: ActorRole,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: registration_id.to_string(),
            webinar_id,
            role,
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    pub fn validate_webinar_token(&self, token: &str) -> anyhow::Result<WebinarAccess> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        let registration_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("access token subject '{}' is not a UUID", claims.sub))?;

        Ok(WebinarAccess { registration_id, webinar_id: claims.webinar_id, role: claims.role })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{
        current_unix_timestamp, ActorRole, JwtAccessTokenService, ACCESS_TOKEN_TTL_SECONDS,
    };
    use uuid::Uuid;

    const TEST_SECRET: &str = "greenroom_test_secret_that_is_definitely_long_enough";

    #[test]
    fn issues_and_validates_webinar_scoped_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let registration_id = Uuid::new_v4();
        let webinar_id = Uuid::new_v4();

        let token = service
            .issue_webinar_token(registration_id, webinar_id, ActorRole::Viewer)
            .expect("token should be issued");
        let access = service.validate_webinar_token(&token).expect("token should validate");

        assert_eq!(access.registration_id, registration_id);
        assert_eq!(access.webinar_id, webinar_id);
        assert_eq!(access.role, ActorRole::Viewer);
    }

    #[test]
    fn rejects_tampered_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token = service
            .issue_webinar_token(Uuid::new_v4(), Uuid::new_v4(), ActorRole::Host)
            .expect("token should be issued");
        let tampered = format!("{token}x");

        assert!(service.validate_webinar_token(&tampered).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let issued_at = current_unix_timestamp().expect("current timestamp should resolve")
            - ACCESS_TOKEN_TTL_SECONDS
            - 1;
        let token = service
            .issue_webinar_token_at(Uuid::new_v4(), Uuid::new_v4(), ActorRole::Viewer, issued_at)
            .expect("token should be issued");

        assert!(service.validate_webinar_token(&token).is_err());
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(JwtAccessTokenService::new("too_short").is_err());
    }

    #[test]
    fn host_role_allows_viewer_actions_but_not_vice_versa() {
        assert!(ActorRole::Host.allows(ActorRole::Viewer));
        assert!(ActorRole::Host.allows(ActorRole::Host));
        assert!(ActorRole::Viewer.allows(ActorRole::Viewer));
        assert!(!ActorRole::Viewer.allows(ActorRole::Host));
    }
}
