use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted refresh token. The raw token is never stored, only its hash.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub token_id: Uuid,
    /// SHA-256 hex of the raw token; lookup key.
    pub token_hash: String,
    pub subject_id: String,
    /// Roles granted at login, re-used to mint successor access tokens.
    pub roles: Vec<String>,
    /// Shared by every token descending from the same login.
    pub family_id: Uuid,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn new(
        subject_id: String,
        roles: Vec<String>,
        family_id: Uuid,
        raw_token: &str,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            token_hash: Self::hash_token(raw_token),
            subject_id,
            roles,
            family_id,
            issued_utc: now,
            expiry_utc: now + Duration::seconds(ttl_seconds),
            consumed_utc: None,
            revoked_utc: None,
        }
    }

    /// Hash a token using SHA-256
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    /// Claimable: not consumed, not revoked, not expired.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_consumed() && !self.is_revoked() && !self.is_expired_at(now)
    }
}

/// The replacement half of a rotation. Subject, roles and family are taken
/// from the record it replaces once that record has been claimed.
#[derive(Debug, Clone)]
pub struct SuccessorToken {
    pub token_id: Uuid,
    pub token_hash: String,
    pub ttl_seconds: i64,
}

impl SuccessorToken {
    pub fn new(raw_token: &str, ttl_seconds: i64) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            token_hash: RefreshTokenRecord::hash_token(raw_token),
            ttl_seconds,
        }
    }

    pub fn replacing(self, claimed: &RefreshTokenRecord, now: DateTime<Utc>) -> RefreshTokenRecord {
        RefreshTokenRecord {
            token_id: self.token_id,
            token_hash: self.token_hash,
            subject_id: claimed.subject_id.clone(),
            roles: claimed.roles.clone(),
            family_id: claimed.family_id,
            issued_utc: now,
            expiry_utc: now + Duration::seconds(self.ttl_seconds),
            consumed_utc: None,
            revoked_utc: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let record = RefreshTokenRecord::new(
            "user_123".to_string(),
            vec!["bank_read".to_string()],
            Uuid::new_v4(),
            "token_abc",
            3600,
        );

        assert_eq!(record.subject_id, "user_123");
        assert_ne!(record.token_hash, "token_abc");
        assert_eq!(record.token_hash, RefreshTokenRecord::hash_token("token_abc"));
        assert!(record.is_claimable_at(Utc::now()));
    }

    #[test]
    fn test_record_expiry() {
        let mut record =
            RefreshTokenRecord::new("user_123".to_string(), vec![], Uuid::new_v4(), "t", 3600);
        record.expiry_utc = Utc::now() - Duration::seconds(1);
        assert!(record.is_expired_at(Utc::now()));
        assert!(!record.is_claimable_at(Utc::now()));
    }

    #[test]
    fn test_consumed_and_revoked_are_not_claimable() {
        let now = Utc::now();
        let mut consumed =
            RefreshTokenRecord::new("u".to_string(), vec![], Uuid::new_v4(), "a", 3600);
        consumed.consumed_utc = Some(now);
        assert!(!consumed.is_claimable_at(now));

        let mut revoked = RefreshTokenRecord::new("u".to_string(), vec![], Uuid::new_v4(), "b", 3600);
        revoked.revoked_utc = Some(now);
        assert!(!revoked.is_claimable_at(now));
    }

    #[test]
    fn test_successor_inherits_session() {
        let now = Utc::now();
        let mut claimed = RefreshTokenRecord::new(
            "user_123".to_string(),
            vec!["bank_read".to_string()],
            Uuid::new_v4(),
            "old",
            3600,
        );
        claimed.consumed_utc = Some(now);

        let successor = SuccessorToken::new("new", 7200).replacing(&claimed, now);
        assert_eq!(successor.subject_id, claimed.subject_id);
        assert_eq!(successor.roles, claimed.roles);
        assert_eq!(successor.family_id, claimed.family_id);
        assert_eq!(successor.token_hash, RefreshTokenRecord::hash_token("new"));
        assert_eq!(successor.expiry_utc, now + Duration::seconds(7200));
        assert!(successor.is_claimable_at(now));
    }
}
